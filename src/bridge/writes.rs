//! Inbound characteristic writes.
//!
//! GATTS write events arrive on the stack's task with a borrowed buffer.
//! The bytes are copied into a bounded mailbox (same primitive as the
//! deferred queue) and routed on the loop thread by the controller.

use log::warn;

use crate::app::ports::{CharacteristicCallbacks, CharacteristicHandle};
use crate::deferred::Mailbox;

/// Longest write accepted from a central.
pub const MAX_WRITE_LEN: usize = 128;

/// Writes waiting for the loop.
const WRITE_INBOX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointWrite {
    pub handle: CharacteristicHandle,
    pub data: heapless::Vec<u8, MAX_WRITE_LEN>,
}

#[derive(Default)]
pub struct InboundWrites {
    inbox: Mailbox<EndpointWrite, WRITE_INBOX_DEPTH>,
}

impl InboundWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest pending write. Loop thread only.
    pub fn take(&self) -> Option<EndpointWrite> {
        self.inbox.take()
    }

    pub fn len(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty()
    }
}

impl CharacteristicCallbacks for InboundWrites {
    fn on_write(&self, handle: CharacteristicHandle, data: &[u8]) {
        let Ok(data) = heapless::Vec::from_slice(data) else {
            warn!(
                "BLE: write to handle {} dropped ({} > {} bytes)",
                handle.0,
                data.len(),
                MAX_WRITE_LEN
            );
            return;
        };
        if self.inbox.post(EndpointWrite { handle, data }).is_err() {
            warn!("BLE: write inbox full, dropping write to handle {}", handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_copied_in_order() {
        let writes = InboundWrites::new();
        writes.on_write(CharacteristicHandle(3), b"on");
        writes.on_write(CharacteristicHandle(4), b"help");
        let first = writes.take().unwrap();
        assert_eq!(first.handle, CharacteristicHandle(3));
        assert_eq!(first.data.as_slice(), b"on");
        assert_eq!(writes.take().unwrap().handle, CharacteristicHandle(4));
        assert!(writes.take().is_none());
    }

    #[test]
    fn oversized_write_is_dropped() {
        let writes = InboundWrites::new();
        writes.on_write(CharacteristicHandle(1), &[b'x'; MAX_WRITE_LEN + 1]);
        assert!(writes.is_empty());
    }

    #[test]
    fn full_inbox_drops_newest() {
        let writes = InboundWrites::new();
        for i in 0..(WRITE_INBOX_DEPTH as u16 + 2) {
            writes.on_write(CharacteristicHandle(i), b"1");
        }
        assert_eq!(writes.len(), WRITE_INBOX_DEPTH);
        assert_eq!(writes.take().unwrap().handle, CharacteristicHandle(0));
    }
}
