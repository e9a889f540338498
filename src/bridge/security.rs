//! Security bridge.
//!
//! Bluedroid calls these from its own task during pairing. Callbacks that
//! need an immediate answer (passkey request, security request, PIN
//! confirmation) decide inline; every user-visible effect is deferred to the
//! loop thread through the [`DeferredQueue`](crate::deferred::DeferredQueue).

use core::fmt::Write;
use std::sync::Arc;

use log::{debug, info};

use crate::app::callbacks::CallbackList;
use crate::app::ports::SecurityCallbacks;
use crate::deferred::LoopHandle;

/// Digits shown to the user for a passkey.
pub const PASSKEY_DIGITS: usize = 6;

/// Render a passkey as a zero-padded six-digit decimal string.
pub fn format_passkey(passkey: u32) -> heapless::String<PASSKEY_DIGITS> {
    let mut digits = heapless::String::new();
    // Six digits always fit once reduced below 10^6.
    let _ = write!(digits, "{:06}", passkey % 1_000_000);
    digits
}

pub struct SecurityBridge {
    queue: LoopHandle,
    static_passkey: u32,
    show_passkey: Arc<CallbackList<str>>,
    authentication_complete: Arc<CallbackList<bool>>,
}

impl SecurityBridge {
    pub fn new(
        queue: LoopHandle,
        static_passkey: u32,
        show_passkey: Arc<CallbackList<str>>,
        authentication_complete: Arc<CallbackList<bool>>,
    ) -> Self {
        Self {
            queue,
            static_passkey,
            show_passkey,
            authentication_complete,
        }
    }
}

impl SecurityCallbacks for SecurityBridge {
    fn on_passkey_request(&self) -> u32 {
        self.queue.enqueue(|| debug!("BLE security - passkey requested"));
        self.static_passkey
    }

    fn on_passkey_notify(&self, passkey: u32) {
        let digits = format_passkey(passkey);
        let callbacks = self.show_passkey.clone();
        self.queue.enqueue(move || {
            info!("BLE authentication - pass key received");
            callbacks.call(digits.as_str());
        });
    }

    fn on_security_request(&self) -> bool {
        self.queue.enqueue(|| debug!("BLE security - security request accepted"));
        true
    }

    fn on_confirm_pin(&self, pin: u32) -> bool {
        self.queue
            .enqueue(move || debug!("BLE security - confirming PIN {:06}", pin));
        true
    }

    fn on_authentication_complete(&self, success: bool) {
        let callbacks = self.authentication_complete.clone();
        self.queue.enqueue(move || {
            if success {
                info!("BLE authentication - completed successfully");
            } else {
                info!("BLE authentication - failed");
            }
            callbacks.call(&success);
        });
    }
}
