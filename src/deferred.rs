//! Deferred execution onto the main loop.
//!
//! Bluedroid invokes our callbacks from its own task. Those callbacks must
//! not touch application state, so anything with a user-visible effect is
//! packaged as a closure and pushed here; the main loop drains the queue
//! and runs each closure in FIFO order.
//!
//! ```text
//! ┌──────────────┐
//! │ GAP callback │────▶┌────────────────┐     ┌──────────────┐
//! │ GATTS cb     │────▶│ DeferredQueue  │────▶│  Main Loop   │
//! │ Timer task   │────▶│ (bounded MPSC) │     │ (drain_all)  │
//! └──────────────┘     └────────────────┘     └──────────────┘
//! ```
//!
//! The queue never blocks a producer. When it is full the new item is
//! dropped and a warning is logged: deferred work is notification
//! side-effects only, never safety-critical commands.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

/// Default number of pending deferred items.
pub const DEFERRED_QUEUE_CAPACITY: usize = 16;

/// A unit of work executed later on the loop thread.
pub type DeferredWork = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle through which collaborators schedule loop work.
pub type LoopHandle = Arc<DeferredQueue>;

// ── Mailbox ───────────────────────────────────────────────────

/// Bounded multi-producer mailbox with a single consumer.
///
/// Thin wrapper over an `embassy-sync` channel guarded by a critical
/// section, so `post` is safe from any task while the loop is taking.
pub struct Mailbox<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> Mailbox<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Append `item`; hands it back if the mailbox is full.
    pub fn post(&self, item: T) -> Result<(), T> {
        self.channel.try_send(item).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(item) => item,
        })
    }

    /// Remove the oldest item, if any.
    pub fn take(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for Mailbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ── DeferredQueue ─────────────────────────────────────────────

/// Bounded FIFO of closures, produced anywhere, consumed on the loop.
pub struct DeferredQueue<const N: usize = DEFERRED_QUEUE_CAPACITY> {
    items: Mailbox<DeferredWork, N>,
}

impl<const N: usize> DeferredQueue<N> {
    pub const fn new() -> Self {
        Self {
            items: Mailbox::new(),
        }
    }

    /// Schedule `work` for the next drain. Never blocks.
    ///
    /// Returns `false` if the queue is full; the work is dropped.
    pub fn enqueue(&self, work: impl FnOnce() + Send + 'static) -> bool {
        self.enqueue_boxed(Box::new(work))
    }

    pub fn enqueue_boxed(&self, work: DeferredWork) -> bool {
        match self.items.post(work) {
            Ok(()) => true,
            Err(_dropped) => {
                warn!("Deferred functions queue full");
                false
            }
        }
    }

    /// Run every pending item, oldest first. Loop thread only.
    ///
    /// Items posted while draining (by a running item or by another task)
    /// are picked up in the same pass. Returns the number of items run.
    pub fn drain_all(&self) -> usize {
        let mut ran = 0;
        // The channel lock is released before each item runs.
        while let Some(work) = self.items.take() {
            work();
            ran += 1;
        }
        ran
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for DeferredQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
