//! One-shot timeout scheduler.
//!
//! Backs [`TimerPort`]: work that must happen "later" on the loop thread
//! (advertising restart after a disconnect) is registered under a label
//! and fires once its delay has elapsed. The main loop advances time with
//! [`Scheduler::tick`].
//!
//! ```text
//! ┌──────────────────┐   set_timeout(label, ms)   ┌────────────────────┐
//! │ Deferred work    │──────────────────────────▶│ Scheduler slots    │
//! │ (loop thread)    │                            │ [label, remaining] │
//! └──────────────────┘                            └─────────┬──────────┘
//!                                                           │ tick(elapsed)
//!                                                           ▼
//!                                                  expired actions run,
//!                                                  oldest slot first
//! ```

use std::sync::Mutex;

use log::{debug, warn};

use crate::app::ports::TimerPort;

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of pending timeouts.
pub const MAX_TIMEOUTS: usize = 8;

type TimeoutAction = Box<dyn FnOnce() + Send>;

/// Internal bookkeeping for a pending timeout.
struct TimeoutEntry {
    label: &'static str,
    remaining_ms: u32,
    action: TimeoutAction,
}

pub struct Scheduler {
    slots: Mutex<heapless::Vec<TimeoutEntry, MAX_TIMEOUTS>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(heapless::Vec::new()),
        }
    }

    /// Advance time by `elapsed_ms` and run every expired action.
    ///
    /// Actions run after the slot lock is released, so an action may
    /// register a new timeout. Returns the number of actions run.
    pub fn tick(&self, elapsed_ms: u32) -> usize {
        let mut expired: heapless::Vec<TimeoutAction, MAX_TIMEOUTS> = heapless::Vec::new();
        {
            let Ok(mut slots) = self.slots.lock() else {
                return 0;
            };
            let mut i = 0;
            while i < slots.len() {
                let entry = &mut slots[i];
                entry.remaining_ms = entry.remaining_ms.saturating_sub(elapsed_ms);
                if entry.remaining_ms == 0 {
                    // `remove` keeps registration order for the slots that stay.
                    let entry = slots.remove(i);
                    debug!("Scheduler: '{}' fired", entry.label);
                    // At most MAX_TIMEOUTS entries can expire in one pass.
                    let _ = expired.push(entry.action);
                } else {
                    i += 1;
                }
            }
        }
        let ran = expired.len();
        for action in expired {
            action();
        }
        ran
    }

    /// Drop a pending timeout without running it.
    pub fn cancel(&self, label: &str) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        match slots.iter().position(|e| e.label == label) {
            Some(i) => {
                slots.remove(i);
                true
            }
            None => false,
        }
    }

    /// Number of pending timeouts.
    pub fn pending(&self) -> usize {
        self.slots.lock().map_or(0, |s| s.len())
    }

    pub fn is_pending(&self, label: &str) -> bool {
        self.slots
            .lock()
            .map_or(false, |s| s.iter().any(|e| e.label == label))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPort for Scheduler {
    fn set_timeout(&self, label: &'static str, delay_ms: u32, action: Box<dyn FnOnce() + Send>) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        // A zero delay still waits for the next tick.
        let entry = TimeoutEntry {
            label,
            remaining_ms: delay_ms.max(1),
            action,
        };
        if let Some(existing) = slots.iter_mut().find(|e| e.label == label) {
            debug!("Scheduler: '{}' rescheduled ({} ms)", label, delay_ms);
            *existing = entry;
            return;
        }
        if slots.push(entry).is_err() {
            warn!("Scheduler: no free slot, dropping '{}'", label);
        } else {
            debug!("Scheduler: '{}' armed ({} ms)", label, delay_ms);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
