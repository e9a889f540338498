//! Device restart adapter.
//!
//! - **`target_os = "espidf"`**: `esp_restart()`; never returns.
//! - **all other targets**: counts restart requests so tests can assert
//!   that a mode change restarted exactly once.

use core::sync::atomic::{AtomicUsize, Ordering};

use log::warn;

use crate::app::ports::SystemPort;

#[derive(Default)]
pub struct EspSystem {
    restarts: AtomicUsize,
}

impl EspSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart requests seen so far (always 0 on target: the first one
    /// does not return).
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl SystemPort for EspSystem {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        warn!("System: restarting");

        #[cfg(target_os = "espidf")]
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn simulated_restart_is_counted() {
        let system = EspSystem::new();
        assert_eq!(system.restart_count(), 0);
        system.restart();
        assert_eq!(system.restart_count(), 1);
    }
}
