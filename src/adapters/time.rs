//! Monotonic clock adapter.
//!
//! Feeds elapsed time to the scheduler from the main loop.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic).
//! - **`not(target_os = "espidf")`** — uses `std::time::Instant` for
//!   host-side testing and simulation.

pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    last_ms: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        let mut clock = Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            last_ms: 0,
        };
        clock.last_ms = clock.uptime_ms();
        clock
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since the clock was created (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Milliseconds since the previous call, saturated to `u32`.
    pub fn elapsed_ms(&mut self) -> u32 {
        let now = self.uptime_ms();
        let elapsed = now.saturating_sub(self.last_ms);
        self.last_ms = now;
        elapsed.min(u32::MAX as u64) as u32
    }
}
