//! Controller configuration parameters.
//!
//! All tunable parameters for the BLE controller. Values can be overridden
//! via NVS (see [`NvsAdapter`](crate::adapters::nvs::NvsAdapter)).

use serde::{Deserialize, Serialize};

use crate::app::mode::OperatingMode;
use crate::error::ConfigError;

/// Highest passkey a BLE pairing can display (six decimal digits).
pub const MAX_PASSKEY: u32 = 999_999;

/// Core controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Name used for the GAP device name and advertising.
    pub device_name: heapless::String<24>,

    // --- Security ---
    /// Enable bonding with MITM protection.
    pub security_enabled: bool,
    /// Passkey answered synchronously when the stack requests one.
    pub static_passkey: u32,

    // --- Connection ---
    /// Delay before advertising resumes after a disconnect (milliseconds).
    pub advertising_restart_delay_ms: u32,

    // --- Mode ---
    /// Mode used when nothing (or garbage) is persisted.
    pub default_mode: OperatingMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("blectl");
        Self {
            device_name,
            security_enabled: false,
            static_passkey: 123_456,
            advertising_restart_delay_ms: 500,
            default_mode: OperatingMode::BleOnly,
        }
    }
}

impl ControllerConfig {
    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::ValidationFailed("device_name must not be empty"));
        }
        if self.static_passkey > MAX_PASSKEY {
            return Err(ConfigError::ValidationFailed(
                "static_passkey must be 0–999999",
            ));
        }
        if !(50..=10_000).contains(&self.advertising_restart_delay_ms) {
            return Err(ConfigError::ValidationFailed(
                "advertising_restart_delay_ms must be 50–10000",
            ));
        }
        Ok(())
    }
}
