//! Persisted operating mode.
//!
//! The mode selects which subsystems the radio serves. It is read once at
//! startup and only ever changed by persisting a new value and restarting;
//! a running controller never switches mode live.

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::ports::StoragePort;
use crate::error::StorageError;

const MODE_NAMESPACE: &str = "blectl";
const MODE_KEY: &str = "ble_mode";

/// Which subsystems are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatingMode {
    /// Components are exposed over BLE; WiFi stays off.
    BleOnly = 0,
    /// Components are exposed over BLE and WiFi runs alongside.
    Dual = 1,
    /// WiFi only; BLE serves the maintenance service and nothing else.
    WifiOnly = 2,
}

impl OperatingMode {
    /// Highest raw value accepted by [`from_u8`](Self::from_u8).
    pub const MAX_RAW: u8 = OperatingMode::WifiOnly as u8;

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::BleOnly),
            1 => Some(Self::Dual),
            2 => Some(Self::WifiOnly),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether component endpoints are materialized in this mode.
    pub const fn exposes_endpoints(self) -> bool {
        !matches!(self, Self::WifiOnly)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BleOnly => write!(f, "BLE only"),
            Self::Dual => write!(f, "BLE + WiFi"),
            Self::WifiOnly => write!(f, "WiFi only"),
        }
    }
}

/// Reads and writes the single mode byte.
pub struct ModeStore;

impl ModeStore {
    /// Load the persisted mode, falling back to `default` when nothing valid
    /// is stored.
    pub fn load(storage: &impl StoragePort, default: OperatingMode) -> OperatingMode {
        let mut buf = [0u8; 1];
        match storage.read(MODE_NAMESPACE, MODE_KEY, &mut buf) {
            Ok(1) => match OperatingMode::from_u8(buf[0]) {
                Some(mode) => mode,
                None => {
                    warn!("Stored BLE mode {} is unsupported, using {}", buf[0], default);
                    default
                }
            },
            Ok(n) => {
                warn!("Stored BLE mode has unexpected length {}, using {}", n, default);
                default
            }
            Err(StorageError::NotFound) => {
                info!("No stored BLE mode, using {}", default);
                default
            }
            Err(e) => {
                warn!("BLE mode load failed ({}), using {}", e, default);
                default
            }
        }
    }

    pub fn save(storage: &mut impl StoragePort, mode: OperatingMode) -> Result<(), StorageError> {
        storage.write(MODE_NAMESPACE, MODE_KEY, &[mode.as_u8()])
    }
}
