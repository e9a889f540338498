//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements               | Connects to                |
//! |-------------|--------------------------|----------------------------|
//! | `bluedroid` | PeripheralStack          | Bluedroid GAP/GATTS        |
//! | `nvs`       | ConfigPort, StoragePort  | NVS / in-memory store      |
//! | `system`    | SystemPort               | `esp_restart`              |
//! | `time`      | (loop clock)             | ESP32 high-resolution timer|
//!
//! The scheduler (`TimerPort`) lives in [`crate::scheduler`].

pub mod bluedroid;
pub mod nvs;
pub mod system;
pub mod time;
