//! BLE controller bridge for ESP32 firmware.
//!
//! Exposes application components as GATT characteristics and carries
//! Bluedroid's connection, pairing and write callbacks back onto the
//! application's main loop. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; on other targets the
//! adapters fall back to host simulations.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bridge;
pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod registry;
pub mod scheduler;

pub use app::controller::{Controller, ControllerState, InstanceSlot};
pub use error::{Error, Result};
