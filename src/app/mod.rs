//! Application core — controller logic, zero I/O.
//!
//! The controller, its observer lists, the component vocabulary and the
//! persisted operating mode. All interaction with the BLE stack, storage and
//! the device happens through **port traits** defined in [`ports`], keeping
//! this layer fully testable without a radio.

pub mod callbacks;
pub mod components;
pub mod controller;
pub mod mode;
pub mod ports;
