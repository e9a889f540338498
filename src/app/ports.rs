//! Port traits — the hexagonal boundary between the controller core and the
//! outside world.
//!
//! ```text
//!   Bluedroid ──▶ *Callbacks ──▶ bridges ──▶ DeferredQueue ──▶ Controller
//!   Controller ──▶ PeripheralStack / StoragePort / SystemPort / TimerPort
//! ```
//!
//! Driven adapters (BLE stack, NVS, restart, scheduler) implement these
//! traits; the application supplies [`ComponentRegistry`] and
//! [`ComponentPort`]. The controller never touches ESP-IDF directly.
//!
//! ## Threading
//!
//! The three `*Callbacks` traits are invoked from the stack's task. Their
//! implementations must return promptly and must not block; everything
//! else in this module is called from the loop thread only.

use std::sync::Arc;

use super::components::{ComponentCommand, ComponentId, ComponentInfo, ComponentKind};
use crate::error::{ConfigError, StackError, StorageError};
use crate::config::ControllerConfig;
use crate::registry::EndpointDescriptor;

// ───────────────────────────────────────────────────────────────
// Peripheral stack (driven adapter: controller ↔ BLE host)
// ───────────────────────────────────────────────────────────────

/// Attribute handle of a live characteristic, as assigned by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle(pub u16);

/// GATT properties requested for a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// Bluetooth device address, most significant byte first.
pub type BdAddr = [u8; 6];

/// Link encryption required for protected attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionLevel {
    Encrypt,
    EncryptNoMitm,
    EncryptMitm,
}

/// IO capability advertised during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = 0x00,
    DisplayYesNo = 0x01,
    KeyboardOnly = 0x02,
    NoInputNoOutput = 0x03,
    KeyboardDisplay = 0x04,
}

/// Key distribution bit: encryption key (LTK).
pub const KEY_MASK_ENC: u8 = 0b0000_0001;
/// Key distribution bit: identity key (IRK).
pub const KEY_MASK_ID: u8 = 0b0000_0010;

/// Security manager parameters applied during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityParams {
    pub encryption: EncryptionLevel,
    pub secure_connections: bool,
    pub mitm: bool,
    pub bonding: bool,
    pub io_capability: IoCapability,
    pub init_key_mask: u8,
    pub resp_key_mask: u8,
    pub key_size: u8,
    /// Reject peers that cannot meet the requested authentication.
    pub only_accept_specified_auth: bool,
}

impl Default for SecurityParams {
    /// Secure Connections + MITM + bonding with a display-only passkey.
    fn default() -> Self {
        Self {
            encryption: EncryptionLevel::EncryptMitm,
            secure_connections: true,
            mitm: true,
            bonding: true,
            io_capability: IoCapability::DisplayOnly,
            init_key_mask: KEY_MASK_ENC | KEY_MASK_ID,
            resp_key_mask: KEY_MASK_ENC | KEY_MASK_ID,
            key_size: 16,
            only_accept_specified_auth: true,
        }
    }
}

/// The BLE peripheral stack as seen by the controller.
///
/// All methods take `&self`: the stack is shared with the connection bridge,
/// which restarts advertising from a scheduler action.
pub trait PeripheralStack: Send + Sync {
    /// Whether the radio controller and host are already running.
    fn is_radio_started(&self) -> bool;

    /// Bring up the radio controller and the BLE host.
    fn start_radio(&self) -> Result<(), StackError>;

    /// Initialise the GAP device with its advertised name.
    fn init_device(&self, device_name: &str) -> Result<(), StackError>;

    /// Create the GATT server and register connection and write callbacks.
    fn create_server(
        &self,
        server_callbacks: Arc<dyn ServerCallbacks>,
        write_callbacks: Arc<dyn CharacteristicCallbacks>,
    ) -> Result<(), StackError>;

    /// Add a characteristic (creating its service on first use).
    fn create_characteristic(
        &self,
        descriptor: &EndpointDescriptor,
        properties: CharacteristicProperties,
    ) -> Result<CharacteristicHandle, StackError>;

    /// Replace the characteristic value.
    fn set_value(&self, handle: CharacteristicHandle, value: &[u8]);

    /// Notify subscribed centrals of the current value.
    fn notify(&self, handle: CharacteristicHandle);

    /// Apply security parameters and register security callbacks.
    fn configure_security(
        &self,
        params: &SecurityParams,
        callbacks: Arc<dyn SecurityCallbacks>,
    ) -> Result<(), StackError>;

    fn start_advertising(&self);

    /// Addresses of bonded centrals.
    fn bonded_devices(&self) -> Vec<BdAddr>;
}

/// Connection lifecycle, invoked from the stack's task.
pub trait ServerCallbacks: Send + Sync {
    fn on_connect(&self);
    fn on_disconnect(&self);
}

/// Pairing lifecycle, invoked from the stack's task.
pub trait SecurityCallbacks: Send + Sync {
    /// Passkey the stack should use; answered synchronously.
    fn on_passkey_request(&self) -> u32;
    fn on_passkey_notify(&self, passkey: u32);
    fn on_security_request(&self) -> bool;
    fn on_confirm_pin(&self, pin: u32) -> bool;
    fn on_authentication_complete(&self, success: bool);
}

/// Characteristic writes, invoked from the stack's task.
pub trait CharacteristicCallbacks: Send + Sync {
    fn on_write(&self, handle: CharacteristicHandle, data: &[u8]);
}

// ───────────────────────────────────────────────────────────────
// Application components (driving side)
// ───────────────────────────────────────────────────────────────

/// The application's component collections, queried once during setup.
pub trait ComponentRegistry {
    fn components(&self, kind: ComponentKind) -> Vec<ComponentInfo>;
}

/// Applies commands decoded from endpoint writes to the application.
pub trait ComponentPort {
    fn apply(&mut self, id: &ComponentId, command: ComponentCommand);
}

// ───────────────────────────────────────────────────────────────
// System services
// ───────────────────────────────────────────────────────────────

/// Device-level actions.
pub trait SystemPort: Send + Sync {
    /// Restart the device. On hardware this does not return.
    fn restart(&self);
}

/// The application's delayed-execution facility.
pub trait TimerPort: Send + Sync {
    /// Run `action` on the loop thread once `delay_ms` has elapsed.
    /// A pending timeout with the same `label` is replaced.
    fn set_timeout(&self, label: &'static str, delay_ms: u32, action: Box<dyn FnOnce() + Send>);
}

// ───────────────────────────────────────────────────────────────
// Persistence
// ───────────────────────────────────────────────────────────────

/// Loads and persists controller configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// ranges with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort {
    /// Returns [`ControllerConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<ControllerConfig, ConfigError>;

    fn save(&self, config: &ControllerConfig) -> Result<(), ConfigError>;
}

/// Persistent key-value storage (NVS on hardware).
///
/// Write operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Format a device address as `aa:bb:cc:dd:ee:ff`.
pub fn format_bd_addr(addr: &BdAddr) -> heapless::String<17> {
    use core::fmt::Write;
    let mut s = heapless::String::new();
    for (i, b) in addr.iter().enumerate() {
        if i > 0 {
            let _ = s.push(':');
        }
        let _ = write!(s, "{:02x}", b);
    }
    s
}
