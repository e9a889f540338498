//! Unified error types for the BLE controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! controller's setup and command paths uniform. All variants are `Copy`
//! so they can be logged and returned from stack-facing code without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible controller operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The radio controller or the BLE host stack failed.
    Stack(StackError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Endpoint registration was rejected.
    Registry(RegistryError),
    /// A mode value outside the supported range was requested.
    UnsupportedMode(u8),
    /// A controller instance already exists in this process.
    DuplicateInstance,
    /// The operation is not valid in the controller's current state.
    InvalidState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack(e) => write!(f, "stack: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::UnsupportedMode(m) => write!(f, "unsupported BLE mode {m}"),
            Self::DuplicateInstance => write!(f, "controller instance already registered"),
            Self::InvalidState => write!(f, "invalid controller state"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Stack errors
// ---------------------------------------------------------------------------

/// Failures reported by the peripheral stack. Raw ESP-IDF status codes are
/// carried where the platform provides one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// `esp_bt_controller_init` / `esp_bt_controller_enable` failed.
    ControllerStart(i32),
    /// `esp_bluedroid_init` failed.
    HostInit(i32),
    /// `esp_bluedroid_enable` failed.
    HostEnable(i32),
    /// The GATT server could not be created.
    ServerCreate,
    /// A characteristic could not be added to its service.
    CharacteristicCreate,
    /// Too many services or characteristics for the attribute table.
    AttributeTableFull,
    /// Security parameters were rejected.
    Security(i32),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControllerStart(rc) => write!(f, "BT controller start failed ({rc})"),
            Self::HostInit(rc) => write!(f, "bluedroid init failed ({rc})"),
            Self::HostEnable(rc) => write!(f, "bluedroid enable failed ({rc})"),
            Self::ServerCreate => write!(f, "GATT server creation failed"),
            Self::CharacteristicCreate => write!(f, "characteristic creation failed"),
            Self::AttributeTableFull => write!(f, "attribute table full"),
            Self::Security(rc) => write!(f, "security configuration failed ({rc})"),
        }
    }
}

impl core::error::Error for StackError {}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Self::Stack(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from [`StoragePort`](crate::app::ports::StoragePort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for StorageError {}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors from [`ConfigPort`](crate::app::ports::ConfigPort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Component object id is empty or longer than the key capacity.
    InvalidIdentifier,
    /// A UUID string is malformed.
    InvalidUuid,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIdentifier => write!(f, "invalid component identifier"),
            Self::InvalidUuid => write!(f, "malformed UUID"),
        }
    }
}

impl core::error::Error for RegistryError {}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
