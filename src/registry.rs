//! Endpoint registry.
//!
//! Maps a component's object id to the GATT service/characteristic it should
//! be exposed on and, once the server exists, to the live handler that
//! pushes its state.
//!
//! Exposure is opt-in: a component without a registered descriptor is never
//! materialized, and publishing its state is a silent no-op.

use core::fmt;
use std::collections::HashMap;

use log::{debug, info, warn};

use crate::app::components::{ComponentId, ComponentKind};
use crate::app::ports::{CharacteristicHandle, ComponentRegistry, PeripheralStack};
use crate::error::RegistryError;
use crate::handlers::{EndpointHandler, HandlerFactory};

// ───────────────────────────────────────────────────────────────
// UUIDs
// ───────────────────────────────────────────────────────────────

/// A Bluetooth UUID in one of its three wire widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(u128),
}

impl BleUuid {
    /// Parse `"180f"`, `"0000180f"` or the canonical 36-character form.
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let hex_only = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());
        match s.len() {
            4 if hex_only(s) => u16::from_str_radix(s, 16)
                .map(Self::Uuid16)
                .map_err(|_| RegistryError::InvalidUuid),
            8 if hex_only(s) => u32::from_str_radix(s, 16)
                .map(Self::Uuid32)
                .map_err(|_| RegistryError::InvalidUuid),
            36 => {
                let mut groups: heapless::Vec<&str, 5> = heapless::Vec::new();
                for group in s.split('-') {
                    groups.push(group).map_err(|_| RegistryError::InvalidUuid)?;
                }
                Self::parse_canonical(&groups)
            }
            _ => Err(RegistryError::InvalidUuid),
        }
    }

    fn parse_canonical(groups: &[&str]) -> Result<Self, RegistryError> {
        const WIDTHS: [usize; 5] = [8, 4, 4, 4, 12];
        if groups.len() != WIDTHS.len() {
            return Err(RegistryError::InvalidUuid);
        }
        let mut value: u128 = 0;
        for (group, width) in groups.iter().zip(WIDTHS) {
            if group.len() != width || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(RegistryError::InvalidUuid);
            }
            let part = u64::from_str_radix(group, 16).map_err(|_| RegistryError::InvalidUuid)?;
            value = (value << (width * 4)) | part as u128;
        }
        Ok(Self::Uuid128(value))
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Uuid16(v) => write!(f, "{:04x}", v),
            Self::Uuid32(v) => write!(f, "{:08x}", v),
            Self::Uuid128(v) => write!(
                f,
                "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                v & 0xffff_ffff_ffff
            ),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Descriptor
// ───────────────────────────────────────────────────────────────

/// Where a component lives on the GATT server. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub service: BleUuid,
    pub characteristic: BleUuid,
    /// Add a CCCD so centrals can subscribe to notifications.
    pub notify: bool,
}

impl EndpointDescriptor {
    pub fn new(service: BleUuid, characteristic: BleUuid, notify: bool) -> Self {
        Self {
            service,
            characteristic,
            notify,
        }
    }

    /// Build a descriptor from UUID strings.
    pub fn parse(service: &str, characteristic: &str, notify: bool) -> Result<Self, RegistryError> {
        Ok(Self::new(
            BleUuid::parse(service)?,
            BleUuid::parse(characteristic)?,
            notify,
        ))
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EndpointRegistry {
    descriptors: HashMap<ComponentId, EndpointDescriptor>,
    handlers: HashMap<ComponentId, Box<dyn EndpointHandler>>,
    materialized: bool,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where `id` should be exposed. Last write wins until the
    /// endpoints are materialized; later registrations are ignored.
    pub fn register_descriptor(&mut self, id: ComponentId, descriptor: EndpointDescriptor) {
        if self.materialized {
            warn!(
                "Registry: descriptor for '{}' registered after setup, ignored until restart",
                id
            );
            return;
        }
        debug!(
            "Registry: '{}' -> service {} characteristic {}",
            id, descriptor.service, descriptor.characteristic
        );
        self.descriptors.insert(id, descriptor);
    }

    pub fn descriptor(&self, id: &ComponentId) -> Option<&EndpointDescriptor> {
        self.descriptors.get(id)
    }

    /// Build a live handler for every registered component. Runs once.
    ///
    /// Components without a descriptor are skipped. A handler whose
    /// characteristic cannot be created is dropped with a warning; the
    /// component then simply stays unexposed. Returns the number of live
    /// handlers.
    pub fn materialize(
        &mut self,
        components: &dyn ComponentRegistry,
        stack: &dyn PeripheralStack,
        factory: HandlerFactory,
    ) -> usize {
        if self.materialized {
            warn!("Registry: endpoints already materialized");
            return self.handlers.len();
        }
        self.materialized = true;

        for kind in ComponentKind::ALL {
            for info in components.components(kind) {
                let Some(descriptor) = self.descriptors.get(&info.id) else {
                    continue;
                };
                match factory(&info, descriptor, stack) {
                    Ok(handler) => {
                        info!(
                            "Registry: exposing {:?} '{}' on {}",
                            kind, info.id, descriptor.characteristic
                        );
                        self.handlers.insert(info.id.clone(), handler);
                    }
                    Err(e) => {
                        warn!("Registry: cannot expose '{}': {}", info.id, e);
                    }
                }
            }
        }
        self.handlers.len()
    }

    pub fn handler(&self, id: &ComponentId) -> Option<&dyn EndpointHandler> {
        self.handlers.get(id).map(|h| h.as_ref())
    }

    /// Find the handler that owns a characteristic handle.
    pub fn handler_by_handle(&self, handle: CharacteristicHandle) -> Option<&dyn EndpointHandler> {
        self.handlers
            .values()
            .find(|h| h.handle() == handle)
            .map(|h| h.as_ref())
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }
}
