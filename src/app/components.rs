//! Application component vocabulary.
//!
//! Components themselves (sensors, switches, …) live in the application;
//! the controller only knows their stable object id, their kind, and the
//! values flowing to and from them.

use core::fmt;

use crate::error::RegistryError;

/// Maximum length of a component object id.
pub const MAX_COMPONENT_ID_LEN: usize = 48;

/// Stable key joining an application component to its endpoint metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(heapless::String<MAX_COMPONENT_ID_LEN>);

impl ComponentId {
    pub fn new(object_id: &str) -> Result<Self, RegistryError> {
        if object_id.is_empty() {
            return Err(RegistryError::InvalidIdentifier);
        }
        let mut id = heapless::String::new();
        id.push_str(object_id)
            .map_err(|_| RegistryError::InvalidIdentifier)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<&str> for ComponentId {
    type Error = RegistryError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component kinds that can be exposed as endpoints, in setup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    BinarySensor,
    Sensor,
    Switch,
    TextSensor,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::BinarySensor,
        ComponentKind::Sensor,
        ComponentKind::Switch,
        ComponentKind::TextSensor,
    ];
}

/// Most decimal places a sensor value is rendered with.
pub const MAX_ACCURACY_DECIMALS: u8 = 8;

/// What the application registry reports about one component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub kind: ComponentKind,
    /// Decimal places used when rendering a sensor value.
    pub accuracy_decimals: u8,
}

impl ComponentInfo {
    pub fn new(id: ComponentId, kind: ComponentKind) -> Self {
        Self {
            id,
            kind,
            accuracy_decimals: 2,
        }
    }

    /// Clamped to [`MAX_ACCURACY_DECIMALS`].
    pub fn with_accuracy(mut self, decimals: u8) -> Self {
        self.accuracy_decimals = decimals.min(MAX_ACCURACY_DECIMALS);
        self
    }
}

/// A component state as published by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Bool(bool),
    Float(f32),
    Text(String),
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for StateValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A command decoded from an endpoint write, addressed to one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCommand {
    TurnOn,
    TurnOff,
    Toggle,
}
