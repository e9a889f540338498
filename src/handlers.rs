//! Per-kind endpoint handlers.
//!
//! The registry stores handlers type-erased as `Box<dyn EndpointHandler>`;
//! only the handler knows how its component's state is rendered onto the
//! characteristic and, for writable kinds, how a write is decoded.
//!
//! Values are rendered as UTF-8 text:
//!
//! | Kind          | Value                 | Writable                   |
//! |---------------|-----------------------|----------------------------|
//! | binary sensor | `ON` / `OFF`          | no                         |
//! | sensor        | decimal, fixed places | no                         |
//! | switch        | `ON` / `OFF`          | `on`/`off`/`1`/`0`/`toggle`|
//! | text sensor   | text as-is            | no                         |

use core::fmt::Write;

use log::warn;

use crate::app::components::{
    ComponentCommand, ComponentId, ComponentInfo, ComponentKind, StateValue, MAX_ACCURACY_DECIMALS,
};
use crate::app::ports::{CharacteristicHandle, CharacteristicProperties, PeripheralStack};
use crate::error::StackError;
use crate::registry::EndpointDescriptor;

/// Worst-case rendered sensor value: sign, the 39 integer digits of
/// `f32::MAX`, the point and the decimals.
const SENSOR_TEXT_LEN: usize = 1 + 39 + 1 + MAX_ACCURACY_DECIMALS as usize;

/// Largest attribute value the stack accepts.
pub const MAX_VALUE_LEN: usize = 512;

/// Builds the handler for one component.
pub type HandlerFactory = fn(
    &ComponentInfo,
    &EndpointDescriptor,
    &dyn PeripheralStack,
) -> Result<Box<dyn EndpointHandler>, StackError>;

/// A live endpoint bound to one component.
pub trait EndpointHandler: Send {
    fn component(&self) -> &ComponentId;

    fn kind(&self) -> ComponentKind;

    fn descriptor(&self) -> &EndpointDescriptor;

    fn handle(&self) -> CharacteristicHandle;

    /// Render `value` onto the characteristic. Returns `false` if the value
    /// does not match this handler's kind.
    fn send_value(&self, stack: &dyn PeripheralStack, value: &StateValue) -> bool;

    /// Decode a central's write into a command. Read-only kinds ignore writes.
    fn decode_write(&self, data: &[u8]) -> Option<ComponentCommand> {
        let _ = data;
        warn!("BLE: ignoring write to read-only '{}'", self.component());
        None
    }
}

/// Default factory: picks the handler from the component's declared kind and
/// creates its characteristic.
pub fn create_handler(
    info: &ComponentInfo,
    descriptor: &EndpointDescriptor,
    stack: &dyn PeripheralStack,
) -> Result<Box<dyn EndpointHandler>, StackError> {
    let properties = CharacteristicProperties {
        read: true,
        write: info.kind == ComponentKind::Switch,
        notify: descriptor.notify,
    };
    let handle = stack.create_characteristic(descriptor, properties)?;
    let endpoint = Endpoint {
        component: info.id.clone(),
        descriptor: *descriptor,
        handle,
    };
    Ok(match info.kind {
        ComponentKind::BinarySensor => Box::new(BinarySensorHandler(endpoint)),
        ComponentKind::Sensor => Box::new(SensorHandler {
            endpoint,
            accuracy_decimals: info.accuracy_decimals.min(MAX_ACCURACY_DECIMALS),
        }),
        ComponentKind::Switch => Box::new(SwitchHandler(endpoint)),
        ComponentKind::TextSensor => Box::new(TextSensorHandler(endpoint)),
    })
}

// ───────────────────────────────────────────────────────────────
// Shared endpoint plumbing
// ───────────────────────────────────────────────────────────────

struct Endpoint {
    component: ComponentId,
    descriptor: EndpointDescriptor,
    handle: CharacteristicHandle,
}

impl Endpoint {
    fn push(&self, stack: &dyn PeripheralStack, payload: &[u8]) {
        stack.set_value(self.handle, payload);
        if self.descriptor.notify {
            stack.notify(self.handle);
        }
    }

    fn mismatch(&self, expected: &str, value: &StateValue) -> bool {
        warn!(
            "BLE: '{}' expects a {} state, got {:?}",
            self.component, expected, value
        );
        false
    }
}

fn on_off(state: bool) -> &'static [u8] {
    if state { b"ON" } else { b"OFF" }
}

/// Truncate to `MAX_VALUE_LEN` bytes on a char boundary.
pub(crate) fn clip(text: &str) -> &str {
    if text.len() <= MAX_VALUE_LEN {
        return text;
    }
    let mut end = MAX_VALUE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    warn!("BLE: text value truncated ({} > {})", text.len(), MAX_VALUE_LEN);
    &text[..end]
}

// ───────────────────────────────────────────────────────────────
// Handlers
// ───────────────────────────────────────────────────────────────

struct BinarySensorHandler(Endpoint);

impl EndpointHandler for BinarySensorHandler {
    fn component(&self) -> &ComponentId {
        &self.0.component
    }
    fn kind(&self) -> ComponentKind {
        ComponentKind::BinarySensor
    }
    fn descriptor(&self) -> &EndpointDescriptor {
        &self.0.descriptor
    }
    fn handle(&self) -> CharacteristicHandle {
        self.0.handle
    }
    fn send_value(&self, stack: &dyn PeripheralStack, value: &StateValue) -> bool {
        match value {
            StateValue::Bool(state) => {
                self.0.push(stack, on_off(*state));
                true
            }
            other => self.0.mismatch("boolean", other),
        }
    }
}

struct SensorHandler {
    endpoint: Endpoint,
    accuracy_decimals: u8,
}

impl EndpointHandler for SensorHandler {
    fn component(&self) -> &ComponentId {
        &self.endpoint.component
    }
    fn kind(&self) -> ComponentKind {
        ComponentKind::Sensor
    }
    fn descriptor(&self) -> &EndpointDescriptor {
        &self.endpoint.descriptor
    }
    fn handle(&self) -> CharacteristicHandle {
        self.endpoint.handle
    }
    fn send_value(&self, stack: &dyn PeripheralStack, value: &StateValue) -> bool {
        match value {
            StateValue::Float(state) => {
                let mut text: heapless::String<SENSOR_TEXT_LEN> = heapless::String::new();
                if write!(text, "{:.*}", self.accuracy_decimals as usize, state).is_err() {
                    warn!("BLE: '{}' value {} does not fit", self.endpoint.component, state);
                    return false;
                }
                self.endpoint.push(stack, text.as_bytes());
                true
            }
            other => self.endpoint.mismatch("float", other),
        }
    }
}

struct SwitchHandler(Endpoint);

impl EndpointHandler for SwitchHandler {
    fn component(&self) -> &ComponentId {
        &self.0.component
    }
    fn kind(&self) -> ComponentKind {
        ComponentKind::Switch
    }
    fn descriptor(&self) -> &EndpointDescriptor {
        &self.0.descriptor
    }
    fn handle(&self) -> CharacteristicHandle {
        self.0.handle
    }
    fn send_value(&self, stack: &dyn PeripheralStack, value: &StateValue) -> bool {
        match value {
            StateValue::Bool(state) => {
                self.0.push(stack, on_off(*state));
                true
            }
            other => self.0.mismatch("boolean", other),
        }
    }
    fn decode_write(&self, data: &[u8]) -> Option<ComponentCommand> {
        let Ok(text) = core::str::from_utf8(data) else {
            warn!("BLE: switch '{}' write is not UTF-8", self.0.component);
            return None;
        };
        let text = text.trim();
        if ["on", "1", "true"].iter().any(|t| text.eq_ignore_ascii_case(t)) {
            Some(ComponentCommand::TurnOn)
        } else if ["off", "0", "false"].iter().any(|t| text.eq_ignore_ascii_case(t)) {
            Some(ComponentCommand::TurnOff)
        } else if text.eq_ignore_ascii_case("toggle") {
            Some(ComponentCommand::Toggle)
        } else {
            warn!("BLE: switch '{}' got unknown command '{}'", self.0.component, text);
            None
        }
    }
}

struct TextSensorHandler(Endpoint);

impl EndpointHandler for TextSensorHandler {
    fn component(&self) -> &ComponentId {
        &self.0.component
    }
    fn kind(&self) -> ComponentKind {
        ComponentKind::TextSensor
    }
    fn descriptor(&self) -> &EndpointDescriptor {
        &self.0.descriptor
    }
    fn handle(&self) -> CharacteristicHandle {
        self.0.handle
    }
    fn send_value(&self, stack: &dyn PeripheralStack, value: &StateValue) -> bool {
        match value {
            StateValue::Text(state) => {
                self.0.push(stack, clip(state).as_bytes());
                true
            }
            other => self.0.mismatch("text", other),
        }
    }
}
