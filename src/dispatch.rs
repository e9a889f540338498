//! Handler dispatch.
//!
//! Outbound: a component's new state is forwarded to its live handler.
//! Inbound: a characteristic write is resolved to the owning component and
//! decoded into a command. Both directions are silent no-ops for components
//! that are not exposed; most components intentionally are not.

use log::debug;

use crate::app::components::{ComponentCommand, ComponentId, StateValue};
use crate::app::ports::{CharacteristicHandle, PeripheralStack};
use crate::registry::EndpointRegistry;

/// Forward `value` to the handler registered for `id`.
///
/// Returns `true` if a handler accepted the value.
pub fn publish(
    registry: &EndpointRegistry,
    stack: &dyn PeripheralStack,
    id: &ComponentId,
    value: &StateValue,
) -> bool {
    match registry.handler(id) {
        Some(handler) => handler.send_value(stack, value),
        None => false,
    }
}

/// Resolve a write on `handle` to the component command it encodes.
pub fn route_write(
    registry: &EndpointRegistry,
    handle: CharacteristicHandle,
    data: &[u8],
) -> Option<(ComponentId, ComponentCommand)> {
    let Some(handler) = registry.handler_by_handle(handle) else {
        debug!("BLE: write to unknown handle {}", handle.0);
        return None;
    };
    let command = handler.decode_write(data)?;
    Some((handler.component().clone(), command))
}
