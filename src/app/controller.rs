//! BLE controller — owns the bridges, the registry and the operating mode,
//! and orchestrates setup.
//!
//! ```text
//!  Uninitialized ─▶ ModeLoaded ─▶ RadioStarted ─▶ ServerCreated
//!        ─▶ EndpointsMaterialized ─▶ SecurityConfigured ─▶ Advertising
//!
//!  any stack failure ─▶ Failed (terminal, no retry)
//! ```
//!
//! The controller is driven from the main loop only: [`Controller::poll`]
//! drains the deferred queue and routes inbound writes, and every public
//! method assumes the loop thread. Stack callbacks reach it exclusively
//! through the bridges and the queue.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::callbacks::CallbackList;
use super::components::{ComponentId, StateValue};
use super::mode::{ModeStore, OperatingMode};
use super::ports::{
    format_bd_addr, ComponentPort, ComponentRegistry, PeripheralStack, SecurityParams, StoragePort,
    SystemPort, TimerPort,
};
use crate::bridge::{ConnectionBridge, InboundWrites, SecurityBridge};
use crate::config::ControllerConfig;
use crate::deferred::{DeferredQueue, LoopHandle};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::handlers::create_handler;
use crate::maintenance::{CommandReply, MaintenanceAction, MaintenanceHandler};
use crate::registry::{EndpointDescriptor, EndpointRegistry};

// ───────────────────────────────────────────────────────────────
// Single-instance registration
// ───────────────────────────────────────────────────────────────

/// Registration point allowing at most one live controller.
pub struct InstanceSlot {
    claimed: AtomicBool,
}

impl InstanceSlot {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    fn claim(&'static self) -> Option<InstanceGuard> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InstanceGuard(self))
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl Default for InstanceSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the slot when the controller is dropped.
struct InstanceGuard(&'static InstanceSlot);

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.0.claimed.store(false, Ordering::Release);
    }
}

static CONTROLLER_SLOT: InstanceSlot = InstanceSlot::new();

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    ModeLoaded,
    RadioStarted,
    ServerCreated,
    EndpointsMaterialized,
    SecurityConfigured,
    Advertising,
    Failed,
}

pub struct Controller<S: StoragePort> {
    _instance: InstanceGuard,
    config: ControllerConfig,
    state: ControllerState,
    mode: OperatingMode,
    storage: S,
    stack: Arc<dyn PeripheralStack>,
    timers: Arc<dyn TimerPort>,
    system: Arc<dyn SystemPort>,
    queue: LoopHandle,
    writes: Arc<InboundWrites>,
    registry: EndpointRegistry,
    maintenance: MaintenanceHandler,
    show_passkey: Arc<CallbackList<str>>,
    authentication_complete: Arc<CallbackList<bool>>,
    connected: Arc<CallbackList<()>>,
    disconnected: Arc<CallbackList<()>>,
}

impl<S: StoragePort> Controller<S> {
    /// Create the process-wide controller.
    ///
    /// A second construction while the first is alive is refused with
    /// [`Error::DuplicateInstance`]; the first stays authoritative.
    pub fn new(
        config: ControllerConfig,
        storage: S,
        stack: Arc<dyn PeripheralStack>,
        timers: Arc<dyn TimerPort>,
        system: Arc<dyn SystemPort>,
    ) -> Result<Self> {
        Self::new_in(&CONTROLLER_SLOT, config, storage, stack, timers, system)
    }

    /// Like [`new`](Self::new), registering in `slot` instead of the
    /// process-wide one.
    pub fn new_in(
        slot: &'static InstanceSlot,
        config: ControllerConfig,
        storage: S,
        stack: Arc<dyn PeripheralStack>,
        timers: Arc<dyn TimerPort>,
        system: Arc<dyn SystemPort>,
    ) -> Result<Self> {
        config.validate()?;
        let Some(instance) = slot.claim() else {
            error!("Controller: already initialised, refusing a second instance");
            return Err(Error::DuplicateInstance);
        };
        let mode = config.default_mode;
        Ok(Self {
            _instance: instance,
            config,
            state: ControllerState::Uninitialized,
            mode,
            storage,
            stack,
            timers,
            system,
            queue: Arc::new(DeferredQueue::new()),
            writes: Arc::new(InboundWrites::new()),
            registry: EndpointRegistry::new(),
            maintenance: MaintenanceHandler::new(),
            show_passkey: Arc::new(CallbackList::new()),
            authentication_complete: Arc::new(CallbackList::new()),
            connected: Arc::new(CallbackList::new()),
            disconnected: Arc::new(CallbackList::new()),
        })
    }

    // ── Registration (before setup) ───────────────────────────

    /// Expose `id` on `descriptor`. Last registration wins.
    pub fn register_endpoint(&mut self, id: ComponentId, descriptor: EndpointDescriptor) {
        self.registry.register_descriptor(id, descriptor);
    }

    /// Expose the component with `object_id` on the given service and
    /// characteristic UUIDs.
    pub fn register_component(
        &mut self,
        object_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        notify: bool,
    ) -> Result<()> {
        let id = ComponentId::new(object_id)?;
        let descriptor = EndpointDescriptor::parse(service_uuid, characteristic_uuid, notify)?;
        self.register_endpoint(id, descriptor);
        Ok(())
    }

    /// Add a maintenance command; `trigger` runs on the loop thread with
    /// the command's arguments and may set the command result.
    pub fn register_command(
        &mut self,
        name: &str,
        description: &str,
        trigger: impl Fn(&[&str], &mut CommandReply) + Send + 'static,
    ) -> bool {
        self.maintenance.add_command(name, description, Box::new(trigger))
    }

    pub fn commands(&self) -> impl Iterator<Item = (&str, &str)> {
        self.maintenance.commands()
    }

    pub fn add_on_show_passkey(&self, observer: impl Fn(&str) + Send + 'static) {
        self.show_passkey.add(observer);
    }

    pub fn add_on_authentication_complete(&self, observer: impl Fn(bool) + Send + 'static) {
        self.authentication_complete.add(move |success: &bool| observer(*success));
    }

    pub fn add_on_connected(&self, observer: impl Fn() + Send + 'static) {
        self.connected.add(move |_: &()| observer());
    }

    pub fn add_on_disconnected(&self, observer: impl Fn() + Send + 'static) {
        self.disconnected.add(move |_: &()| observer());
    }

    /// Only honoured before setup; security is configured once.
    pub fn set_security_enabled(&mut self, enabled: bool) {
        if self.state != ControllerState::Uninitialized {
            warn!("Controller: security setting changed after setup, ignored");
            return;
        }
        self.config.security_enabled = enabled;
    }

    // ── Setup ─────────────────────────────────────────────────

    /// Bring the BLE side up. Runs once; any stack failure leaves the
    /// controller [`Failed`](ControllerState::Failed) for good.
    pub fn setup(&mut self, components: &dyn ComponentRegistry) -> Result<()> {
        if self.state != ControllerState::Uninitialized {
            warn!("Controller: setup called in state {:?}", self.state);
            return Err(Error::InvalidState);
        }
        if let Err(e) = self.run_setup(components) {
            error!("Controller: setup failed in state {:?}: {}", self.state, e);
            self.state = ControllerState::Failed;
            return Err(e);
        }
        Ok(())
    }

    fn run_setup(&mut self, components: &dyn ComponentRegistry) -> Result<()> {
        self.mode = ModeStore::load(&self.storage, self.config.default_mode);
        self.state = ControllerState::ModeLoaded;
        info!("Controller: BLE mode {} ({})", self.mode.as_u8(), self.mode);

        if self.stack.is_radio_started() {
            debug!("Controller: radio already running");
        } else {
            self.stack.start_radio()?;
        }
        self.state = ControllerState::RadioStarted;

        self.stack.init_device(&self.config.device_name)?;
        let connection = ConnectionBridge::new(
            self.queue.clone(),
            self.stack.clone(),
            self.timers.clone(),
            self.config.advertising_restart_delay_ms,
            self.connected.clone(),
            self.disconnected.clone(),
        );
        self.stack
            .create_server(Arc::new(connection), self.writes.clone())?;
        self.maintenance.setup(self.stack.as_ref())?;
        self.state = ControllerState::ServerCreated;

        if self.mode.exposes_endpoints() {
            let live = self
                .registry
                .materialize(components, self.stack.as_ref(), create_handler);
            info!(
                "Controller: {} of {} registered endpoints live",
                live,
                self.registry.descriptor_count()
            );
        } else {
            info!("Controller: {} mode, component endpoints not exposed", self.mode);
        }
        self.state = ControllerState::EndpointsMaterialized;

        if self.config.security_enabled {
            let security = SecurityBridge::new(
                self.queue.clone(),
                self.config.static_passkey,
                self.show_passkey.clone(),
                self.authentication_complete.clone(),
            );
            self.stack
                .configure_security(&SecurityParams::default(), Arc::new(security))?;
            info!("Controller: security enabled");
        }
        self.state = ControllerState::SecurityConfigured;

        self.stack.start_advertising();
        self.state = ControllerState::Advertising;
        info!("Controller: advertising as '{}'", self.config.device_name);
        Ok(())
    }

    // ── Loop ──────────────────────────────────────────────────

    /// Run deferred work and route pending writes. Call once per loop pass.
    ///
    /// Returns the number of deferred items and writes processed.
    pub fn poll(&mut self, components: &mut dyn ComponentPort) -> usize {
        let mut processed = self.queue.drain_all();
        while let Some(write) = self.writes.take() {
            processed += 1;
            if self.maintenance.owns(write.handle) {
                let action = self
                    .maintenance
                    .handle_write(self.stack.as_ref(), &write.data, self.mode);
                if let Some(MaintenanceAction::SetMode(raw)) = action {
                    self.apply_mode_command(raw);
                }
            } else if let Some((id, command)) =
                dispatch::route_write(&self.registry, write.handle, &write.data)
            {
                debug!("Controller: '{}' <- {:?}", id, command);
                components.apply(&id, command);
            }
        }
        processed
    }

    fn apply_mode_command(&mut self, raw: u8) {
        let mut reply: heapless::String<64> = heapless::String::new();
        match OperatingMode::from_u8(raw) {
            Some(mode) if mode == self.mode => {
                let _ = write!(reply, "BLE mode already {} ({})", raw, mode);
            }
            Some(mode) => {
                let _ = write!(reply, "BLE mode set to {} ({}), restarting", raw, mode);
                // On target the restart does not return; report first.
                self.maintenance.set_command_result(self.stack.as_ref(), &reply);
                reply.clear();
            }
            None => {}
        }
        match self.set_mode(raw) {
            Ok(_) => {}
            Err(Error::UnsupportedMode(_)) => {
                let _ = write!(reply, "Unsupported BLE mode: {}", raw);
            }
            Err(e) => {
                reply.clear();
                let _ = write!(reply, "BLE mode not changed: {}", e);
            }
        }
        if !reply.is_empty() {
            self.maintenance.set_command_result(self.stack.as_ref(), &reply);
        }
    }

    /// Push a component's new state to its endpoint, if it has one.
    pub fn publish_state(&self, id: &ComponentId, value: impl Into<StateValue>) -> bool {
        dispatch::publish(&self.registry, self.stack.as_ref(), id, &value.into())
    }

    /// Persist a new operating mode and restart into it.
    ///
    /// Returns `Ok(false)` when `raw` is already the current mode (nothing
    /// written, no restart). Out-of-range values and persistence failures
    /// change nothing.
    pub fn set_mode(&mut self, raw: u8) -> Result<bool> {
        if self.state == ControllerState::Uninitialized {
            warn!("Controller: BLE mode change before setup ignored");
            return Err(Error::InvalidState);
        }
        let Some(mode) = OperatingMode::from_u8(raw) else {
            warn!(
                "Controller: unsupported BLE mode {} ignored (max {})",
                raw,
                OperatingMode::MAX_RAW
            );
            return Err(Error::UnsupportedMode(raw));
        };
        if mode == self.mode {
            info!("Controller: BLE mode already {}", mode);
            return Ok(false);
        }
        if let Err(e) = ModeStore::save(&mut self.storage, mode) {
            error!("Controller: persisting BLE mode {} failed: {}", mode, e);
            return Err(e.into());
        }
        info!("Controller: BLE mode changed to {}, restarting", mode);
        self.mode = mode;
        self.system.restart();
        Ok(true)
    }

    /// Publish a maintenance command result.
    pub fn set_command_result(&self, text: &str) {
        self.maintenance.set_command_result(self.stack.as_ref(), text);
    }

    /// Schedule `work` on the loop thread; callable from any thread through
    /// [`loop_handle`](Self::loop_handle).
    pub fn execute_in_loop(&self, work: impl FnOnce() + Send + 'static) -> bool {
        self.queue.enqueue(work)
    }

    pub fn loop_handle(&self) -> LoopHandle {
        self.queue.clone()
    }

    /// Sink for characteristic writes; handed to the stack at setup.
    pub fn write_sink(&self) -> Arc<InboundWrites> {
        self.writes.clone()
    }

    // ── Introspection ─────────────────────────────────────────

    pub fn dump_config(&self) {
        info!("Controller:");
        info!("  Device name: {}", self.config.device_name);
        info!("  State: {:?}", self.state);
        info!("  BLE mode: {} ({})", self.mode.as_u8(), self.mode);
        info!(
            "  Endpoints: {} registered, {} live",
            self.registry.descriptor_count(),
            self.registry.handler_count()
        );
        if self.config.security_enabled {
            info!("  Security: enabled");
            let bonded = self.stack.bonded_devices();
            info!("  Bonded devices: {}", bonded.len());
            for addr in &bonded {
                info!("    {}", format_bd_addr(addr));
            }
        } else {
            info!("  Security: disabled");
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}
