//! Mock adapters for integration tests.
//!
//! The simulated [`BluedroidStack`] plays the radio; the mocks here add
//! failure injection and record what the controller asked of the
//! application.

use std::collections::HashMap;
use std::sync::Arc;

use blectl::adapters::bluedroid::BluedroidStack;
use blectl::adapters::system::EspSystem;
use blectl::app::components::{ComponentCommand, ComponentId, ComponentInfo, ComponentKind};
use blectl::app::ports::{
    BdAddr, CharacteristicCallbacks, CharacteristicHandle, CharacteristicProperties,
    ComponentPort, ComponentRegistry, PeripheralStack, SecurityCallbacks, SecurityParams,
    ServerCallbacks, StoragePort,
};
use blectl::config::ControllerConfig;
use blectl::error::{StackError, StorageError};
use blectl::registry::EndpointDescriptor;
use blectl::scheduler::Scheduler;
use blectl::{Controller, InstanceSlot};

// ── FlakyStack ────────────────────────────────────────────────

/// Simulated stack whose radio or device bring-up can be made to fail.
#[derive(Default)]
pub struct FlakyStack {
    pub inner: BluedroidStack,
    pub fail_radio: bool,
    pub fail_init: bool,
}

impl PeripheralStack for FlakyStack {
    fn is_radio_started(&self) -> bool {
        false
    }

    fn start_radio(&self) -> Result<(), StackError> {
        if self.fail_radio {
            return Err(StackError::ControllerStart(-1));
        }
        self.inner.start_radio()
    }

    fn init_device(&self, device_name: &str) -> Result<(), StackError> {
        if self.fail_init {
            return Err(StackError::HostInit(0x103));
        }
        self.inner.init_device(device_name)
    }

    fn create_server(
        &self,
        server_callbacks: Arc<dyn ServerCallbacks>,
        write_callbacks: Arc<dyn CharacteristicCallbacks>,
    ) -> Result<(), StackError> {
        self.inner.create_server(server_callbacks, write_callbacks)
    }

    fn create_characteristic(
        &self,
        descriptor: &EndpointDescriptor,
        properties: CharacteristicProperties,
    ) -> Result<CharacteristicHandle, StackError> {
        self.inner.create_characteristic(descriptor, properties)
    }

    fn set_value(&self, handle: CharacteristicHandle, value: &[u8]) {
        self.inner.set_value(handle, value)
    }

    fn notify(&self, handle: CharacteristicHandle) {
        self.inner.notify(handle)
    }

    fn configure_security(
        &self,
        params: &SecurityParams,
        callbacks: Arc<dyn SecurityCallbacks>,
    ) -> Result<(), StackError> {
        self.inner.configure_security(params, callbacks)
    }

    fn start_advertising(&self) {
        self.inner.start_advertising()
    }

    fn bonded_devices(&self) -> Vec<BdAddr> {
        self.inner.bonded_devices()
    }
}

// ── MockStorage ───────────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    store: HashMap<String, Vec<u8>>,
    pub fail_writes: bool,
    pub writes: usize,
}

impl MockStorage {
    pub fn with_mode(raw: u8) -> Self {
        let mut storage = Self::default();
        storage.store.insert("blectl::ble_mode".into(), vec![raw]);
        storage
    }

    /// Storage whose every write fails.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn stored_mode(&self) -> Option<u8> {
        self.store.get("blectl::ble_mode").map(|v| v[0])
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let k = format!("{}::{}", namespace, key);
        match self.store.get(&k) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.store.insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&format!("{}::{}", namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{}::{}", namespace, key))
    }
}

// ── MockComponents ────────────────────────────────────────────

/// Application component collections plus a log of applied commands.
#[derive(Default)]
pub struct MockComponents {
    pub infos: Vec<ComponentInfo>,
    pub applied: Vec<(String, ComponentCommand)>,
}

impl MockComponents {
    pub fn with(mut self, object_id: &str, kind: ComponentKind) -> Self {
        self.infos
            .push(ComponentInfo::new(ComponentId::new(object_id).unwrap(), kind));
        self
    }
}

impl ComponentRegistry for MockComponents {
    fn components(&self, kind: ComponentKind) -> Vec<ComponentInfo> {
        self.infos.iter().filter(|i| i.kind == kind).cloned().collect()
    }
}

impl ComponentPort for MockComponents {
    fn apply(&mut self, id: &ComponentId, command: ComponentCommand) {
        self.applied.push((id.as_str().to_owned(), command));
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub controller: Controller<MockStorage>,
    pub stack: Arc<BluedroidStack>,
    pub scheduler: Arc<Scheduler>,
    pub system: Arc<EspSystem>,
}

/// A fresh slot per test keeps parallel tests independent.
pub fn private_slot() -> &'static InstanceSlot {
    Box::leak(Box::new(InstanceSlot::new()))
}

pub fn harness(config: ControllerConfig, storage: MockStorage) -> Harness {
    let stack = Arc::new(BluedroidStack::new());
    let scheduler = Arc::new(Scheduler::new());
    let system = Arc::new(EspSystem::new());
    let controller = Controller::new_in(
        private_slot(),
        config,
        storage,
        stack.clone(),
        scheduler.clone(),
        system.clone(),
    )
    .unwrap();
    Harness {
        controller,
        stack,
        scheduler,
        system,
    }
}

pub fn id(object_id: &str) -> ComponentId {
    ComponentId::new(object_id).unwrap()
}
