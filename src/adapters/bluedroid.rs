//! Bluedroid peripheral stack adapter.
//!
//! Implements [`PeripheralStack`], the controller's only window onto the
//! BLE host.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: raw Bluedroid GAP/GATTS through
//!   `esp_idf_svc::sys`. Bluedroid answers most calls with an asynchronous
//!   event; the adapter issues the call and waits for the matching event so
//!   the port stays synchronous.
//! - **all other targets**: a recording simulation for host-side tests,
//!   with `sim_*` hooks that play the role of the stack's task.
//!
//! ## Event routing
//!
//! | Bluedroid event             | Forwarded to                               |
//! |-----------------------------|--------------------------------------------|
//! | `GATTS_CONNECT`             | `ServerCallbacks::on_connect`              |
//! | `GATTS_DISCONNECT`          | `ServerCallbacks::on_disconnect`           |
//! | `GATTS_WRITE`               | `CharacteristicCallbacks::on_write`        |
//! | `GAP_PASSKEY_REQ`           | `SecurityCallbacks::on_passkey_request`    |
//! | `GAP_PASSKEY_NOTIF`         | `SecurityCallbacks::on_passkey_notify`     |
//! | `GAP_SEC_REQ`               | `SecurityCallbacks::on_security_request`   |
//! | `GAP_NC_REQ`                | `SecurityCallbacks::on_confirm_pin`        |
//! | `GAP_AUTH_CMPL`             | `SecurityCallbacks::on_authentication_complete` |

use std::sync::Arc;

use log::{debug, info};

use crate::app::ports::{
    BdAddr, CharacteristicCallbacks, CharacteristicHandle, CharacteristicProperties,
    PeripheralStack, SecurityCallbacks, SecurityParams, ServerCallbacks,
};
use crate::error::StackError;
use crate::registry::EndpointDescriptor;

#[cfg(not(target_os = "espidf"))]
use std::sync::Mutex;

/// Map a raw ESP-IDF status code to `Ok` or the given stack error.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn check(rc: i32, err: fn(i32) -> StackError) -> Result<(), StackError> {
    if rc == 0 { Ok(()) } else { Err(err(rc)) }
}

// ───────────────────────────────────────────────────────────────
// CCCD subscriptions
// ───────────────────────────────────────────────────────────────

/// Client Characteristic Configuration bit enabling notifications.
const CCCD_NOTIFY: u16 = 0x0001;

/// Which characteristics the connected central has subscribed to through
/// their Client Characteristic Configuration descriptors. Subscriptions
/// last for one connection.
#[derive(Debug, Default)]
struct Subscriptions {
    /// `(cccd handle, characteristic handle)`
    descriptors: Vec<(u16, u16)>,
    subscribed: Vec<u16>,
}

impl Subscriptions {
    const fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            subscribed: Vec::new(),
        }
    }

    fn add_descriptor(&mut self, cccd: u16, characteristic: u16) {
        self.descriptors.push((cccd, characteristic));
    }

    /// Apply a write if `handle` is a CCCD. Returns `false` for any other
    /// attribute.
    fn on_write(&mut self, handle: u16, data: &[u8]) -> bool {
        let Some(&(_, characteristic)) = self.descriptors.iter().find(|(c, _)| *c == handle) else {
            return false;
        };
        let bits = match data {
            [] => 0,
            [lo] => u16::from(*lo),
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        };
        self.subscribed.retain(|h| *h != characteristic);
        if bits & CCCD_NOTIFY != 0 {
            self.subscribed.push(characteristic);
        }
        debug!(
            "BLE: notifications for handle {} {}",
            characteristic,
            if bits & CCCD_NOTIFY != 0 { "enabled" } else { "disabled" }
        );
        true
    }

    fn is_subscribed(&self, characteristic: u16) -> bool {
        self.subscribed.contains(&characteristic)
    }

    fn reset(&mut self) {
        self.subscribed.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    use esp_idf_svc::sys::*;
    use log::{debug, error, info, warn};

    use crate::app::ports::{
        CharacteristicCallbacks, CharacteristicHandle, EncryptionLevel, SecurityCallbacks,
        ServerCallbacks,
    };
    use crate::error::StackError;
    use crate::handlers::MAX_VALUE_LEN;
    use crate::registry::BleUuid;

    /// How long to wait for Bluedroid to acknowledge a GATTS call.
    const REPLY_TIMEOUT: Duration = Duration::from_millis(1_000);
    /// Attribute handles reserved per service.
    const HANDLES_PER_SERVICE: u16 = 24;
    const CCCD_UUID: u16 = 0x2902;
    const NO_CONNECTION: u16 = u16::MAX;

    // Bluedroid callbacks are C function pointers that cannot capture Rust
    // closures; these statics bridge them to the registered trait objects.
    pub(super) static GATTS_IF: AtomicU8 = AtomicU8::new(ESP_GATT_IF_NONE as u8);
    pub(super) static CONN_ID: AtomicU16 = AtomicU16::new(NO_CONNECTION);
    static ENCRYPTION: AtomicU8 = AtomicU8::new(0);
    static SECURITY_ON: AtomicBool = AtomicBool::new(false);

    pub(super) static SERVER_CB: Mutex<Option<Arc<dyn ServerCallbacks>>> = Mutex::new(None);
    pub(super) static WRITE_CB: Mutex<Option<Arc<dyn CharacteristicCallbacks>>> = Mutex::new(None);
    pub(super) static SECURITY_CB: Mutex<Option<Arc<dyn SecurityCallbacks>>> = Mutex::new(None);

    pub(super) static SUBSCRIPTIONS: Mutex<super::Subscriptions> =
        Mutex::new(super::Subscriptions::new());

    /// Services created so far: (uuid, service handle, started).
    pub(super) static SERVICES: Mutex<Vec<(BleUuid, u16, bool)>> = Mutex::new(Vec::new());

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        Registered(u8),
        ServiceCreated(u16),
        CharAdded(u16),
        DescrAdded(u16),
        Failed(i32),
    }

    static REPLY: Mutex<Option<Reply>> = Mutex::new(None);
    static REPLY_READY: Condvar = Condvar::new();

    fn post_reply(reply: Reply) {
        if let Ok(mut slot) = REPLY.lock() {
            *slot = Some(reply);
            REPLY_READY.notify_all();
        }
    }

    /// Issue `call` and wait for the event it triggers.
    fn call_and_wait(call: impl FnOnce() -> esp_err_t) -> Result<Reply, i32> {
        let mut slot = REPLY.lock().map_err(|_| ESP_FAIL as i32)?;
        *slot = None;
        let rc = call();
        if rc != ESP_OK as i32 {
            return Err(rc);
        }
        let (mut slot, timeout) = REPLY_READY
            .wait_timeout_while(slot, REPLY_TIMEOUT, |s| s.is_none())
            .map_err(|_| ESP_FAIL as i32)?;
        if timeout.timed_out() {
            warn!("BLE: timed out waiting for Bluedroid");
            return Err(ESP_ERR_TIMEOUT as i32);
        }
        match slot.take() {
            Some(Reply::Failed(status)) => Err(status),
            Some(reply) => Ok(reply),
            None => Err(ESP_FAIL as i32),
        }
    }

    fn callback<T: ?Sized>(slot: &Mutex<Option<Arc<T>>>) -> Option<Arc<T>> {
        slot.lock().ok().and_then(|cb| cb.clone())
    }

    pub(super) fn esp_uuid(uuid: BleUuid) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        unsafe {
            match uuid {
                BleUuid::Uuid16(v) => {
                    t.len = ESP_UUID_LEN_16 as u16;
                    t.uuid.uuid16 = v;
                }
                BleUuid::Uuid32(v) => {
                    t.len = ESP_UUID_LEN_32 as u16;
                    t.uuid.uuid32 = v;
                }
                BleUuid::Uuid128(v) => {
                    t.len = ESP_UUID_LEN_128 as u16;
                    t.uuid.uuid128 = v.to_le_bytes();
                }
            }
        }
        t
    }

    pub(super) fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        }
    }

    pub(super) fn set_encryption(level: EncryptionLevel) {
        let act = match level {
            EncryptionLevel::Encrypt => esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT,
            EncryptionLevel::EncryptNoMitm => esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_NO_MITM,
            EncryptionLevel::EncryptMitm => esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_MITM,
        };
        ENCRYPTION.store(act as u8, Ordering::Relaxed);
        SECURITY_ON.store(true, Ordering::Relaxed);
    }

    pub(super) fn register_app() -> Result<u8, StackError> {
        unsafe {
            esp_ble_gap_register_callback(Some(gap_event_handler));
            esp_ble_gatts_register_callback(Some(gatts_event_handler));
        }
        match call_and_wait(|| unsafe { esp_ble_gatts_app_register(0) }) {
            Ok(Reply::Registered(gatts_if)) => Ok(gatts_if),
            Ok(_) | Err(_) => Err(StackError::ServerCreate),
        }
    }

    /// Service handle for `uuid`, creating the service on first use.
    pub(super) fn service_handle(uuid: BleUuid) -> Result<u16, StackError> {
        if let Some(&(_, handle, _)) = SERVICES
            .lock()
            .map_err(|_| StackError::AttributeTableFull)?
            .iter()
            .find(|(u, _, _)| *u == uuid)
        {
            return Ok(handle);
        }
        let gatts_if = GATTS_IF.load(Ordering::Relaxed);
        let mut svc_id = esp_gatt_srvc_id_t {
            id: esp_gatt_id_t {
                uuid: esp_uuid(uuid),
                inst_id: 0,
            },
            is_primary: true,
        };
        let reply = call_and_wait(|| unsafe {
            esp_ble_gatts_create_service(gatts_if, &mut svc_id, HANDLES_PER_SERVICE)
        });
        match reply {
            Ok(Reply::ServiceCreated(handle)) => {
                debug!("BLE GATTS: service {} created (handle={})", uuid, handle);
                if let Ok(mut services) = SERVICES.lock() {
                    services.push((uuid, handle, false));
                }
                Ok(handle)
            }
            _ => Err(StackError::AttributeTableFull),
        }
    }

    pub(super) fn add_characteristic(
        service: u16,
        uuid: BleUuid,
        perm: u32,
        prop: u32,
        cccd: bool,
    ) -> Result<u16, StackError> {
        let mut char_uuid = esp_uuid(uuid);
        let mut value = esp_attr_value_t {
            attr_max_len: MAX_VALUE_LEN as u16,
            attr_len: 0,
            attr_value: core::ptr::null_mut(),
        };
        let mut control = esp_attr_control_t {
            auto_rsp: ESP_GATT_AUTO_RSP as u8,
        };
        let handle = match call_and_wait(|| unsafe {
            esp_ble_gatts_add_char(
                service,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                &mut value,
                &mut control,
            )
        }) {
            Ok(Reply::CharAdded(handle)) => handle,
            _ => return Err(StackError::CharacteristicCreate),
        };
        if cccd {
            let mut descr_uuid = esp_uuid(BleUuid::Uuid16(CCCD_UUID));
            let reply = call_and_wait(|| unsafe {
                esp_ble_gatts_add_char_descr(
                    service,
                    &mut descr_uuid,
                    (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                    core::ptr::null_mut(),
                    &mut control,
                )
            });
            let Ok(Reply::DescrAdded(cccd)) = reply else {
                return Err(StackError::CharacteristicCreate);
            };
            if let Ok(mut subscriptions) = SUBSCRIPTIONS.lock() {
                subscriptions.add_descriptor(cccd, handle);
            }
        }
        Ok(handle)
    }

    /// Start every service that has not been started yet.
    pub(super) fn start_services() {
        let Ok(mut services) = SERVICES.lock() else {
            return;
        };
        for (uuid, handle, started) in services.iter_mut().filter(|(_, _, s)| !*s) {
            let rc = unsafe { esp_ble_gatts_start_service(*handle) };
            if rc == ESP_OK as i32 {
                *started = true;
            } else {
                error!("BLE GATTS: starting service {} failed ({})", uuid, rc);
            }
        }
    }

    pub(super) fn notify(handle: CharacteristicHandle) {
        let conn = CONN_ID.load(Ordering::Relaxed);
        if conn == NO_CONNECTION {
            return;
        }
        let subscribed = SUBSCRIPTIONS
            .lock()
            .is_ok_and(|s| s.is_subscribed(handle.0));
        if !subscribed {
            return;
        }
        let mut len: u16 = 0;
        let mut value: *const u8 = core::ptr::null();
        unsafe {
            if esp_ble_gatts_get_attr_value(handle.0, &mut len, &mut value) != esp_gatt_status_t_ESP_GATT_OK {
                return;
            }
            esp_ble_gatts_send_indicate(
                GATTS_IF.load(Ordering::Relaxed),
                conn,
                handle.0,
                len,
                value as *mut u8,
                false,
            );
        }
    }

    unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        let security = callback(&SECURITY_CB);
        unsafe {
            match event {
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                    debug!("BLE GAP: advertising started");
                }
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_REQ_EVT => {
                    let addr = (*param).ble_security.ble_req.bd_addr.as_mut_ptr();
                    let passkey = security.map_or(0, |cb| cb.on_passkey_request());
                    esp_ble_passkey_reply(addr, true, passkey);
                }
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_NOTIF_EVT => {
                    if let Some(cb) = security {
                        cb.on_passkey_notify((*param).ble_security.key_notif.passkey);
                    }
                }
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => {
                    let addr = (*param).ble_security.ble_req.bd_addr.as_mut_ptr();
                    let accept = security.is_some_and(|cb| cb.on_security_request());
                    esp_ble_gap_security_rsp(addr, accept);
                }
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_NC_REQ_EVT => {
                    let notif = &mut (*param).ble_security.key_notif;
                    let accept = security.is_some_and(|cb| cb.on_confirm_pin(notif.passkey));
                    esp_ble_confirm_reply(notif.bd_addr.as_mut_ptr(), accept);
                }
                esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
                    let auth = &(*param).ble_security.auth_cmpl;
                    if !auth.success {
                        warn!("BLE GAP: authentication failed (reason={})", auth.fail_reason);
                    }
                    if let Some(cb) = security {
                        cb.on_authentication_complete(auth.success);
                    }
                }
                _ => {}
            }
        }
    }

    unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        unsafe {
            match event {
                esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                    let p = &(*param).reg;
                    if p.status == esp_gatt_status_t_ESP_GATT_OK {
                        GATTS_IF.store(gatts_if, Ordering::Relaxed);
                        info!("BLE GATTS: app registered (if={})", gatts_if);
                        post_reply(Reply::Registered(gatts_if));
                    } else {
                        post_reply(Reply::Failed(p.status as i32));
                    }
                }
                esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                    let p = &(*param).create;
                    post_reply(if p.status == esp_gatt_status_t_ESP_GATT_OK {
                        Reply::ServiceCreated(p.service_handle)
                    } else {
                        Reply::Failed(p.status as i32)
                    });
                }
                esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                    let p = &(*param).add_char;
                    post_reply(if p.status == esp_gatt_status_t_ESP_GATT_OK {
                        Reply::CharAdded(p.attr_handle)
                    } else {
                        Reply::Failed(p.status as i32)
                    });
                }
                esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                    let p = &(*param).add_char_descr;
                    post_reply(if p.status == esp_gatt_status_t_ESP_GATT_OK {
                        Reply::DescrAdded(p.attr_handle)
                    } else {
                        Reply::Failed(p.status as i32)
                    });
                }
                esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                    let p = &mut (*param).connect;
                    CONN_ID.store(p.conn_id, Ordering::Relaxed);
                    if SECURITY_ON.load(Ordering::Relaxed) {
                        esp_ble_set_encryption(
                            p.remote_bda.as_mut_ptr(),
                            ENCRYPTION.load(Ordering::Relaxed) as esp_ble_sec_act_t,
                        );
                    }
                    if let Some(cb) = callback(&SERVER_CB) {
                        cb.on_connect();
                    }
                }
                esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                    CONN_ID.store(NO_CONNECTION, Ordering::Relaxed);
                    if let Ok(mut subscriptions) = SUBSCRIPTIONS.lock() {
                        subscriptions.reset();
                    }
                    if let Some(cb) = callback(&SERVER_CB) {
                        cb.on_disconnect();
                    }
                }
                esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                    let p = &(*param).write;
                    if p.is_prep || p.value.is_null() {
                        return;
                    }
                    let data = core::slice::from_raw_parts(p.value, p.len as usize);
                    let cccd = SUBSCRIPTIONS
                        .lock()
                        .is_ok_and(|mut s| s.on_write(p.handle, data));
                    if cccd {
                        return;
                    }
                    if let Some(cb) = callback(&WRITE_CB) {
                        cb.on_write(CharacteristicHandle(p.handle), data);
                    }
                }
                _ => {}
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
struct SimCharacteristic {
    descriptor: EndpointDescriptor,
    properties: CharacteristicProperties,
    value: Vec<u8>,
    notifications: usize,
    delivered: usize,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    radio_started: bool,
    device_name: Option<String>,
    server: Option<Arc<dyn ServerCallbacks>>,
    writes: Option<Arc<dyn CharacteristicCallbacks>>,
    security: Option<(SecurityParams, Arc<dyn SecurityCallbacks>)>,
    characteristics: Vec<SimCharacteristic>,
    subscriptions: Subscriptions,
    advertising_starts: usize,
    bonded: Vec<BdAddr>,
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

/// First attribute handle handed out by the simulation.
#[cfg(not(target_os = "espidf"))]
const SIM_FIRST_HANDLE: u16 = 0x0029;

pub struct BluedroidStack {
    #[cfg(not(target_os = "espidf"))]
    sim: Mutex<SimState>,
}

impl BluedroidStack {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: Mutex::new(SimState::default()),
        }
    }
}

impl Default for BluedroidStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl PeripheralStack for BluedroidStack {
    fn is_radio_started(&self) -> bool {
        unsafe {
            esp_idf_svc::sys::esp_bluedroid_get_status()
                == esp_idf_svc::sys::esp_bluedroid_status_t_ESP_BLUEDROID_STATUS_ENABLED
        }
    }

    fn start_radio(&self) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;
        unsafe {
            // Release classic BT memory (BLE-only saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            if esp_bt_controller_get_status() == esp_bt_controller_status_t_ESP_BT_CONTROLLER_STATUS_IDLE {
                let mut bt_cfg = esp_bt_controller_config_t::default();
                let ret = esp_bt_controller_init(&mut bt_cfg);
                if ret != ESP_OK as i32 {
                    return Err(StackError::ControllerStart(ret));
                }
            }
            if esp_bt_controller_get_status() != esp_bt_controller_status_t_ESP_BT_CONTROLLER_STATUS_ENABLED {
                let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
                if ret != ESP_OK as i32 {
                    return Err(StackError::ControllerStart(ret));
                }
            }

            let status = esp_bluedroid_get_status();
            if status == esp_bluedroid_status_t_ESP_BLUEDROID_STATUS_UNINITIALIZED {
                let ret = esp_bluedroid_init();
                if ret != ESP_OK as i32 {
                    return Err(StackError::HostInit(ret));
                }
            }
            if status != esp_bluedroid_status_t_ESP_BLUEDROID_STATUS_ENABLED {
                let ret = esp_bluedroid_enable();
                if ret != ESP_OK as i32 {
                    return Err(StackError::HostEnable(ret));
                }
            }
        }
        info!("BLE(espidf): controller and Bluedroid enabled");
        Ok(())
    }

    fn init_device(&self, device_name: &str) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;
        esp::register_app()?;

        let mut name: heapless::Vec<u8, 32> = heapless::Vec::new();
        let len = device_name.len().min(name.capacity() - 1);
        let _ = name.extend_from_slice(&device_name.as_bytes()[..len]);
        let _ = name.push(0);
        unsafe {
            check(
                esp_ble_gap_set_device_name(name.as_ptr() as *const _),
                StackError::HostInit,
            )?;
            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                include_txpower: false,
                min_interval: 0x0006,
                max_interval: 0x0010,
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..core::mem::zeroed()
            };
            check(esp_ble_gap_config_adv_data(&mut adv_data), StackError::HostInit)?;
        }
        info!("BLE(espidf): device '{}' initialised", device_name);
        Ok(())
    }

    fn create_server(
        &self,
        server_callbacks: Arc<dyn ServerCallbacks>,
        write_callbacks: Arc<dyn CharacteristicCallbacks>,
    ) -> Result<(), StackError> {
        let mut server = esp::SERVER_CB.lock().map_err(|_| StackError::ServerCreate)?;
        let mut writes = esp::WRITE_CB.lock().map_err(|_| StackError::ServerCreate)?;
        *server = Some(server_callbacks);
        *writes = Some(write_callbacks);
        Ok(())
    }

    fn create_characteristic(
        &self,
        descriptor: &EndpointDescriptor,
        properties: CharacteristicProperties,
    ) -> Result<CharacteristicHandle, StackError> {
        use esp_idf_svc::sys::*;
        let service = esp::service_handle(descriptor.service)?;
        let mut perm = 0;
        let mut prop = 0;
        if properties.read {
            perm |= ESP_GATT_PERM_READ;
            prop |= ESP_GATT_CHAR_PROP_BIT_READ;
        }
        if properties.write {
            perm |= ESP_GATT_PERM_WRITE;
            prop |= ESP_GATT_CHAR_PROP_BIT_WRITE;
        }
        if properties.notify {
            prop |= ESP_GATT_CHAR_PROP_BIT_NOTIFY;
        }
        let handle = esp::add_characteristic(
            service,
            descriptor.characteristic,
            perm,
            prop,
            properties.notify,
        )?;
        Ok(CharacteristicHandle(handle))
    }

    fn set_value(&self, handle: CharacteristicHandle, value: &[u8]) {
        let rc = unsafe {
            esp_idf_svc::sys::esp_ble_gatts_set_attr_value(handle.0, value.len() as u16, value.as_ptr())
        };
        if rc != esp_idf_svc::sys::ESP_OK as i32 {
            log::warn!("BLE: set value on handle {} failed ({})", handle.0, rc);
        }
    }

    fn notify(&self, handle: CharacteristicHandle) {
        esp::notify(handle);
    }

    fn configure_security(
        &self,
        params: &SecurityParams,
        callbacks: Arc<dyn SecurityCallbacks>,
    ) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;

        let mut auth_req: u8 = 0;
        if params.bonding {
            auth_req |= ESP_LE_AUTH_BOND as u8;
        }
        if params.mitm {
            auth_req |= ESP_LE_AUTH_REQ_MITM as u8;
        }
        if params.secure_connections {
            auth_req |= ESP_LE_AUTH_REQ_SC_ONLY as u8;
        }
        let iocap = params.io_capability as u8;
        let only_specified: u8 = if params.only_accept_specified_auth {
            ESP_BLE_ONLY_ACCEPT_SPECIFIED_AUTH_ENABLE as u8
        } else {
            ESP_BLE_ONLY_ACCEPT_SPECIFIED_AUTH_DISABLE as u8
        };

        let settings: [(esp_ble_sm_param_t, u8); 6] = [
            (esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE, auth_req),
            (esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE, iocap),
            (esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE, params.key_size),
            (esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY, params.init_key_mask),
            (esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY, params.resp_key_mask),
            (esp_ble_sm_param_t_ESP_BLE_SM_ONLY_ACCEPT_SPECIFIED_SEC_AUTH, only_specified),
        ];
        for (param, value) in settings {
            let mut value = value;
            let rc = unsafe {
                esp_ble_gap_set_security_param(param, &mut value as *mut u8 as *mut _, 1)
            };
            if rc != ESP_OK as i32 {
                return Err(StackError::Security(rc));
            }
        }

        let mut slot = esp::SECURITY_CB.lock().map_err(|_| StackError::Security(ESP_FAIL as i32))?;
        *slot = Some(callbacks);
        esp::set_encryption(params.encryption);
        info!("BLE(espidf): security configured (auth_req=0x{:02x})", auth_req);
        Ok(())
    }

    fn start_advertising(&self) {
        esp::start_services();
        let mut params = esp::adv_params();
        let rc = unsafe { esp_idf_svc::sys::esp_ble_gap_start_advertising(&mut params) };
        if rc != esp_idf_svc::sys::ESP_OK as i32 {
            log::warn!("BLE: start advertising failed ({})", rc);
        }
    }

    fn bonded_devices(&self) -> Vec<BdAddr> {
        use esp_idf_svc::sys::*;
        let mut count = unsafe { esp_ble_get_bond_device_num() };
        if count <= 0 {
            return Vec::new();
        }
        let mut list: Vec<esp_ble_bond_dev_t> =
            (0..count).map(|_| unsafe { core::mem::zeroed() }).collect();
        if unsafe { esp_ble_get_bond_device_list(&mut count, list.as_mut_ptr()) } != ESP_OK as i32 {
            return Vec::new();
        }
        list.truncate(count.max(0) as usize);
        list.iter().map(|dev| dev.bd_addr).collect()
    }
}

#[cfg(not(target_os = "espidf"))]
impl PeripheralStack for BluedroidStack {
    fn is_radio_started(&self) -> bool {
        self.sim.lock().is_ok_and(|s| s.radio_started)
    }

    fn start_radio(&self) -> Result<(), StackError> {
        let mut sim = self.sim.lock().map_err(|_| StackError::ControllerStart(-1))?;
        sim.radio_started = true;
        info!("BLE(sim): radio started");
        Ok(())
    }

    fn init_device(&self, device_name: &str) -> Result<(), StackError> {
        let mut sim = self.sim.lock().map_err(|_| StackError::HostInit(-1))?;
        sim.device_name = Some(device_name.to_owned());
        info!("BLE(sim): device '{}'", device_name);
        Ok(())
    }

    fn create_server(
        &self,
        server_callbacks: Arc<dyn ServerCallbacks>,
        write_callbacks: Arc<dyn CharacteristicCallbacks>,
    ) -> Result<(), StackError> {
        let mut sim = self.sim.lock().map_err(|_| StackError::ServerCreate)?;
        sim.server = Some(server_callbacks);
        sim.writes = Some(write_callbacks);
        Ok(())
    }

    fn create_characteristic(
        &self,
        descriptor: &EndpointDescriptor,
        properties: CharacteristicProperties,
    ) -> Result<CharacteristicHandle, StackError> {
        let mut sim = self.sim.lock().map_err(|_| StackError::CharacteristicCreate)?;
        let handle = CharacteristicHandle(SIM_FIRST_HANDLE + 2 * sim.characteristics.len() as u16);
        sim.characteristics.push(SimCharacteristic {
            descriptor: *descriptor,
            properties,
            value: Vec::new(),
            notifications: 0,
            delivered: 0,
        });
        if properties.notify {
            // The CCCD takes the attribute handle right after the value.
            sim.subscriptions.add_descriptor(handle.0 + 1, handle.0);
        }
        Ok(handle)
    }

    fn set_value(&self, handle: CharacteristicHandle, value: &[u8]) {
        if let Ok(mut sim) = self.sim.lock() {
            if let Some(c) = sim.characteristic_mut(handle) {
                c.value = value.to_vec();
            }
        }
    }

    fn notify(&self, handle: CharacteristicHandle) {
        if let Ok(mut sim) = self.sim.lock() {
            let subscribed = sim.subscriptions.is_subscribed(handle.0);
            if let Some(c) = sim.characteristic_mut(handle) {
                c.notifications += 1;
                if subscribed {
                    c.delivered += 1;
                }
            }
        }
    }

    fn configure_security(
        &self,
        params: &SecurityParams,
        callbacks: Arc<dyn SecurityCallbacks>,
    ) -> Result<(), StackError> {
        let mut sim = self.sim.lock().map_err(|_| StackError::Security(-1))?;
        sim.security = Some((*params, callbacks));
        Ok(())
    }

    fn start_advertising(&self) {
        if let Ok(mut sim) = self.sim.lock() {
            sim.advertising_starts += 1;
            info!(
                "BLE(sim): advertising '{}'",
                sim.device_name.as_deref().unwrap_or("")
            );
        }
    }

    fn bonded_devices(&self) -> Vec<BdAddr> {
        self.sim.lock().map(|s| s.bonded.clone()).unwrap_or_default()
    }
}

// ── Simulation hooks ──────────────────────────────────────────
//
// Each hook plays the stack's task: it clones the registered callback out
// of the lock and invokes it, just as the GAP/GATTS handlers do on target.

#[cfg(not(target_os = "espidf"))]
impl SimState {
    fn index(handle: CharacteristicHandle) -> Option<usize> {
        let offset = handle.0.checked_sub(SIM_FIRST_HANDLE)?;
        (offset % 2 == 0).then_some(offset as usize / 2)
    }

    fn characteristic(&self, handle: CharacteristicHandle) -> Option<&SimCharacteristic> {
        Self::index(handle).and_then(|i| self.characteristics.get(i))
    }

    fn characteristic_mut(&mut self, handle: CharacteristicHandle) -> Option<&mut SimCharacteristic> {
        Self::index(handle).and_then(|i| self.characteristics.get_mut(i))
    }
}

#[cfg(not(target_os = "espidf"))]
impl BluedroidStack {
    fn security_callbacks(&self) -> Option<Arc<dyn SecurityCallbacks>> {
        self.sim.lock().ok()?.security.as_ref().map(|(_, cb)| cb.clone())
    }

    pub fn sim_connect(&self) {
        let cb = self.sim.lock().ok().and_then(|s| s.server.clone());
        if let Some(cb) = cb {
            cb.on_connect();
        }
    }

    pub fn sim_disconnect(&self) {
        let cb = self.sim.lock().ok().and_then(|mut s| {
            s.subscriptions.reset();
            s.server.clone()
        });
        if let Some(cb) = cb {
            cb.on_disconnect();
        }
    }

    /// A central writes `data` to `handle`. CCCD writes are consumed by the
    /// stack and never reach the write callbacks.
    pub fn sim_write(&self, handle: CharacteristicHandle, data: &[u8]) {
        let cb = self.sim.lock().ok().and_then(|mut s| {
            if s.subscriptions.on_write(handle.0, data) {
                None
            } else {
                s.writes.clone()
            }
        });
        if let Some(cb) = cb {
            cb.on_write(handle, data);
        }
    }

    /// The stack asks for a passkey; returns the answer given.
    pub fn sim_passkey_request(&self) -> Option<u32> {
        self.security_callbacks().map(|cb| cb.on_passkey_request())
    }

    pub fn sim_passkey_notify(&self, passkey: u32) {
        if let Some(cb) = self.security_callbacks() {
            cb.on_passkey_notify(passkey);
        }
    }

    pub fn sim_authentication_complete(&self, success: bool) {
        if let Some(cb) = self.security_callbacks() {
            cb.on_authentication_complete(success);
        }
    }

    pub fn sim_add_bond(&self, addr: BdAddr) {
        if let Ok(mut sim) = self.sim.lock() {
            sim.bonded.push(addr);
        }
    }

    /// Current value of a characteristic.
    pub fn value(&self, handle: CharacteristicHandle) -> Option<Vec<u8>> {
        let sim = self.sim.lock().ok()?;
        sim.characteristic(handle).map(|c| c.value.clone())
    }

    pub fn notification_count(&self, handle: CharacteristicHandle) -> usize {
        self.sim
            .lock()
            .ok()
            .and_then(|s| s.characteristic(handle).map(|c| c.notifications))
            .unwrap_or(0)
    }

    /// A central enables or disables notifications on `handle`.
    pub fn sim_subscribe(&self, handle: CharacteristicHandle, enabled: bool) {
        let bits = if enabled { CCCD_NOTIFY } else { 0 };
        self.sim_write(CharacteristicHandle(handle.0 + 1), &bits.to_le_bytes());
    }

    /// Notifications that reached a subscribed central.
    pub fn delivered_count(&self, handle: CharacteristicHandle) -> usize {
        self.sim
            .lock()
            .ok()
            .and_then(|s| s.characteristic(handle).map(|c| c.delivered))
            .unwrap_or(0)
    }

    pub fn properties(&self, handle: CharacteristicHandle) -> Option<CharacteristicProperties> {
        let sim = self.sim.lock().ok()?;
        sim.characteristic(handle).map(|c| c.properties)
    }

    /// Handle of the characteristic created for `descriptor`.
    pub fn handle_of(&self, descriptor: &EndpointDescriptor) -> Option<CharacteristicHandle> {
        let sim = self.sim.lock().ok()?;
        let i = sim
            .characteristics
            .iter()
            .position(|c| c.descriptor == *descriptor)?;
        Some(CharacteristicHandle(SIM_FIRST_HANDLE + 2 * i as u16))
    }

    pub fn characteristic_count(&self) -> usize {
        self.sim.lock().map_or(0, |s| s.characteristics.len())
    }

    pub fn advertising_starts(&self) -> usize {
        self.sim.lock().map_or(0, |s| s.advertising_starts)
    }

    pub fn security_params(&self) -> Option<SecurityParams> {
        self.sim.lock().ok()?.security.as_ref().map(|(p, _)| *p)
    }

    pub fn device_name(&self) -> Option<String> {
        self.sim.lock().ok()?.device_name.clone()
    }
}
