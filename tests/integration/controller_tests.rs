//! Integration tests for the Controller → registry → stack pipeline.
//!
//! These drive a full setup against the simulated Bluedroid stack and
//! check what a central would observe: characteristics, values,
//! notifications, advertising, and restarts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blectl::adapters::bluedroid::BluedroidStack;
use blectl::adapters::system::EspSystem;
use blectl::app::components::{ComponentCommand, ComponentKind};
use blectl::app::mode::OperatingMode;
use blectl::config::ControllerConfig;
use blectl::error::StackError;
use blectl::maintenance::{
    COMMAND_CHARACTERISTIC_UUID, MAINTENANCE_SERVICE_UUID, RESULT_CHARACTERISTIC_UUID,
};
use blectl::registry::{BleUuid, EndpointDescriptor};
use blectl::scheduler::Scheduler;
use blectl::{Controller, ControllerState, Error};

use crate::mock_stack::{harness, id, private_slot, FlakyStack, Harness, MockComponents, MockStorage};

const BATTERY_SERVICE: &str = "180f";
const BATTERY_LEVEL: &str = "2a19";
const RELAY_SERVICE: &str = "5b818d00-7f3a-4a6e-9d1f-2c3b4a5d6e70";
const RELAY_CHAR: &str = "5b818d01-7f3a-4a6e-9d1f-2c3b4a5d6e70";

fn battery() -> EndpointDescriptor {
    EndpointDescriptor::parse(BATTERY_SERVICE, BATTERY_LEVEL, true).unwrap()
}

fn relay() -> EndpointDescriptor {
    EndpointDescriptor::parse(RELAY_SERVICE, RELAY_CHAR, true).unwrap()
}

fn command_char() -> EndpointDescriptor {
    EndpointDescriptor::new(MAINTENANCE_SERVICE_UUID, COMMAND_CHARACTERISTIC_UUID, false)
}

fn result_text(stack: &BluedroidStack) -> String {
    let result = EndpointDescriptor::new(MAINTENANCE_SERVICE_UUID, RESULT_CHARACTERISTIC_UUID, true);
    let handle = stack.handle_of(&result).unwrap();
    String::from_utf8(stack.value(handle).unwrap()).unwrap()
}

fn components() -> MockComponents {
    MockComponents::default()
        .with("battery", ComponentKind::Sensor)
        .with("relay", ComponentKind::Switch)
        .with("door", ComponentKind::BinarySensor)
}

/// Controller with battery and relay registered, set up in `storage`'s mode.
fn running(config: ControllerConfig, storage: MockStorage) -> Harness {
    let mut h = harness(config, storage);
    h.controller
        .register_component("battery", BATTERY_SERVICE, BATTERY_LEVEL, true)
        .unwrap();
    h.controller
        .register_component("relay", RELAY_SERVICE, RELAY_CHAR, true)
        .unwrap();
    h.controller.setup(&components()).unwrap();
    h
}

// ── Setup ─────────────────────────────────────────────────────

#[test]
fn setup_reaches_advertising() {
    let h = running(ControllerConfig::default(), MockStorage::default());

    assert_eq!(h.controller.state(), ControllerState::Advertising);
    assert_eq!(h.controller.mode(), OperatingMode::BleOnly);
    assert!(h.controller.registry().is_materialized());
    assert_eq!(h.controller.registry().handler_count(), 2);
    // Two component endpoints plus the maintenance pair.
    assert_eq!(h.stack.characteristic_count(), 4);
    assert_eq!(h.stack.advertising_starts(), 1);
    assert_eq!(h.stack.device_name().as_deref(), Some("blectl"));
    assert!(h.stack.security_params().is_none());
}

#[test]
fn switch_endpoint_is_writable_and_sensor_is_not() {
    let h = running(ControllerConfig::default(), MockStorage::default());

    let relay = h.stack.handle_of(&relay()).unwrap();
    let battery = h.stack.handle_of(&battery()).unwrap();
    assert!(h.stack.properties(relay).unwrap().write);
    assert!(!h.stack.properties(battery).unwrap().write);
    assert!(h.stack.properties(battery).unwrap().notify);
}

#[test]
fn radio_failure_is_terminal() {
    let stack = Arc::new(FlakyStack {
        fail_radio: true,
        ..FlakyStack::default()
    });
    let mut controller = Controller::new_in(
        private_slot(),
        ControllerConfig::default(),
        MockStorage::default(),
        stack.clone(),
        Arc::new(Scheduler::new()),
        Arc::new(EspSystem::new()),
    )
    .unwrap();

    let err = controller.setup(&components()).unwrap_err();
    assert!(matches!(err, Error::Stack(_)));
    assert_eq!(controller.state(), ControllerState::Failed);
    assert_eq!(stack.inner.advertising_starts(), 0);

    // No retry.
    assert_eq!(controller.setup(&components()), Err(Error::InvalidState));
    assert_eq!(controller.state(), ControllerState::Failed);
}

#[test]
fn device_init_failure_is_terminal() {
    let stack = Arc::new(FlakyStack {
        fail_init: true,
        ..FlakyStack::default()
    });
    let mut controller = Controller::new_in(
        private_slot(),
        ControllerConfig::default(),
        MockStorage::default(),
        stack.clone(),
        Arc::new(Scheduler::new()),
        Arc::new(EspSystem::new()),
    )
    .unwrap();

    assert!(matches!(
        controller.setup(&components()),
        Err(Error::Stack(StackError::HostInit(_)))
    ));
    assert_eq!(controller.state(), ControllerState::Failed);
    assert_eq!(stack.inner.characteristic_count(), 0);
    assert_eq!(stack.inner.advertising_starts(), 0);
}

#[test]
fn second_setup_is_rejected() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    assert_eq!(h.controller.setup(&components()), Err(Error::InvalidState));
    assert_eq!(h.controller.state(), ControllerState::Advertising);
    assert_eq!(h.stack.advertising_starts(), 1);
}

#[test]
fn invalid_config_is_refused() {
    let config = ControllerConfig {
        static_passkey: 1_000_000,
        ..ControllerConfig::default()
    };
    let result = Controller::new_in(
        private_slot(),
        config,
        MockStorage::default(),
        Arc::new(BluedroidStack::new()),
        Arc::new(Scheduler::new()),
        Arc::new(EspSystem::new()),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn only_one_controller_per_process() {
    let make = || {
        Controller::new(
            ControllerConfig::default(),
            MockStorage::default(),
            Arc::new(BluedroidStack::new()),
            Arc::new(Scheduler::new()),
            Arc::new(EspSystem::new()),
        )
    };
    let mut first = make().unwrap();
    first
        .register_component("battery", BATTERY_SERVICE, BATTERY_LEVEL, true)
        .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    assert!(first.loop_handle().enqueue(move || {
        r.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(matches!(make(), Err(Error::DuplicateInstance)));

    // The first instance is unaffected.
    assert_eq!(first.registry().descriptor_count(), 1);
    assert_eq!(first.loop_handle().len(), 1);
    first.setup(&components()).unwrap();
    assert_eq!(first.state(), ControllerState::Advertising);
    assert_eq!(first.registry().handler_count(), 1);
    assert_eq!(first.poll(&mut components()), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    drop(first);
    assert!(make().is_ok());
}

// ── Publishing ────────────────────────────────────────────────

#[test]
fn published_state_reaches_the_characteristic() {
    let h = running(ControllerConfig::default(), MockStorage::default());
    let battery = h.stack.handle_of(&battery()).unwrap();

    assert!(h.controller.publish_state(&id("battery"), 87.25f32));
    assert_eq!(h.stack.value(battery).unwrap(), b"87.25");
    assert_eq!(h.stack.notification_count(battery), 1);

    let relay = h.stack.handle_of(&relay()).unwrap();
    assert!(h.controller.publish_state(&id("relay"), true));
    assert_eq!(h.stack.value(relay).unwrap(), b"ON");
}

#[test]
fn notifications_follow_central_subscription() {
    let h = running(ControllerConfig::default(), MockStorage::default());
    let battery = h.stack.handle_of(&battery()).unwrap();

    h.controller.publish_state(&id("battery"), 10.0f32);
    assert_eq!(h.stack.delivered_count(battery), 0);

    h.stack.sim_connect();
    h.stack.sim_subscribe(battery, true);
    h.controller.publish_state(&id("battery"), 11.0f32);
    assert_eq!(h.stack.delivered_count(battery), 1);

    h.stack.sim_subscribe(battery, false);
    h.controller.publish_state(&id("battery"), 12.0f32);
    assert_eq!(h.stack.delivered_count(battery), 1);
    assert_eq!(h.stack.value(battery).unwrap(), b"12.00");
}

#[test]
fn large_sensor_values_are_published() {
    let h = running(ControllerConfig::default(), MockStorage::default());
    let battery = h.stack.handle_of(&battery()).unwrap();

    assert!(h.controller.publish_state(&id("battery"), 21.5f32));
    assert!(h.controller.publish_state(&id("battery"), 1.0e30f32));
    let expected = format!("{:.2}", 1.0e30f32);
    assert_eq!(h.stack.value(battery).unwrap(), expected.as_bytes());
    assert_eq!(h.stack.notification_count(battery), 2);
}

#[test]
fn publishing_an_unexposed_component_is_a_no_op() {
    let h = running(ControllerConfig::default(), MockStorage::default());

    // Known to the application but never registered.
    assert!(!h.controller.publish_state(&id("door"), true));
    // Not known at all.
    assert!(!h.controller.publish_state(&id("ghost"), 1.0f32));
    // Wrong value type for the endpoint.
    assert!(!h.controller.publish_state(&id("battery"), "full"));
}

#[test]
fn last_registration_wins() {
    let mut h = harness(ControllerConfig::default(), MockStorage::default());
    h.controller
        .register_component("battery", BATTERY_SERVICE, "2a1a", true)
        .unwrap();
    h.controller
        .register_component("battery", BATTERY_SERVICE, BATTERY_LEVEL, true)
        .unwrap();
    h.controller.setup(&components()).unwrap();

    assert_eq!(h.controller.registry().descriptor_count(), 1);
    assert!(h.stack.handle_of(&battery()).is_some());
    let stale = EndpointDescriptor::new(BleUuid::Uuid16(0x180f), BleUuid::Uuid16(0x2a1a), true);
    assert!(h.stack.handle_of(&stale).is_none());
}

#[test]
fn registration_after_setup_keeps_live_endpoint() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    h.controller
        .register_component("battery", "181a", "2a6e", false)
        .unwrap();

    let registry = h.controller.registry();
    let battery_id = id("battery");
    assert_eq!(registry.descriptor(&battery_id), Some(&battery()));
    assert_eq!(
        registry.descriptor(&battery_id),
        registry.handler(&battery_id).map(|handler| handler.descriptor())
    );
    assert!(h.controller.publish_state(&battery_id, 50.0f32));
    assert_eq!(h.stack.characteristic_count(), 4);
}

#[test]
fn registration_rejects_malformed_uuids() {
    let mut h = harness(ControllerConfig::default(), MockStorage::default());
    assert!(matches!(
        h.controller.register_component("battery", "not-a-uuid", BATTERY_LEVEL, true),
        Err(Error::Registry(_))
    ));
    assert_eq!(h.controller.registry().descriptor_count(), 0);
}

// ── Writes ────────────────────────────────────────────────────

#[test]
fn switch_write_reaches_the_application() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    let relay = h.stack.handle_of(&relay()).unwrap();
    let mut app = components();

    h.stack.sim_write(relay, b"on");
    h.stack.sim_write(relay, b"toggle");
    // Nothing is applied on the stack's task.
    assert!(app.applied.is_empty());

    assert_eq!(h.controller.poll(&mut app), 2);
    assert_eq!(
        app.applied,
        vec![
            ("relay".to_owned(), ComponentCommand::TurnOn),
            ("relay".to_owned(), ComponentCommand::Toggle),
        ]
    );
}

#[test]
fn garbage_switch_write_is_dropped() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    let relay = h.stack.handle_of(&relay()).unwrap();
    let mut app = components();

    h.stack.sim_write(relay, b"maybe");
    h.controller.poll(&mut app);
    assert!(app.applied.is_empty());
}

// ── Operating mode ────────────────────────────────────────────

#[test]
fn stored_mode_is_loaded_at_setup() {
    let h = running(ControllerConfig::default(), MockStorage::with_mode(1));
    assert_eq!(h.controller.mode(), OperatingMode::Dual);
    assert_eq!(h.controller.registry().handler_count(), 2);
}

#[test]
fn garbage_stored_mode_falls_back_to_default() {
    let config = ControllerConfig {
        default_mode: OperatingMode::Dual,
        ..ControllerConfig::default()
    };
    let h = running(config, MockStorage::with_mode(9));
    assert_eq!(h.controller.mode(), OperatingMode::Dual);
}

#[test]
fn wifi_only_exposes_only_maintenance() {
    let h = running(ControllerConfig::default(), MockStorage::with_mode(2));

    assert_eq!(h.controller.state(), ControllerState::Advertising);
    assert_eq!(h.controller.registry().handler_count(), 0);
    assert_eq!(h.stack.characteristic_count(), 2);
    assert!(h.stack.handle_of(&command_char()).is_some());
    assert!(!h.controller.publish_state(&id("battery"), 50.0f32));
}

#[test]
fn set_mode_before_setup_is_invalid() {
    let mut h = harness(ControllerConfig::default(), MockStorage::default());
    assert_eq!(h.controller.set_mode(1), Err(Error::InvalidState));
    assert_eq!(h.system.restart_count(), 0);
}

#[test]
fn set_mode_to_current_mode_does_nothing() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    assert_eq!(h.controller.set_mode(0), Ok(false));
    assert_eq!(h.controller.storage().writes, 0);
    assert_eq!(h.system.restart_count(), 0);
}

#[test]
fn set_mode_persists_and_restarts_once() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    assert_eq!(h.controller.set_mode(2), Ok(true));
    assert_eq!(h.controller.storage().stored_mode(), Some(2));
    assert_eq!(h.controller.mode(), OperatingMode::WifiOnly);
    assert_eq!(h.system.restart_count(), 1);
}

#[test]
fn out_of_range_mode_is_rejected() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    assert_eq!(h.controller.set_mode(3), Err(Error::UnsupportedMode(3)));
    assert_eq!(h.controller.storage().writes, 0);
    assert_eq!(h.controller.mode(), OperatingMode::BleOnly);
    assert_eq!(h.system.restart_count(), 0);
}

#[test]
fn storage_failure_leaves_mode_unchanged() {
    let storage = MockStorage::failing();
    let mut h = running(ControllerConfig::default(), storage);
    assert!(matches!(h.controller.set_mode(1), Err(Error::Storage(_))));
    assert_eq!(h.controller.mode(), OperatingMode::BleOnly);
    assert_eq!(h.system.restart_count(), 0);
}

// ── Maintenance service ───────────────────────────────────────

#[test]
fn maintenance_write_switches_mode() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    let command = h.stack.handle_of(&command_char()).unwrap();
    let mut app = components();

    h.stack.sim_write(command, b"ble-mode 1");
    h.controller.poll(&mut app);

    assert_eq!(h.controller.storage().stored_mode(), Some(1));
    assert_eq!(h.system.restart_count(), 1);
    assert_eq!(result_text(&h.stack), "BLE mode set to 1 (BLE + WiFi), restarting");
    assert!(app.applied.is_empty());
}

#[test]
fn maintenance_reports_unsupported_and_unchanged_modes() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    let command = h.stack.handle_of(&command_char()).unwrap();
    let mut app = components();

    h.stack.sim_write(command, b"ble-mode 0");
    h.controller.poll(&mut app);
    assert_eq!(result_text(&h.stack), "BLE mode already 0 (BLE only)");

    h.stack.sim_write(command, b"ble-mode 5");
    h.controller.poll(&mut app);
    assert_eq!(result_text(&h.stack), "Unsupported BLE mode: 5");
    assert_eq!(h.system.restart_count(), 0);
}

#[test]
fn maintenance_reports_storage_failure() {
    let storage = MockStorage::failing();
    let mut h = running(ControllerConfig::default(), storage);
    let command = h.stack.handle_of(&command_char()).unwrap();

    h.stack.sim_write(command, b"ble-mode 2");
    h.controller.poll(&mut components());
    assert!(result_text(&h.stack).starts_with("BLE mode not changed: "));
    assert_eq!(h.system.restart_count(), 0);
}

#[test]
fn maintenance_works_in_wifi_only_mode() {
    let mut h = running(ControllerConfig::default(), MockStorage::with_mode(2));
    let command = h.stack.handle_of(&command_char()).unwrap();

    h.stack.sim_write(command, b"ble-mode");
    h.controller.poll(&mut components());
    assert_eq!(result_text(&h.stack), "BLE mode: 2 (WiFi only)");

    h.stack.sim_write(command, b"ble-mode 0");
    h.controller.poll(&mut components());
    assert_eq!(h.controller.storage().stored_mode(), Some(0));
    assert_eq!(h.system.restart_count(), 1);
}

#[test]
fn custom_command_runs_on_the_loop_thread() {
    let mut h = harness(ControllerConfig::default(), MockStorage::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    assert!(h.controller.register_command("ping", "replies pong", move |args, reply| {
        s.lock().unwrap().extend(args.iter().map(|a| a.to_string()));
        reply.set("pong");
    }));
    assert!(!h.controller.register_command("ble-mode", "shadow", |_, _| {}));
    h.controller.setup(&components()).unwrap();
    assert_eq!(h.controller.commands().count(), 3);

    let command = h.stack.handle_of(&command_char()).unwrap();
    h.stack.sim_write(command, b"ping now");
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(h.controller.poll(&mut components()), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["now"]);
    assert_eq!(result_text(&h.stack), "pong");

    h.controller.set_command_result("done");
    assert_eq!(result_text(&h.stack), "done");
}

// ── Deferred execution ────────────────────────────────────────

#[test]
fn work_from_another_thread_runs_on_poll() {
    let mut h = running(ControllerConfig::default(), MockStorage::default());
    let handle = h.controller.loop_handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let r = ran.clone();
    std::thread::spawn(move || {
        assert!(handle.enqueue(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
    })
    .join()
    .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.poll(&mut components()), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.poll(&mut components()), 0);
}

#[test]
fn dump_config_does_not_disturb_state() {
    let config = ControllerConfig {
        security_enabled: true,
        ..ControllerConfig::default()
    };
    let h = running(config, MockStorage::default());
    h.stack.sim_add_bond([0x24, 0x6f, 0x28, 0x01, 0xab, 0xff]);
    h.controller.dump_config();
    assert_eq!(h.controller.state(), ControllerState::Advertising);
}
