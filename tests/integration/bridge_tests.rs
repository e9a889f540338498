//! Integration tests for the stack-callback bridges.
//!
//! Callbacks are fired through the simulated stack exactly as Bluedroid's
//! task would; observers must only run once the controller is polled.

use std::sync::{Arc, Mutex};

use blectl::app::components::ComponentKind;
use blectl::app::ports::{EncryptionLevel, IoCapability, SecurityParams};
use blectl::bridge::connection::ADVERTISING_RESTART_LABEL;
use blectl::config::ControllerConfig;

use crate::mock_stack::{harness, Harness, MockComponents, MockStorage};

fn secured(passkey: u32) -> ControllerConfig {
    ControllerConfig {
        security_enabled: true,
        static_passkey: passkey,
        ..ControllerConfig::default()
    }
}

fn app() -> MockComponents {
    MockComponents::default().with("relay", ComponentKind::Switch)
}

/// Set up and record every observer call into one shared log.
fn observed(config: ControllerConfig) -> (Harness, Arc<Mutex<Vec<String>>>) {
    let mut h = harness(config, MockStorage::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    h.controller
        .add_on_show_passkey(move |p| l.lock().unwrap().push(format!("passkey {}", p)));
    let l = log.clone();
    h.controller
        .add_on_authentication_complete(move |ok| l.lock().unwrap().push(format!("auth {}", ok)));
    let l = log.clone();
    h.controller
        .add_on_connected(move || l.lock().unwrap().push("connected".into()));
    let l = log.clone();
    h.controller
        .add_on_disconnected(move || l.lock().unwrap().push("disconnected".into()));

    h.controller.setup(&app()).unwrap();
    (h, log)
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ── Security ──────────────────────────────────────────────────

#[test]
fn security_params_are_applied_when_enabled() {
    let (h, _) = observed(secured(123_456));
    let params = h.stack.security_params().unwrap();
    assert_eq!(params, SecurityParams::default());
    assert_eq!(params.encryption, EncryptionLevel::EncryptMitm);
    assert_eq!(params.io_capability, IoCapability::DisplayOnly);
}

#[test]
fn passkey_request_is_answered_synchronously() {
    let (h, log) = observed(secured(654_321));
    assert_eq!(h.stack.sim_passkey_request(), Some(654_321));
    assert!(entries(&log).is_empty());
}

#[test]
fn shown_passkey_is_zero_padded() {
    let (mut h, log) = observed(secured(123_456));

    h.stack.sim_passkey_notify(123_456);
    h.stack.sim_passkey_notify(42);
    assert!(entries(&log).is_empty());

    h.controller.poll(&mut app());
    assert_eq!(entries(&log), vec!["passkey 123456", "passkey 000042"]);
}

#[test]
fn authentication_results_keep_their_order() {
    let (mut h, log) = observed(secured(123_456));

    h.stack.sim_passkey_notify(7);
    h.stack.sim_authentication_complete(false);
    h.stack.sim_authentication_complete(true);
    h.controller.poll(&mut app());

    assert_eq!(
        entries(&log),
        vec!["passkey 000007", "auth false", "auth true"]
    );
}

#[test]
fn security_disabled_registers_no_callbacks() {
    let (h, _) = observed(ControllerConfig::default());
    assert!(h.stack.security_params().is_none());
    assert_eq!(h.stack.sim_passkey_request(), None);
}

#[test]
fn security_toggle_after_setup_is_ignored() {
    let (mut h, _) = observed(ControllerConfig::default());
    h.controller.set_security_enabled(true);
    assert!(!h.controller.config().security_enabled);
    assert!(h.stack.security_params().is_none());
}

#[test]
fn security_toggle_before_setup_is_applied() {
    let mut h = harness(ControllerConfig::default(), MockStorage::default());
    h.controller.set_security_enabled(true);
    h.controller.setup(&app()).unwrap();
    assert!(h.controller.config().security_enabled);
    assert_eq!(h.stack.security_params(), Some(SecurityParams::default()));
}

// ── Connection ────────────────────────────────────────────────

#[test]
fn connection_observers_run_on_poll() {
    let (mut h, log) = observed(ControllerConfig::default());

    h.stack.sim_connect();
    assert!(entries(&log).is_empty());
    h.controller.poll(&mut app());
    assert_eq!(entries(&log), vec!["connected"]);
}

#[test]
fn disconnect_restarts_advertising_after_delay() {
    let (mut h, log) = observed(ControllerConfig::default());
    assert_eq!(h.stack.advertising_starts(), 1);

    h.stack.sim_connect();
    h.stack.sim_disconnect();
    h.controller.poll(&mut app());
    assert_eq!(entries(&log), vec!["connected", "disconnected"]);
    assert!(h.scheduler.is_pending(ADVERTISING_RESTART_LABEL));

    h.scheduler.tick(499);
    assert_eq!(h.stack.advertising_starts(), 1);
    h.scheduler.tick(1);
    assert_eq!(h.stack.advertising_starts(), 2);
    assert!(!h.scheduler.is_pending(ADVERTISING_RESTART_LABEL));
}

#[test]
fn rapid_disconnects_restart_advertising_once() {
    let (mut h, _) = observed(ControllerConfig::default());

    h.stack.sim_disconnect();
    h.controller.poll(&mut app());
    h.scheduler.tick(300);
    h.stack.sim_disconnect();
    h.controller.poll(&mut app());

    // The second disconnect rearms the same timeout.
    assert_eq!(h.scheduler.pending(), 1);
    h.scheduler.tick(300);
    assert_eq!(h.stack.advertising_starts(), 1);
    h.scheduler.tick(200);
    assert_eq!(h.stack.advertising_starts(), 2);
}

#[test]
fn restart_delay_follows_config() {
    let config = ControllerConfig {
        advertising_restart_delay_ms: 2_000,
        ..ControllerConfig::default()
    };
    let (mut h, _) = observed(config);

    h.stack.sim_disconnect();
    h.controller.poll(&mut app());
    h.scheduler.tick(1_999);
    assert_eq!(h.stack.advertising_starts(), 1);
    h.scheduler.tick(1);
    assert_eq!(h.stack.advertising_starts(), 2);
}
