//! blectl firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  BluedroidStack    NvsAdapter     EspSystem    Scheduler     │
//! │  (PeripheralStack) (Config+NVS)   (restart)    (TimerPort)   │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ──────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │   Controller: registry · bridges · deferred queue      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  Main loop: poll controller · tick scheduler · publish       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use blectl::adapters::bluedroid::BluedroidStack;
use blectl::adapters::nvs::NvsAdapter;
use blectl::adapters::system::EspSystem;
use blectl::adapters::time::MonotonicClock;
use blectl::app::components::{ComponentCommand, ComponentId, ComponentInfo, ComponentKind};
use blectl::app::ports::{ComponentPort, ComponentRegistry, ConfigPort};
use blectl::config::ControllerConfig;
use blectl::scheduler::Scheduler;
use blectl::Controller;

/// Main loop period.
const LOOP_INTERVAL_MS: u64 = 20;
/// How often the demo sensors are republished.
const PUBLISH_INTERVAL_MS: u64 = 5_000;

// ── Board components ──────────────────────────────────────────
//
// The firmware's own components: an uptime sensor and a relay switch.

struct Board {
    uptime: ComponentId,
    relay: ComponentId,
    relay_on: bool,
}

impl Board {
    fn new() -> Result<Self> {
        Ok(Self {
            uptime: ComponentId::new("uptime")?,
            relay: ComponentId::new("relay")?,
            relay_on: false,
        })
    }
}

impl ComponentRegistry for Board {
    fn components(&self, kind: ComponentKind) -> Vec<ComponentInfo> {
        match kind {
            ComponentKind::Sensor => {
                vec![ComponentInfo::new(self.uptime.clone(), kind).with_accuracy(0)]
            }
            ComponentKind::Switch => vec![ComponentInfo::new(self.relay.clone(), kind)],
            _ => Vec::new(),
        }
    }
}

impl ComponentPort for Board {
    fn apply(&mut self, id: &ComponentId, command: ComponentCommand) {
        if *id != self.relay {
            return;
        }
        self.relay_on = match command {
            ComponentCommand::TurnOn => true,
            ComponentCommand::TurnOff => false,
            ComponentCommand::Toggle => !self.relay_on,
        };
        info!("Relay {}", if self.relay_on { "on" } else { "off" });
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("blectl v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            ControllerConfig::default()
        }
    };

    // ── 3. Controller ─────────────────────────────────────────
    let stack = Arc::new(BluedroidStack::new());
    let scheduler = Arc::new(Scheduler::new());
    let system = Arc::new(EspSystem::new());
    let mut board = Board::new()?;

    let mut controller = Controller::new(config, nvs, stack, scheduler.clone(), system)?;
    controller.register_component("uptime", "180f", "2a19", true)?;
    controller.register_component(
        "relay",
        "5b818d00-7f3a-4a6e-9d1f-2c3b4a5d6e70",
        "5b818d01-7f3a-4a6e-9d1f-2c3b4a5d6e70",
        true,
    )?;
    controller.add_on_show_passkey(|passkey| info!("Pairing passkey: {}", passkey));
    controller.add_on_authentication_complete(|ok| {
        info!("Pairing {}", if ok { "succeeded" } else { "failed" });
    });
    controller.add_on_connected(|| info!("Central connected"));
    controller.add_on_disconnected(|| info!("Central disconnected"));

    if let Err(e) = controller.setup(&board) {
        // Without BLE there is nothing to serve; keep the loop alive so
        // the failure stays visible in the log.
        warn!("BLE setup failed: {}", e);
    }
    controller.dump_config();

    // ── 4. Main loop ──────────────────────────────────────────
    let mut clock = MonotonicClock::new();
    let mut since_publish = 0u64;
    loop {
        controller.poll(&mut board);
        let elapsed = clock.elapsed_ms();
        scheduler.tick(elapsed);

        since_publish += elapsed as u64;
        if since_publish >= PUBLISH_INTERVAL_MS {
            since_publish = 0;
            let uptime_s = (clock.uptime_ms() / 1_000) as f32;
            controller.publish_state(&board.uptime, uptime_s);
            controller.publish_state(&board.relay, board.relay_on);
        }

        std::thread::sleep(Duration::from_millis(LOOP_INTERVAL_MS));
    }
}
