//! Connection bridge.
//!
//! Relays connect/disconnect from the stack's task to the loop thread. After
//! a disconnect, advertising is resumed through the application scheduler
//! once the restart delay has passed; restarting immediately can race the
//! stack's own connection teardown. The restart is best effort: nothing
//! checks that advertising actually resumed.

use std::sync::Arc;

use log::{debug, info};

use crate::app::callbacks::CallbackList;
use crate::app::ports::{PeripheralStack, ServerCallbacks, TimerPort};
use crate::deferred::LoopHandle;

/// Scheduler label of the advertising restart; a second disconnect inside
/// the delay replaces the pending restart instead of stacking another.
pub const ADVERTISING_RESTART_LABEL: &str = "ble-advertising-restart";

pub struct ConnectionBridge {
    queue: LoopHandle,
    stack: Arc<dyn PeripheralStack>,
    timers: Arc<dyn TimerPort>,
    restart_delay_ms: u32,
    connected: Arc<CallbackList<()>>,
    disconnected: Arc<CallbackList<()>>,
}

impl ConnectionBridge {
    pub fn new(
        queue: LoopHandle,
        stack: Arc<dyn PeripheralStack>,
        timers: Arc<dyn TimerPort>,
        restart_delay_ms: u32,
        connected: Arc<CallbackList<()>>,
        disconnected: Arc<CallbackList<()>>,
    ) -> Self {
        Self {
            queue,
            stack,
            timers,
            restart_delay_ms,
            connected,
            disconnected,
        }
    }
}

impl ServerCallbacks for ConnectionBridge {
    fn on_connect(&self) {
        let callbacks = self.connected.clone();
        self.queue.enqueue(move || {
            debug!("BLE server - connected");
            callbacks.call(&());
        });
    }

    fn on_disconnect(&self) {
        let callbacks = self.disconnected.clone();
        let stack = self.stack.clone();
        let timers = self.timers.clone();
        let delay_ms = self.restart_delay_ms;
        self.queue.enqueue(move || {
            debug!("BLE server - disconnected");
            timers.set_timeout(
                ADVERTISING_RESTART_LABEL,
                delay_ms,
                Box::new(move || {
                    info!("BLE: resuming advertising");
                    stack.start_advertising();
                }),
            );
            callbacks.call(&());
        });
    }
}
