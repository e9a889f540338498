//! Fuzz target: `MaintenanceHandler::handle_write`
//!
//! Writes arbitrary bytes to the maintenance command characteristic and
//! asserts that the handler never panics, always leaves a bounded result
//! and only ever requests a mode change through `ble-mode`.
//!
//! cargo fuzz run fuzz_maintenance_command

#![no_main]

use blectl::adapters::bluedroid::BluedroidStack;
use blectl::app::mode::OperatingMode;
use blectl::handlers::MAX_VALUE_LEN;
use blectl::maintenance::{
    MaintenanceAction, MaintenanceHandler, MAINTENANCE_SERVICE_UUID, RESULT_CHARACTERISTIC_UUID,
};
use blectl::registry::EndpointDescriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let stack = BluedroidStack::new();
    let mut handler = MaintenanceHandler::new();
    handler.setup(&stack).unwrap();
    handler.add_command("noop", "does nothing", Box::new(|_, _| {}));
    handler.add_command("echo", "repeats", Box::new(|args, reply| reply.set(args.concat())));

    if let Some(MaintenanceAction::SetMode(_)) =
        handler.handle_write(&stack, data, OperatingMode::BleOnly)
    {
        let line = core::str::from_utf8(data).expect("mode change from non-UTF-8 write");
        assert_eq!(line.split_whitespace().next(), Some("ble-mode"));
    }

    let result = EndpointDescriptor::new(MAINTENANCE_SERVICE_UUID, RESULT_CHARACTERISTIC_UUID, true);
    let handle = stack.handle_of(&result).unwrap();
    assert!(stack.value(handle).unwrap().len() <= MAX_VALUE_LEN);
});
