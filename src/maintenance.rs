//! Maintenance command service.
//!
//! Always present on the GATT server, whatever the operating mode, so a
//! device switched to WiFi-only can still be switched back over BLE.
//!
//! ```text
//!  central ──write "ble-mode 1"──▶ [command char] ──▶ InboundWrites
//!                                                        │ (loop thread)
//!                                                        ▼
//!  central ◀──notify "…"──────── [result char] ◀── MaintenanceHandler
//! ```
//!
//! A command line is split on whitespace: the first word selects the
//! command, the rest are its arguments.

use std::fmt::Write;

use log::{debug, info, warn};

use crate::app::mode::OperatingMode;
use crate::app::ports::{CharacteristicHandle, CharacteristicProperties, PeripheralStack};
use crate::error::StackError;
use crate::handlers::clip;
use crate::registry::{BleUuid, EndpointDescriptor};

pub const MAINTENANCE_SERVICE_UUID: BleUuid =
    BleUuid::Uuid128(0x7ae7_f5fc_a1a2_4e63_8b76_7c3d_4d0f_1a00);
pub const COMMAND_CHARACTERISTIC_UUID: BleUuid =
    BleUuid::Uuid128(0x7ae7_f5fc_a1a2_4e63_8b76_7c3d_4d0f_1a01);
pub const RESULT_CHARACTERISTIC_UUID: BleUuid =
    BleUuid::Uuid128(0x7ae7_f5fc_a1a2_4e63_8b76_7c3d_4d0f_1a02);

/// Arguments accepted after the command name.
pub const MAX_COMMAND_ARGS: usize = 8;

const HELP: &str = "help";
const BLE_MODE: &str = "ble-mode";

/// Custom command body; receives the arguments on the loop thread and may
/// answer through the [`CommandReply`].
pub type CommandTrigger = Box<dyn Fn(&[&str], &mut CommandReply) + Send>;

/// Result text a custom command leaves for the result characteristic.
#[derive(Debug, Default)]
pub struct CommandReply {
    text: Option<String>,
}

impl CommandReply {
    /// Replace the reply; the last call wins.
    pub fn set(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Work the controller must carry out on behalf of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    /// Persist the raw mode value and restart.
    SetMode(u8),
}

enum CommandBody {
    Help,
    BleMode,
    Custom(CommandTrigger),
}

struct Command {
    name: String,
    description: String,
    body: CommandBody,
}

pub struct MaintenanceHandler {
    commands: Vec<Command>,
    command_handle: Option<CharacteristicHandle>,
    result_handle: Option<CharacteristicHandle>,
}

impl MaintenanceHandler {
    pub fn new() -> Self {
        Self {
            commands: vec![
                Command {
                    name: HELP.into(),
                    description: "lists the available commands".into(),
                    body: CommandBody::Help,
                },
                Command {
                    name: BLE_MODE.into(),
                    description: "shows or sets the BLE mode: 0 = BLE only, 1 = BLE + WiFi, 2 = WiFi only"
                        .into(),
                    body: CommandBody::BleMode,
                },
            ],
            command_handle: None,
            result_handle: None,
        }
    }

    /// Register a custom command. A later registration with the same name
    /// replaces the earlier one; built-in names cannot be taken.
    pub fn add_command(&mut self, name: &str, description: &str, trigger: CommandTrigger) -> bool {
        if name.is_empty() || name.contains(char::is_whitespace) {
            warn!("Maintenance: invalid command name '{}'", name);
            return false;
        }
        let command = Command {
            name: name.to_owned(),
            description: description.to_owned(),
            body: CommandBody::Custom(trigger),
        };
        match self.commands.iter_mut().find(|c| c.name == name) {
            Some(existing) if !matches!(existing.body, CommandBody::Custom(_)) => {
                warn!("Maintenance: '{}' is a built-in command", name);
                false
            }
            Some(existing) => {
                *existing = command;
                true
            }
            None => {
                self.commands.push(command);
                true
            }
        }
    }

    /// `(name, description)` of every command, built-ins first.
    pub fn commands(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .iter()
            .map(|c| (c.name.as_str(), c.description.as_str()))
    }

    /// Create the maintenance service on a freshly created server.
    pub fn setup(&mut self, stack: &dyn PeripheralStack) -> Result<(), StackError> {
        let command = EndpointDescriptor::new(MAINTENANCE_SERVICE_UUID, COMMAND_CHARACTERISTIC_UUID, false);
        let result = EndpointDescriptor::new(MAINTENANCE_SERVICE_UUID, RESULT_CHARACTERISTIC_UUID, true);
        self.command_handle = Some(stack.create_characteristic(
            &command,
            CharacteristicProperties {
                read: false,
                write: true,
                notify: false,
            },
        )?);
        self.result_handle = Some(stack.create_characteristic(
            &result,
            CharacteristicProperties {
                read: true,
                write: false,
                notify: true,
            },
        )?);
        info!("Maintenance: service ready ({} commands)", self.commands.len());
        Ok(())
    }

    /// Whether `handle` is the command characteristic.
    pub fn owns(&self, handle: CharacteristicHandle) -> bool {
        self.command_handle == Some(handle)
    }

    /// Execute a command line written by a central.
    pub fn handle_write(
        &self,
        stack: &dyn PeripheralStack,
        data: &[u8],
        mode: OperatingMode,
    ) -> Option<MaintenanceAction> {
        let Ok(line) = core::str::from_utf8(data) else {
            self.set_command_result(stack, "Invalid command encoding");
            return None;
        };
        let mut words = line.split_whitespace();
        let name = words.next()?;
        let mut args: heapless::Vec<&str, MAX_COMMAND_ARGS> = heapless::Vec::new();
        for word in words {
            if args.push(word).is_err() {
                self.set_command_result(stack, "Too many arguments");
                return None;
            }
        }

        let Some(command) = self.commands.iter().find(|c| c.name == name) else {
            let mut reply = String::new();
            let _ = write!(reply, "Unknown command: {}", name);
            self.set_command_result(stack, &reply);
            return None;
        };
        debug!("Maintenance: executing '{}' {:?}", name, args.as_slice());

        match &command.body {
            CommandBody::Help => {
                let mut reply = String::new();
                for (i, (name, description)) in self.commands().enumerate() {
                    if i > 0 {
                        reply.push('\n');
                    }
                    let _ = write!(reply, "{}: {}", name, description);
                }
                self.set_command_result(stack, &reply);
                None
            }
            CommandBody::BleMode => self.ble_mode(stack, &args, mode),
            CommandBody::Custom(trigger) => {
                let mut reply = CommandReply::default();
                trigger(&args, &mut reply);
                if let Some(text) = reply.text() {
                    self.set_command_result(stack, text);
                }
                None
            }
        }
    }

    fn ble_mode(
        &self,
        stack: &dyn PeripheralStack,
        args: &[&str],
        mode: OperatingMode,
    ) -> Option<MaintenanceAction> {
        match args {
            [] => {
                let mut reply = String::new();
                let _ = write!(reply, "BLE mode: {} ({})", mode.as_u8(), mode);
                self.set_command_result(stack, &reply);
                None
            }
            [raw] => match raw.parse::<u8>() {
                Ok(raw) => Some(MaintenanceAction::SetMode(raw)),
                Err(_) => {
                    self.set_command_result(stack, "BLE mode must be 0, 1 or 2");
                    None
                }
            },
            _ => {
                self.set_command_result(stack, "Usage: ble-mode [0|1|2]");
                None
            }
        }
    }

    /// Publish a command result to the result characteristic.
    pub fn set_command_result(&self, stack: &dyn PeripheralStack, text: &str) {
        let Some(handle) = self.result_handle else {
            debug!("Maintenance: no result characteristic, dropping '{}'", text);
            return;
        };
        stack.set_value(handle, clip(text).as_bytes());
        stack.notify(handle);
    }
}

impl Default for MaintenanceHandler {
    fn default() -> Self {
        Self::new()
    }
}
