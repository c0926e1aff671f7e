//! Console commands, the stand-in for the tray menu.

use anyhow::{Result, anyhow, bail};
use audio_core::{
    AudioBackend, DesiredConfig, DeviceDirectory, DeviceId, DeviceInfo, MirrorHandle,
};
use config::{ConfigManager, SelectionChange};
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;

use crate::types::MenuView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    /// Device id, or its 1-based position in the last listing.
    Input(String),
    Output(String),
    Pause,
    Restart,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let device_arg = |verb: &str| {
            arg.map(str::to_string)
                .ok_or_else(|| anyhow!("usage: {} <number|device id>", verb))
        };
        match verb.as_str() {
            "list" | "ls" => Ok(Command::List),
            "input" => Ok(Command::Input(device_arg("input")?)),
            "output" => Ok(Command::Output(device_arg("output")?)),
            "pause" | "resume" => Ok(Command::Pause),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => bail!("empty command, type `help`"),
            other => bail!("unknown command `{}`, type `help`", other),
        }
    }
}

pub const HELP: &str = "\
Commands:
  list              show devices and the current selection
  input <n|id>      select (or unselect) the loopback input
  output <n|id>     toggle an output
  pause             pause or resume mirroring
  restart           rebuild the mirror from the current selection
  status            show the mirror state
  quit              stop mirroring and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Exit,
}

pub struct AppState<B: AudioBackend> {
    pub handle: MirrorHandle<B>,
    pub config_manager: Arc<ConfigManager>,
    devices: Mutex<Vec<DeviceInfo>>,
    /// Devices as numbered by the last `list`.
    listing: Mutex<Option<Vec<DeviceInfo>>>,
}

impl<B: AudioBackend> AppState<B> {
    pub fn new(handle: MirrorHandle<B>, config_manager: Arc<ConfigManager>) -> Self {
        Self {
            handle,
            config_manager,
            devices: Mutex::new(Vec::new()),
            listing: Mutex::new(None),
        }
    }

    /// Active render devices, re-enumerated only after a device notification.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut cached = self.devices.lock();
        if self.handle.take_devices_changed() {
            match self
                .handle
                .backend()
                .directory()
                .enumerate_active_render_devices()
            {
                Ok(list) => *cached = list,
                Err(e) => log::warn!("Failed to enumerate devices: {}", e),
            }
        }
        cached.clone()
    }

    fn resolve_arg(&self, arg: &str) -> Result<DeviceId> {
        if let Ok(n) = arg.parse::<usize>() {
            let listing = self.listing.lock();
            let devices = listing
                .as_ref()
                .ok_or_else(|| anyhow!("run `list` first to number the devices"))?;
            return n
                .checked_sub(1)
                .and_then(|i| devices.get(i))
                .map(|d| d.id.clone())
                .ok_or_else(|| anyhow!("no device number {}, see `list`", n));
        }
        Ok(DeviceId::from(arg))
    }

    pub fn menu(&self) -> Result<MenuView> {
        self.project(&self.devices())
    }

    fn project(&self, devices: &[DeviceInfo]) -> Result<MenuView> {
        let desired = DesiredConfig::from(&self.config_manager.snapshot());
        let snapshot = self.handle.settle()?;
        Ok(MenuView::project(devices, &desired, &snapshot))
    }

    /// Run one command. Blocks until the mirror has processed it.
    pub fn execute(&self, command: Command) -> Result<Outcome> {
        let reply = match command {
            Command::List => {
                let devices = self.devices();
                let text = self.project(&devices)?.render();
                *self.listing.lock() = Some(devices);
                text
            }
            Command::Input(arg) => {
                let id = self.resolve_arg(&arg)?;
                let change = self
                    .config_manager
                    .update(|cfg| cfg.select_input(id.as_str()))?;
                self.handle.apply_selection(change);
                self.handle.settle()?;
                match change {
                    SelectionChange::Stop => format!("Input {} unselected", id),
                    _ => format!("Input {} selected", id),
                }
            }
            Command::Output(arg) => {
                let id = self.resolve_arg(&arg)?;
                let selected = self
                    .config_manager
                    .update(|cfg| {
                        let change = cfg.toggle_output(id.as_str());
                        (change, cfg.selected_outputs.contains(id.as_str()))
                    })
                    .map(|(change, selected)| {
                        self.handle.apply_selection(change);
                        selected
                    })?;
                self.handle.settle()?;
                if selected {
                    format!("Output {} selected", id)
                } else {
                    format!("Output {} unselected", id)
                }
            }
            Command::Pause => {
                if self.handle.settle()?.hold {
                    self.handle.resume_mirror();
                } else {
                    self.handle.pause_mirror();
                }
                let snap = self.handle.settle()?;
                if snap.hold { "Paused" } else { "Resumed" }.to_string()
            }
            Command::Restart => {
                self.handle.restart_mirror();
                format!("Mirror {:?}", self.handle.settle()?.state)
            }
            Command::Status => {
                let snap = self.handle.settle()?;
                let input = snap
                    .input
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Mirror {:?}, input {}, {} output(s) attached",
                    snap.state,
                    input,
                    snap.outputs.len()
                )
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Outcome::Exit),
        };
        Ok(Outcome::Reply(reply))
    }
}
