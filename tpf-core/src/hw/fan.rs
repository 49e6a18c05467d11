//! Fan control through the thinkpad_acpi fan pseudo-file
//!
//! # Protocol
//!
//! Reading `/proc/acpi/ibm/fan` yields lines such as:
//!
//! ```text
//! status:		enabled
//! speed:		2950
//! level:		auto
//! ```
//!
//! Writing accepts one command per write: `watchdog N`, `enable`,
//! `disable`, `level auto|disengaged|full-speed|N`.
//!
//! The watchdog makes the firmware take over again if no command arrives
//! within N seconds, so every speed update starts by rearming it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::constants::timing;
use crate::data::persistence::read_text_file;
use crate::data::{FanState, SpeedCode};
use crate::error::{Result, TpfanError};

/// Raw access to the fan control file
#[cfg_attr(test, mockall::automock)]
pub trait FanInterface: Send {
    /// Current level and RPM
    fn read_state(&self) -> Result<FanState>;

    /// Write a single command
    fn write_command(&mut self, command: &str) -> Result<()>;
}

/// `/proc/acpi/ibm/fan`
#[derive(Debug, Clone)]
pub struct ProcFan {
    path: PathBuf,
}

impl ProcFan {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FanInterface for ProcFan {
    fn read_state(&self) -> Result<FanState> {
        let contents = read_text_file(&self.path).map_err(|e| TpfanError::FanStateRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        parse_fan_state(&contents).map_err(|reason| TpfanError::FanStateRead {
            path: self.path.clone(),
            reason,
        })
    }

    fn write_command(&mut self, command: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| TpfanError::ActuatorWrite {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        file.write_all(command.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| TpfanError::ActuatorWrite {
                path: self.path.clone(),
                reason: format!("'{}': {}", command, e),
            })
    }
}

/// Decode the contents of the fan file
pub fn parse_fan_state(contents: &str) -> std::result::Result<FanState, String> {
    let mut level = None;
    let mut rpm = 0;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "speed" => {
                rpm = value
                    .parse()
                    .map_err(|_| format!("unexpected fan speed '{}'", value))?;
            }
            "level" => level = Some(decode_level(value)?),
            _ => {}
        }
    }

    level
        .map(|level| FanState { level, rpm })
        .ok_or_else(|| "no level line".to_string())
}

fn decode_level(value: &str) -> std::result::Result<SpeedCode, String> {
    match value {
        "0" => Ok(SpeedCode::OFF),
        "auto" => Ok(SpeedCode::AUTO),
        "disengaged" | "full-speed" => Ok(SpeedCode::FULL_SPEED),
        other => other
            .parse::<u16>()
            .ok()
            .and_then(SpeedCode::from_hardware_level)
            .ok_or_else(|| format!("unknown fan level '{}'", other)),
    }
}

/// Command sequence that moves the fan to `target`
pub fn transition_commands(target: SpeedCode) -> Vec<String> {
    if target == SpeedCode::OFF {
        return vec!["disable".to_string()];
    }
    let level = match target {
        SpeedCode::DISENGAGED => "level disengaged".to_string(),
        SpeedCode::AUTO => "level auto".to_string(),
        SpeedCode::FULL_SPEED => "level full-speed".to_string(),
        other => match other.hardware_level() {
            Some(n) => format!("level {}", n),
            None => "level auto".to_string(),
        },
    };
    vec!["enable".to_string(), level]
}

/// Writes speed decisions and keeps the hardware watchdog armed
pub struct Actuator {
    fan: Box<dyn FanInterface>,
    watchdog_secs: u64,
}

impl Actuator {
    pub fn new(fan: Box<dyn FanInterface>) -> Self {
        Self {
            fan,
            watchdog_secs: timing::WATCHDOG_SECS,
        }
    }

    pub fn fan_state(&self) -> Result<FanState> {
        self.fan.read_state()
    }

    /// Rearm the watchdog, then move to `target` if it differs from `current`
    ///
    /// Write failures are not reported; they happen around suspend/resume
    /// and the next poll writes again.
    pub fn set_speed(&mut self, target: SpeedCode, current: Option<SpeedCode>) {
        if let Err(e) = self.try_set_speed(target, current) {
            debug!("Fan write failed, retrying on next poll: {}", e);
        }
    }

    fn try_set_speed(&mut self, target: SpeedCode, current: Option<SpeedCode>) -> Result<()> {
        trace!("Rearming fan watchdog (+{} s)", self.watchdog_secs);
        self.fan
            .write_command(&format!("watchdog {}", self.watchdog_secs))?;

        if current == Some(target) {
            trace!(level = %target, "Keeping fan level");
            return Ok(());
        }

        debug!(from = ?current.map(SpeedCode::value), to = %target, "Setting fan level");
        for command in transition_commands(target) {
            self.fan.write_command(&command)?;
        }
        Ok(())
    }

    /// Check that the fan file accepts commands
    ///
    /// Hands the fan to the firmware and arms the watchdog. Fails when the
    /// module was loaded without `fan_control=1` or we lack permissions.
    pub fn probe(&mut self) -> Result<()> {
        self.fan
            .write_command("level auto")
            .and_then(|_| {
                self.fan
                    .write_command(&format!("watchdog {}", self.watchdog_secs))
            })
            .map_err(|e| {
                TpfanError::UnsupportedSystem(format!(
                    "cannot control the fan ({}); tpfand needs root and thinkpad_acpi loaded with fan_control=1",
                    e
                ))
            })
    }
}
