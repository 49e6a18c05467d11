//! Command line interface for tpfand

use std::path::PathBuf;

use clap::Parser;
use tpf_core::constants::paths;
use tpf_core::{ServiceOptions, SystemPaths};

#[derive(Debug, Parser)]
#[command(name = "tpfand")]
#[command(version)]
#[command(about = "tpfand - temperature driven fan control for ThinkPads")]
#[command(long_about = "tpfand - temperature driven fan control for ThinkPads

Reads the ThinkPad temperature sensors, picks a fan level from per-sensor
trip points and rearms the firmware watchdog on every poll. On exit the
fan is handed back to the firmware.

Requires root and the thinkpad_acpi module loaded with fan_control=1.

ENVIRONMENT VARIABLES:
    TPFAN_LOG=debug        Log filter (trace, debug, info, warn, error)

FILES:
    /etc/tpfand.conf                 User configuration
    /usr/share/tpfand/models/        Hardware profiles")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Never pick /proc/acpi/ibm/thermal when generating a configuration
    #[arg(long)]
    pub no_ibm_thermal: bool,

    /// Control socket path
    #[arg(short, long, default_value = paths::SOCKET_PATH)]
    pub socket: PathBuf,

    /// Configuration file
    #[arg(short, long, default_value = paths::CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory holding the hardware profiles
    #[arg(long, default_value = paths::DATA_DIR)]
    pub data_dir: PathBuf,

    /// PID file
    #[arg(long, default_value = paths::PID_PATH)]
    pub pid_file: PathBuf,

    /// thinkpad_acpi thermal file
    #[arg(long, default_value = paths::IBM_THERMAL)]
    pub thermal_file: PathBuf,

    /// thinkpad_hwmon directory holding tempN_input files
    #[arg(long, default_value = paths::TP_HWMON)]
    pub hwmon_dir: PathBuf,

    /// thinkpad_acpi fan control file
    #[arg(long, default_value = paths::IBM_FAN)]
    pub fan_file: PathBuf,

    /// DMI attribute directory used to pick hardware profiles
    #[arg(long, default_value = paths::DMI_DIR)]
    pub dmi_dir: PathBuf,

    /// Sensor probed for lm_sensors when generating a configuration
    #[arg(long, default_value = paths::DEFAULT_LM_SENSOR)]
    pub lm_sensor: PathBuf,

    /// Poll period in milliseconds, capped by the fan watchdog
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,
}

impl Cli {
    /// Log filter requested on the command line, if any
    pub fn log_level(&self) -> Option<&'static str> {
        if self.debug {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }

    pub fn system_paths(&self) -> SystemPaths {
        SystemPaths {
            config: self.config.clone(),
            data_dir: self.data_dir.clone(),
            ibm_thermal: self.thermal_file.clone(),
            tp_hwmon: self.hwmon_dir.clone(),
            ibm_fan: self.fan_file.clone(),
            dmi_dir: self.dmi_dir.clone(),
            default_lm_sensor: self.lm_sensor.clone(),
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            skip_ibm_thermal: self.no_ibm_thermal,
            poll_interval_ms: self.poll_interval,
        }
    }
}
