//! Constants and configuration values for tpfan
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

/// Daemon version reported over the control interface
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default filesystem locations
pub mod paths {
    /// Data directory holding the `models/` profile tree
    pub const DATA_DIR: &str = "/usr/share/tpfand/";

    /// User configuration file
    pub const CONFIG_PATH: &str = "/etc/tpfand.conf";

    /// PID file written by the daemon wrapper
    pub const PID_PATH: &str = "/var/run/tpfand.pid";

    /// Control socket served by the daemon
    pub const SOCKET_PATH: &str = "/run/tpfand.sock";

    /// thinkpad_acpi thermal pseudo-file
    pub const IBM_THERMAL: &str = "/proc/acpi/ibm/thermal";

    /// thinkpad_acpi hwmon directory (contains tempN_input files)
    pub const TP_HWMON: &str = "/sys/devices/platform/thinkpad_hwmon/";

    /// thinkpad_acpi fan control pseudo-file
    pub const IBM_FAN: &str = "/proc/acpi/ibm/fan";

    /// DMI identification attributes
    pub const DMI_DIR: &str = "/sys/class/dmi/id";

    /// Default sensor probed for the lm_sensors backend on first run
    pub const DEFAULT_LM_SENSOR: &str = "/sys/devices/virtual/hwmon/hwmon0/temp1_input";

    /// Profile tree layout below the data directory
    pub mod models {
        pub const DIR: &str = "models";
        pub const GENERIC: &str = "generic";
        pub const BY_ID: &str = "by-id";
        pub const BY_NAME: &str = "by-name";
    }
}

/// Control loop timing
pub mod timing {
    /// Normal poll period in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 3500;

    /// Hardware watchdog window in seconds.
    /// thinkpad_acpi accepts 1..=120, anything above 5 is unsafe.
    pub const WATCHDOG_SECS: u64 = 5;

    /// Smallest allowed gap between polls in milliseconds
    pub const MIN_POLL_INTERVAL_MS: u64 = 1;
}

/// Sensor layout
pub mod sensors {
    /// Number of addressable sensor ids (0..16)
    pub const MAX_SENSORS: u8 = 16;

    /// Thermal pseudo-file tokens meaning "sensor disabled"
    pub const IBM_THERMAL_DISABLED_TOKENS: &[&str] = &["-128", "-1", "0", "1", "128"];

    /// hwmon / lm-sensors tokens (millidegrees) meaning "sensor disabled"
    pub const HWMON_DISABLED_TOKENS: &[&str] = &["-128000", "-1000", "0", "1000", "128000"];

    /// hwmon reports millidegrees Celsius
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;
}

/// Option limits, as served by `get_setting_limits`
pub mod limits {
    pub const HYSTERESIS_MIN: u32 = 0;
    pub const HYSTERESIS_MAX: u32 = 10;

    pub const MIN_INTERVAL_DURATION_MIN: u32 = 0;
    pub const MIN_INTERVAL_DURATION_MAX: u32 = 60;

    pub const TEMPERATURE_MIN: i32 = 0;
    pub const TEMPERATURE_MAX: i32 = 255;
}

/// Values written into freshly generated configuration files
pub mod defaults {
    pub const HYSTERESIS: u32 = 3;
    pub const MIN_INTERVAL_DURATION: u32 = 10;

    /// Header written at the top of every generated configuration file
    pub const CONFIG_HEADER: &str = "#
# tpfand configuration file
#
# Options:
# enabled = [True / False]
# override_profile = [True / False]
#
# sensors = [ibm_thermal / tp_hwmon / lm_sensors]
#
# Trigger point syntax:
# [sensor-id]. [human readable sensor name] = [temperature]:[fan level] ...
# [fan level] = 0: fan off
# [fan level] = 2..8: fan levels 1..7
# [fan level] = 254: disengaged, 255: hardware controlled, 256: full speed
#
# [sensor-id]. [path to the sensor] : lm_sensors
#
# hysteresis = [hysteresis temperature difference]
# min_interval_duration = [seconds before the fan may slow down]
#
# override_profile = True has to be specified before profile parameters
# or trigger points are changed in the configuration file.
# tpfand may regenerate this file at any time. Custom comments will be lost.
#

";
}
