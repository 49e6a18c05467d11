//! Filesystem locations used by the daemon
//!
//! Every path the core touches is collected here so tests and the CLI can
//! point the whole daemon at another tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{paths, sensors};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPaths {
    pub config: PathBuf,
    pub data_dir: PathBuf,
    pub ibm_thermal: PathBuf,
    pub tp_hwmon: PathBuf,
    pub ibm_fan: PathBuf,
    pub dmi_dir: PathBuf,
    /// Sensor probed for the lm_sensors backend on first run
    pub default_lm_sensor: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            config: PathBuf::from(paths::CONFIG_PATH),
            data_dir: PathBuf::from(paths::DATA_DIR),
            ibm_thermal: PathBuf::from(paths::IBM_THERMAL),
            tp_hwmon: PathBuf::from(paths::TP_HWMON),
            ibm_fan: PathBuf::from(paths::IBM_FAN),
            dmi_dir: PathBuf::from(paths::DMI_DIR),
            default_lm_sensor: PathBuf::from(paths::DEFAULT_LM_SENSOR),
        }
    }
}

impl SystemPaths {
    /// Lay out every location below `root`, mirroring the real filesystem
    ///
    /// Used by tests and for running against a captured system image.
    pub fn under(root: &Path) -> Self {
        let rebase = |p: &str| root.join(p.trim_start_matches('/'));
        Self {
            config: rebase(paths::CONFIG_PATH),
            data_dir: rebase(paths::DATA_DIR),
            ibm_thermal: rebase(paths::IBM_THERMAL),
            tp_hwmon: rebase(paths::TP_HWMON),
            ibm_fan: rebase(paths::IBM_FAN),
            dmi_dir: rebase(paths::DMI_DIR),
            default_lm_sensor: rebase(paths::DEFAULT_LM_SENSOR),
        }
    }

    /// `models/` directory inside the data directory
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join(paths::models::DIR)
    }

    /// thinkpad_hwmon input files, `temp1_input` .. `temp16_input`
    pub fn tp_hwmon_sensors(&self) -> Vec<PathBuf> {
        (1..=sensors::MAX_SENSORS)
            .map(|i| self.tp_hwmon.join(format!("temp{}_input", i)))
            .collect()
    }
}
