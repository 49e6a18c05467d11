//! Temperature sensor backends
//!
//! Three interchangeable sources, selected by `Settings::sensor_backend`:
//!
//! - `ibm_thermal`: one line in `/proc/acpi/ibm/thermal`, label first, then
//!   one integer per sensor in °C. Any failure aborts the whole read.
//! - `tp_hwmon`: `temp1_input`..`temp16_input` below the thinkpad_hwmon
//!   directory, millidegrees.
//! - `lm_sensors`: arbitrary hwmon files listed in the settings, millidegrees.
//!
//! For the file based backends a sensor that cannot be read simply has no
//! value; the other sensors still report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::sensors::{
    HWMON_DISABLED_TOKENS, IBM_THERMAL_DISABLED_TOKENS, MAX_SENSORS, MILLIDEGREE_DIVISOR,
};
use crate::data::persistence::read_text_file;
use crate::data::{SensorBackend, SensorId, SensorReading, Settings};
use crate::error::{Result, TpfanError};
use crate::system::SystemPaths;

#[derive(Debug, Clone)]
pub struct SensorReader {
    ibm_thermal: PathBuf,
    tp_hwmon_sensors: Vec<PathBuf>,
}

impl SensorReader {
    pub fn new(paths: &SystemPaths) -> Self {
        Self {
            ibm_thermal: paths.ibm_thermal.clone(),
            tp_hwmon_sensors: paths.tp_hwmon_sensors(),
        }
    }

    /// Read all sensors of the configured backend
    ///
    /// Only `ibm_thermal` can fail as a whole.
    pub fn read(&self, settings: &Settings) -> Result<Vec<SensorReading>> {
        self.read_backend(settings.sensor_backend, &settings.lm_sensor_paths)
    }

    pub fn read_backend(
        &self,
        backend: SensorBackend,
        lm_sensor_paths: &BTreeMap<SensorId, PathBuf>,
    ) -> Result<Vec<SensorReading>> {
        match backend {
            SensorBackend::IbmThermal => self.read_ibm_thermal(),
            SensorBackend::TpHwmon => Ok(read_millidegree_files(
                self.tp_hwmon_sensors
                    .iter()
                    .enumerate()
                    .map(|(i, path)| (i as SensorId, path.as_path())),
            )),
            SensorBackend::LmSensors => Ok(read_millidegree_files(
                lm_sensor_paths.iter().map(|(id, path)| (*id, path.as_path())),
            )),
        }
    }

    fn read_ibm_thermal(&self) -> Result<Vec<SensorReading>> {
        let contents = read_text_file(&self.ibm_thermal)
            .map_err(|e| TpfanError::sensor_unavailable(&self.ibm_thermal, e.to_string()))?;
        let line = contents.lines().next().unwrap_or_default();

        line.split_whitespace()
            .skip(1)
            .take(MAX_SENSORS as usize)
            .enumerate()
            .map(|(i, token)| {
                let value = if IBM_THERMAL_DISABLED_TOKENS.contains(&token) {
                    0
                } else {
                    token.parse::<i32>().map_err(|_| {
                        TpfanError::sensor_unavailable(
                            &self.ibm_thermal,
                            format!("unexpected token '{}'", token),
                        )
                    })?
                };
                Ok(SensorReading {
                    sensor_id: i as SensorId,
                    value: Some(value),
                })
            })
            .collect()
    }

    /// Ids of sensors that currently deliver a usable temperature
    ///
    /// Used when generating a first configuration file.
    pub fn working_sensors(
        &self,
        backend: SensorBackend,
        lm_sensor_paths: &BTreeMap<SensorId, PathBuf>,
    ) -> Vec<SensorId> {
        match self.read_backend(backend, lm_sensor_paths) {
            Ok(readings) => readings
                .iter()
                .filter(|r| r.active_value().is_some())
                .map(|r| r.sensor_id)
                .collect(),
            Err(e) => {
                debug!("Backend {} not usable: {}", backend, e);
                Vec::new()
            }
        }
    }
}

fn read_millidegree_files<'a>(
    files: impl Iterator<Item = (SensorId, &'a Path)>,
) -> Vec<SensorReading> {
    files
        .map(|(sensor_id, path)| SensorReading {
            sensor_id,
            value: read_millidegree_file(path),
        })
        .collect()
}

fn read_millidegree_file(path: &Path) -> Option<i32> {
    let contents = match read_text_file(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("Sensor {:?} is not available: {}", path, e);
            return None;
        }
    };
    let token = contents.lines().next().unwrap_or_default().trim();
    if HWMON_DISABLED_TOKENS.contains(&token) {
        return Some(0);
    }
    match token.parse::<f64>() {
        Ok(millidegrees) => Some((millidegrees / MILLIDEGREE_DIVISOR) as i32),
        Err(_) => {
            debug!("Sensor {:?} returned unparsable value '{}'", path, token);
            None
        }
    }
}
