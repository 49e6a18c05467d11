//! Core data types for tpfand
//!
//! Defines the settings record, speed codes, sensor readings and the
//! per-sensor trip state used by the control loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TpfanError;

/// Sensor index, `0..MAX_SENSORS`
pub type SensorId = u8;

/// Trigger temperature (°C) to speed mapping for one sensor
pub type TriggerSet = BTreeMap<i32, SpeedCode>;

/// Discrete fan speed understood by thinkpad_acpi
///
/// 0 = off, 2..=8 = graduated levels 1..7, 254 = disengaged,
/// 255 = firmware auto, 256 = forced full speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeedCode(u16);

impl SpeedCode {
    pub const OFF: SpeedCode = SpeedCode(0);
    pub const DISENGAGED: SpeedCode = SpeedCode(254);
    pub const AUTO: SpeedCode = SpeedCode(255);
    pub const FULL_SPEED: SpeedCode = SpeedCode(256);

    /// Every code accepted in a trigger set
    pub const VALID: [u16; 11] = [0, 2, 3, 4, 5, 6, 7, 8, 254, 255, 256];

    /// Build a speed code, rejecting values outside the fixed set
    pub fn new(value: u16) -> Option<Self> {
        Self::VALID.contains(&value).then_some(Self(value))
    }

    /// Graduated level 1..=7 as written to the fan file (`level N`)
    pub fn from_hardware_level(level: u16) -> Option<Self> {
        (1..=7).contains(&level).then(|| Self(level + 1))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Graduated hardware level for codes 2..=8
    pub fn hardware_level(self) -> Option<u16> {
        (2..=8).contains(&self.0).then(|| self.0 - 1)
    }
}

impl Default for SpeedCode {
    fn default() -> Self {
        Self::OFF
    }
}

impl fmt::Display for SpeedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for SpeedCode {
    type Error = TpfanError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .ok()
            .and_then(SpeedCode::new)
            .ok_or_else(|| {
                TpfanError::config_invalid(
                    "fan_speed",
                    format!("{} is not one of {:?}", value, SpeedCode::VALID),
                )
            })
    }
}

/// Where temperatures are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    /// `/proc/acpi/ibm/thermal`, one line for all sensors
    #[default]
    IbmThermal,
    /// thinkpad_hwmon `tempN_input` files
    TpHwmon,
    /// arbitrary hwmon files listed in the configuration
    LmSensors,
}

impl SensorBackend {
    pub const ALL: [SensorBackend; 3] = [Self::IbmThermal, Self::TpHwmon, Self::LmSensors];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IbmThermal => "ibm_thermal",
            Self::TpHwmon => "tp_hwmon",
            Self::LmSensors => "lm_sensors",
        }
    }
}

impl fmt::Display for SensorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorBackend {
    type Err = TpfanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str() == s)
            .ok_or_else(|| {
                TpfanError::config_invalid(
                    "sensors",
                    format!("'{}' is not one of ibm_thermal, tp_hwmon, lm_sensors", s),
                )
            })
    }
}

/// One temperature sample
///
/// `None` means the sensor could not be read at all. `Some(0)` is the
/// disabled sentinel: the sensor exists but reports no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub value: Option<i32>,
}

impl SensorReading {
    /// Reading that takes part in trip evaluation
    pub fn active_value(&self) -> Option<i32> {
        self.value.filter(|v| *v != 0)
    }
}

/// Armed trip for one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripState {
    /// Reading must stay at or above this to keep the trip
    pub armed_threshold: i32,
    pub locked_speed: SpeedCode,
}

/// Fan state read back from the control file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanState {
    pub level: SpeedCode,
    pub rpm: u32,
}

/// Active, validated settings record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub override_profile: bool,
    pub sensor_backend: SensorBackend,
    pub hysteresis: u32,
    pub min_interval_duration: u32,
    pub sensor_names: BTreeMap<SensorId, String>,
    pub trigger_points: BTreeMap<SensorId, TriggerSet>,
    pub lm_sensor_paths: BTreeMap<SensorId, PathBuf>,
    pub comment: String,
}

/// DMI identity of the running machine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineIdentity {
    pub vendor: String,
    pub product_version: String,
    pub product_name: String,
}

impl MachineIdentity {
    /// Key into `models/by-id/`
    pub fn product_id(&self) -> String {
        if self.is_unknown() {
            return String::new();
        }
        format!("{}_{}", self.vendor, self.product_name).to_lowercase()
    }

    /// Key whose prefixes are looked up in `models/by-name/`
    pub fn product_name_slug(&self) -> String {
        if self.is_unknown() {
            return String::new();
        }
        format!("{}_{}", self.vendor, self.product_version)
            .to_lowercase()
            .replace('/', "-")
            .replace(' ', "_")
    }

    pub fn is_unknown(&self) -> bool {
        self.vendor.is_empty() && self.product_version.is_empty() && self.product_name.is_empty()
    }
}

/// Model information served to clients
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub vendor: String,
    pub name: String,
    pub id: String,
    pub profile_name: String,
    pub profile_id: String,
}

impl From<&MachineIdentity> for ModelInfo {
    fn from(identity: &MachineIdentity) -> Self {
        Self {
            vendor: identity.vendor.clone(),
            name: identity.product_version.clone(),
            id: identity.product_name.clone(),
            profile_name: identity.product_name_slug(),
            profile_id: identity.product_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_code_set() {
        assert!(SpeedCode::new(1).is_none());
        assert!(SpeedCode::new(9).is_none());
        assert_eq!(SpeedCode::new(254), Some(SpeedCode::DISENGAGED));
        assert_eq!(SpeedCode::new(5).and_then(|s| s.hardware_level()), Some(4));
        assert_eq!(SpeedCode::AUTO.hardware_level(), None);
        assert!(SpeedCode::try_from(-2).is_err());
    }

    #[test]
    fn test_speed_code_orders_numerically() {
        assert!(SpeedCode::FULL_SPEED > SpeedCode::AUTO);
        assert!(SpeedCode::new(8).unwrap() > SpeedCode::new(2).unwrap());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("tp_hwmon".parse::<SensorBackend>().unwrap(), SensorBackend::TpHwmon);
        assert!("libsensors".parse::<SensorBackend>().is_err());
        assert_eq!(
            serde_json::to_string(&SensorBackend::LmSensors).unwrap(),
            "\"lm_sensors\""
        );
    }

    #[test]
    fn test_machine_identity_keys() {
        let identity = MachineIdentity {
            vendor: "LENOVO".to_string(),
            product_version: "ThinkPad X1/Carbon".to_string(),
            product_name: "20AB".to_string(),
        };
        assert_eq!(identity.product_id(), "lenovo_20ab");
        assert_eq!(identity.product_name_slug(), "lenovo_thinkpad_x1-carbon");
        assert_eq!(MachineIdentity::default().product_id(), "");
    }

    #[test]
    fn test_disabled_sentinel_is_inactive() {
        let reading = SensorReading { sensor_id: 0, value: Some(0) };
        assert_eq!(reading.active_value(), None);
        let reading = SensorReading { sensor_id: 1, value: Some(45) };
        assert_eq!(reading.active_value(), Some(45));
    }
}
