//! Option limits and validation for settings records
//!
//! Every option with bounds has an entry in [`setting_limits`]. Loading a
//! configuration or profile rejects anything outside these bounds; the
//! mutation entry points clamp instead.

use serde::{Deserialize, Serialize};

use crate::constants::{limits, sensors};
use crate::data::types::{SensorBackend, SensorId, Settings, SpeedCode};
use crate::error::{Result, TpfanError};

/// Allowed values of one named option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingLimits {
    Range { min: i64, max: i64 },
    FanSpeeds { values: Vec<u16> },
    Backends { values: Vec<String> },
}

impl SettingLimits {
    fn range(min: impl Into<i64>, max: impl Into<i64>) -> Self {
        Self::Range {
            min: min.into(),
            max: max.into(),
        }
    }
}

/// Look up the limits of an option by name
///
/// Returns `None` for names outside the table.
pub fn setting_limits(option: &str) -> Option<SettingLimits> {
    match option {
        "hysteresis" => Some(SettingLimits::range(
            limits::HYSTERESIS_MIN,
            limits::HYSTERESIS_MAX,
        )),
        "min_interval_duration" => Some(SettingLimits::range(
            limits::MIN_INTERVAL_DURATION_MIN,
            limits::MIN_INTERVAL_DURATION_MAX,
        )),
        "temperature" => Some(SettingLimits::range(
            limits::TEMPERATURE_MIN,
            limits::TEMPERATURE_MAX,
        )),
        "fan_speed" => Some(SettingLimits::FanSpeeds {
            values: SpeedCode::VALID.to_vec(),
        }),
        "sensors" => Some(SettingLimits::Backends {
            values: SensorBackend::ALL
                .iter()
                .map(|b| b.as_str().to_string())
                .collect(),
        }),
        _ => None,
    }
}

/// Validate a sensor id parsed from a file or received from a client
pub fn validate_sensor_id(id: i64) -> Result<SensorId> {
    SensorId::try_from(id)
        .ok()
        .filter(|id| *id < sensors::MAX_SENSORS)
        .ok_or_else(|| {
            TpfanError::config_invalid(
                "sensor id",
                format!("{} is outside 0..{}", id, sensors::MAX_SENSORS),
            )
        })
}

/// Validate a trigger temperature
pub fn validate_temperature(temp: i64) -> Result<i32> {
    if temp < i64::from(limits::TEMPERATURE_MIN) || temp > i64::from(limits::TEMPERATURE_MAX) {
        return Err(TpfanError::config_invalid(
            "temperature",
            format!(
                "can take values between {} and {} only, got {}",
                limits::TEMPERATURE_MIN,
                limits::TEMPERATURE_MAX,
                temp
            ),
        ));
    }
    Ok(temp as i32)
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if !(min..=max).contains(&value) {
        return Err(TpfanError::config_invalid(
            field,
            format!("can take values between {} and {} only, got {}", min, max, value),
        ));
    }
    Ok(())
}

/// Check a fully assembled settings record
///
/// Trigger temperatures and speed codes are checked when the record is
/// built, so only the scalar ranges remain here.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    check_range(
        "hysteresis",
        settings.hysteresis,
        limits::HYSTERESIS_MIN,
        limits::HYSTERESIS_MAX,
    )?;
    check_range(
        "min_interval_duration",
        settings.min_interval_duration,
        limits::MIN_INTERVAL_DURATION_MIN,
        limits::MIN_INTERVAL_DURATION_MAX,
    )?;
    for temps in settings.trigger_points.values() {
        for temp in temps.keys() {
            validate_temperature(i64::from(*temp))?;
        }
    }
    Ok(())
}

/// Clamp a hysteresis value into its limits
pub fn clamp_hysteresis(value: i64) -> u32 {
    value.clamp(
        i64::from(limits::HYSTERESIS_MIN),
        i64::from(limits::HYSTERESIS_MAX),
    ) as u32
}

/// Clamp a dwell interval into its limits
pub fn clamp_min_interval_duration(value: i64) -> u32 {
    value.clamp(
        i64::from(limits::MIN_INTERVAL_DURATION_MIN),
        i64::from(limits::MIN_INTERVAL_DURATION_MAX),
    ) as u32
}

/// Make a client supplied sensor name safe to write back into a config line
pub fn sanitize_sensor_name(id: SensorId, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '\n' && *c != '\r' && *c != '#')
        .map(|c| if c == '=' { '-' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        default_sensor_name(id)
    } else {
        cleaned.to_string()
    }
}

pub fn default_sensor_name(id: SensorId) -> String {
    format!("Sensor {}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_table() {
        assert_eq!(
            setting_limits("hysteresis"),
            Some(SettingLimits::Range { min: 0, max: 10 })
        );
        assert_eq!(
            setting_limits("min_interval_duration"),
            Some(SettingLimits::Range { min: 0, max: 60 })
        );
        match setting_limits("sensors") {
            Some(SettingLimits::Backends { values }) => {
                assert_eq!(values, vec!["ibm_thermal", "tp_hwmon", "lm_sensors"]);
            }
            other => panic!("unexpected limits: {:?}", other),
        }
        assert!(setting_limits("poll_time").is_none());
    }

    #[test]
    fn test_sensor_id_bounds() {
        assert_eq!(validate_sensor_id(15).unwrap(), 15);
        assert!(validate_sensor_id(16).is_err());
        assert!(validate_sensor_id(-1).is_err());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(validate_temperature(0).is_ok());
        assert!(validate_temperature(255).is_ok());
        assert!(validate_temperature(256).is_err());
        assert!(validate_temperature(-5).is_err());
    }

    #[test]
    fn test_validate_settings_ranges() {
        let mut settings = Settings {
            hysteresis: 3,
            min_interval_duration: 10,
            ..Default::default()
        };
        assert!(validate_settings(&settings).is_ok());

        settings.hysteresis = 11;
        assert!(matches!(
            validate_settings(&settings),
            Err(TpfanError::ConfigInvalid { ref field, .. }) if field == "hysteresis"
        ));

        settings.hysteresis = 3;
        settings.min_interval_duration = 61;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_hysteresis(-4), 0);
        assert_eq!(clamp_hysteresis(42), 10);
        assert_eq!(clamp_min_interval_duration(30), 30);
        assert_eq!(clamp_min_interval_duration(600), 60);
    }

    #[test]
    fn test_sanitize_sensor_name() {
        assert_eq!(sanitize_sensor_name(2, "CPU = hot\n"), "CPU - hot");
        assert_eq!(sanitize_sensor_name(4, "   "), "Sensor 4");
        assert_eq!(sanitize_sensor_name(1, "GPU # main"), "GPU  main");
    }
}
