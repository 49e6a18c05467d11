use serde::{Deserialize, Serialize};

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Number of sensor slots a client may address
pub const SENSOR_SLOTS: u8 = 16;

const MAX_OPTION_LENGTH: usize = 64;

const MAX_SENSOR_NAME_LENGTH: usize = 128;

const MAX_TRIGGERS_PER_SENSOR: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

/// The fixed method table served by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    GetVersion,
    GetTemperatures,
    GetFanState,
    ResetTrips,
    GetTripTemperatures,
    GetTripFanSpeeds,
    GetModelInfo,
    GetLoadedProfiles,
    GetProfileComment,
    IsProfileExactlyMatched,
    GetSensorCount,
    GetSettingLimits { option: String },
    GetSettings,
    SetSettings { settings: SettingsPatch },
    GetSensorNames,
    SetSensorNames { names: Vec<SensorName> },
    GetTriggerPoints,
    /// Replaces the trigger set of every listed sensor
    SetTriggerPoints { points: Vec<SensorTriggers> },
    Save,
    GetProfileString,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::GetVersion
            | Request::GetTemperatures
            | Request::GetFanState
            | Request::ResetTrips
            | Request::GetTripTemperatures
            | Request::GetTripFanSpeeds
            | Request::GetModelInfo
            | Request::GetLoadedProfiles
            | Request::GetProfileComment
            | Request::IsProfileExactlyMatched
            | Request::GetSensorCount
            | Request::GetSettings
            | Request::GetSensorNames
            | Request::GetTriggerPoints
            | Request::Save
            | Request::GetProfileString => Ok(()),

            Request::GetSettingLimits { option } => validate_option_name(option),
            Request::SetSettings { settings } => settings.validate(),

            Request::SetSensorNames { names } => {
                for entry in names {
                    validate_sensor_slot(entry.sensor)?;
                    if entry.name.len() > MAX_SENSOR_NAME_LENGTH {
                        return Err(format!(
                            "Sensor name too long: {} > {} chars",
                            entry.name.len(),
                            MAX_SENSOR_NAME_LENGTH
                        ));
                    }
                }
                validate_unique_slots(names.iter().map(|n| n.sensor))
            }

            Request::SetTriggerPoints { points } => {
                for entry in points {
                    validate_sensor_slot(entry.sensor)?;
                    if entry.triggers.len() > MAX_TRIGGERS_PER_SENSOR {
                        return Err(format!(
                            "Too many trigger points for sensor {} (maximum {})",
                            entry.sensor, MAX_TRIGGERS_PER_SENSOR
                        ));
                    }
                }
                validate_unique_slots(points.iter().map(|p| p.sensor))
            }
        }
    }

    /// Whether the request changes daemon state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::ResetTrips
                | Request::SetSettings { .. }
                | Request::SetSensorNames { .. }
                | Request::SetTriggerPoints { .. }
                | Request::Save
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::GetVersion => "GetVersion",
            Request::GetTemperatures => "GetTemperatures",
            Request::GetFanState => "GetFanState",
            Request::ResetTrips => "ResetTrips",
            Request::GetTripTemperatures => "GetTripTemperatures",
            Request::GetTripFanSpeeds => "GetTripFanSpeeds",
            Request::GetModelInfo => "GetModelInfo",
            Request::GetLoadedProfiles => "GetLoadedProfiles",
            Request::GetProfileComment => "GetProfileComment",
            Request::IsProfileExactlyMatched => "IsProfileExactlyMatched",
            Request::GetSensorCount => "GetSensorCount",
            Request::GetSettingLimits { .. } => "GetSettingLimits",
            Request::GetSettings => "GetSettings",
            Request::SetSettings { .. } => "SetSettings",
            Request::GetSensorNames => "GetSensorNames",
            Request::SetSensorNames { .. } => "SetSensorNames",
            Request::GetTriggerPoints => "GetTriggerPoints",
            Request::SetTriggerPoints { .. } => "SetTriggerPoints",
            Request::Save => "Save",
            Request::GetProfileString => "GetProfileString",
        }
    }
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_duration: Option<i64>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled.is_none()
            && self.override_profile.is_none()
            && self.hysteresis.is_none()
            && self.min_interval_duration.is_none()
        {
            return Err("Settings update is empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response payload; exactly the field matching the request is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperatures: Option<Vec<Temperature>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_state: Option<FanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_temperatures: Option<Vec<SensorValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_speeds: Option<Vec<SensorValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<OptionLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_names: Option<Vec<SensorName>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_points: Option<Vec<SensorTriggers>>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn boolean(b: bool) -> Self { Self { flag: Some(b), ..Self::default() } }
    pub fn number(n: u32) -> Self { Self { count: Some(n), ..Self::default() } }
    pub fn temps(t: Vec<Temperature>) -> Self { Self { temperatures: Some(t), ..Self::default() } }
    pub fn fan(f: FanStatus) -> Self { Self { fan_state: Some(f), ..Self::default() } }
    pub fn trips(t: Vec<SensorValue>) -> Self { Self { trip_temperatures: Some(t), ..Self::default() } }
    pub fn speeds(s: Vec<SensorValue>) -> Self { Self { trip_speeds: Some(s), ..Self::default() } }
    pub fn model(m: ModelInfo) -> Self { Self { model_info: Some(m), ..Self::default() } }
    pub fn profile_list(p: Vec<String>) -> Self { Self { profiles: Some(p), ..Self::default() } }
    pub fn option_limits(l: OptionLimits) -> Self { Self { limits: Some(l), ..Self::default() } }
    pub fn snapshot(s: SettingsSnapshot) -> Self { Self { settings: Some(s), ..Self::default() } }
    pub fn names(n: Vec<SensorName>) -> Self { Self { sensor_names: Some(n), ..Self::default() } }
    pub fn triggers(t: Vec<SensorTriggers>) -> Self { Self { trigger_points: Some(t), ..Self::default() } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Temperature {
    pub sensor: u8,
    /// Degrees Celsius; `None` when the sensor could not be read, 0 when disabled
    pub celsius: Option<i32>,
}

/// Per-sensor scalar; sensor-keyed data travels as lists of entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorValue {
    pub sensor: u8,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorName {
    pub sensor: u8,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPoint {
    pub temperature: i64,
    pub speed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTriggers {
    pub sensor: u8,
    pub triggers: Vec<TriggerPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanStatus {
    /// Speed code of the current level (0, 2..8, 255 auto, 256 full speed)
    pub level: u16,
    pub rpm: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub vendor: String,
    pub name: String,
    pub id: String,
    pub profile_name: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub enabled: bool,
    pub override_profile: bool,
    pub hysteresis: u32,
    pub min_interval_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionLimits {
    Range { min: i64, max: i64 },
    FanSpeeds { values: Vec<u16> },
    Backends { values: Vec<String> },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_bool(b: bool) -> Self {
        Response::Ok(ResponseData::boolean(b))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_sensor_slot(id: u8) -> Result<(), String> {
    if id >= SENSOR_SLOTS {
        return Err(format!(
            "Sensor id out of range (0-{})",
            SENSOR_SLOTS - 1
        ));
    }
    Ok(())
}

fn validate_unique_slots(slots: impl Iterator<Item = u8>) -> Result<(), String> {
    let mut seen = [false; SENSOR_SLOTS as usize];
    for slot in slots {
        let seen = &mut seen[slot as usize];
        if *seen {
            return Err(format!("Sensor {} listed more than once", slot));
        }
        *seen = true;
    }
    Ok(())
}

pub fn validate_option_name(option: &str) -> Result<(), String> {
    if option.is_empty() {
        return Err("Option name cannot be empty".into());
    }
    if option.len() > MAX_OPTION_LENGTH {
        return Err(format!(
            "Option name too long: {} > {} chars",
            option.len(),
            MAX_OPTION_LENGTH
        ));
    }
    if let Some(c) = option
        .chars()
        .find(|c| !c.is_ascii_lowercase() && *c != '_')
    {
        return Err(format!("Option name contains invalid character: {:?}", c));
    }
    Ok(())
}
