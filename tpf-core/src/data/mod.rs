//! Data types, configuration format, profiles and validation
//!
//! Contains the settings model and everything that reads or writes it.

pub mod config;
pub mod persistence;
pub mod profile;
mod types;
pub mod validation;

pub use config::{render_config, render_profile, ConfigFragment, ConfigStore};
pub use persistence::create_default_config;
pub use profile::{LoadedProfile, ProfileMatch, ProfileMatcher};
pub use types::{
    FanState, MachineIdentity, ModelInfo, SensorBackend, SensorId, SensorReading, Settings,
    SpeedCode, TriggerSet, TripState,
};
pub use validation::{setting_limits, SettingLimits};
