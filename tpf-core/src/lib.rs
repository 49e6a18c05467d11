//! tpfand Core Library
//!
//! Temperature driven fan control for IBM/Lenovo ThinkPads through the
//! thinkpad_acpi kernel interface.
//!
//! # Features
//!
//! - **Sensor backends**: `/proc/acpi/ibm/thermal`, thinkpad_hwmon or any hwmon file
//! - **Trip points**: per-sensor temperature thresholds with hysteresis
//! - **Dwell interval**: the fan is never slowed down right after a change
//! - **Watchdog**: the firmware watchdog is rearmed on every poll
//! - **Profiles**: hardware profiles matched by DMI identity
//!
//! # Module Structure
//!
//! - `hw/` - Sensors, fan control file, machine identity
//! - `data/` - Settings model, configuration format, profiles, validation
//! - `engine/` - Hysteresis controller
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//! use tpf_core::{FanService, ServiceOptions, SystemPaths};
//!
//! let mut service = FanService::load(&SystemPaths::default(), &ServiceOptions::default())?;
//! service.start()?;
//! let report = service.poll(Instant::now());
//! println!("fan speed {} (next poll in {:?})", report.speed, report.next_poll);
//! # Ok::<(), tpf_core::TpfanError>(())
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod error;
pub mod service;
pub mod settings;
pub mod system;

// Re-export primary types from data/
pub use data::{
    FanState, MachineIdentity, ModelInfo, SensorBackend, SensorId, SensorReading, SettingLimits,
    Settings, SpeedCode, TriggerSet, TripState,
};

// Re-export configuration and profile handling from data/
pub use data::{
    create_default_config, render_config, render_profile, setting_limits, ConfigFragment,
    ConfigStore, LoadedProfile, ProfileMatch, ProfileMatcher,
};

// Re-export error types
pub use error::{Result, TpfanError};

// Re-export engine types
pub use engine::{clamp_poll_interval, HysteresisController, PollDecision, PollReport};

// Re-export hardware access from hw/
pub use hw::{
    detect_machine_identity, parse_fan_state, transition_commands,
    Actuator, FanInterface, ProcFan, SensorReader,
};

pub use service::{FanService, ServiceOptions};
pub use settings::{SettingsManager, SettingsSummary, SettingsUpdate};
pub use system::SystemPaths;
