//! Fan control service
//!
//! Ties settings, sensors, actuator and controller together and exposes
//! the operations served to clients. Transport and scheduling belong to
//! the caller: it calls [`FanService::poll`] after every
//! [`FanService::poll_interval`] and [`FanService::shutdown`] before exiting.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::constants::VERSION;
use crate::data::{
    FanState, ModelInfo, SensorId, SensorReading, SettingLimits, SpeedCode, TriggerSet,
};
use crate::engine::{HysteresisController, PollReport};
use crate::error::Result;
use crate::hw::{Actuator, FanInterface, ProcFan, SensorReader};
use crate::settings::{SettingsManager, SettingsSummary, SettingsUpdate};
use crate::system::SystemPaths;

/// Startup options that do not belong in the configuration file
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Never pick `ibm_thermal` when generating a configuration
    pub skip_ibm_thermal: bool,
    /// Poll period override in milliseconds
    pub poll_interval_ms: Option<u64>,
}

pub struct FanService {
    settings: SettingsManager,
    controller: HysteresisController,
    reader: SensorReader,
    actuator: Actuator,
}

impl FanService {
    /// Load settings and drive the real fan control file
    pub fn load(paths: &SystemPaths, options: &ServiceOptions) -> Result<Self> {
        let fan = ProcFan::new(&paths.ibm_fan);
        Self::with_fan(paths, options, Box::new(fan))
    }

    /// Load settings and drive the given fan interface
    pub fn with_fan(
        paths: &SystemPaths,
        options: &ServiceOptions,
        fan: Box<dyn FanInterface>,
    ) -> Result<Self> {
        let settings = SettingsManager::load(paths, options.skip_ibm_thermal)?;
        let mut controller =
            HysteresisController::new(settings.active().min_interval_duration, Instant::now());
        if let Some(interval_ms) = options.poll_interval_ms {
            controller = controller.with_poll_interval(interval_ms);
        }
        Ok(Self {
            settings,
            controller,
            reader: SensorReader::new(paths),
            actuator: Actuator::new(fan),
        })
    }

    /// Verify the fan accepts commands before the first poll
    pub fn start(&mut self) -> Result<()> {
        self.actuator.probe()?;
        let active = self.settings.active();
        info!(
            enabled = active.enabled,
            sensors = %active.sensor_backend,
            hysteresis = active.hysteresis,
            min_interval_duration = active.min_interval_duration,
            "Fan control started"
        );
        Ok(())
    }

    /// One control cycle
    pub fn poll(&mut self, now: Instant) -> PollReport {
        let report =
            self.controller
                .poll(self.settings.active(), &self.reader, &mut self.actuator, now);
        debug!(speed = %report.speed, decision = ?report.decision, "Poll finished");
        report
    }

    pub fn poll_interval(&self) -> Duration {
        self.controller.poll_interval()
    }

    /// Hand the fan back to the firmware
    pub fn shutdown(&mut self) {
        let current = self.actuator.fan_state().ok().map(|s| s.level);
        self.actuator.set_speed(SpeedCode::AUTO, current);
        info!("Fan returned to hardware control");
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn temperatures(&self) -> Result<Vec<SensorReading>> {
        self.reader.read(self.settings.active())
    }

    pub fn fan_state(&self) -> Result<FanState> {
        self.actuator.fan_state()
    }

    /// Forget trip state; call after configuration changes
    pub fn reset_trips(&mut self) {
        self.controller.reset_trips();
    }

    pub fn trip_temperatures(&self) -> BTreeMap<SensorId, i32> {
        self.controller.trip_temperatures()
    }

    pub fn trip_speeds(&self) -> BTreeMap<SensorId, SpeedCode> {
        self.controller.trip_speeds()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.settings.model_info()
    }

    pub fn loaded_profiles(&self) -> Vec<String> {
        self.settings.loaded_profiles().to_vec()
    }

    pub fn profile_comment(&self) -> String {
        self.settings.profile_comment().to_string()
    }

    pub fn is_profile_exactly_matched(&self) -> bool {
        self.settings.is_profile_exactly_matched()
    }

    pub fn sensor_count(&self) -> u8 {
        self.settings.sensor_count()
    }

    pub fn setting_limits(&self, option: &str) -> Result<SettingLimits> {
        self.settings.setting_limits(option)
    }

    pub fn settings(&self) -> SettingsSummary {
        self.settings.summary()
    }

    pub fn set_settings(&mut self, update: &SettingsUpdate) -> Result<()> {
        self.settings.set_settings(update)?;
        self.controller.reset_trips();
        Ok(())
    }

    pub fn sensor_names(&self) -> BTreeMap<SensorId, String> {
        self.settings.sensor_names().clone()
    }

    pub fn set_sensor_names(&mut self, names: &BTreeMap<SensorId, String>) -> Result<()> {
        self.settings.set_sensor_names(names)?;
        self.controller.reset_trips();
        Ok(())
    }

    pub fn trigger_points(&self) -> BTreeMap<SensorId, TriggerSet> {
        self.settings.trigger_points().clone()
    }

    pub fn set_trigger_points(
        &mut self,
        points: &BTreeMap<SensorId, BTreeMap<i64, i64>>,
    ) -> Result<()> {
        self.settings.set_trigger_points(points)?;
        self.controller.reset_trips();
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.settings.save()
    }

    pub fn profile_string(&self) -> String {
        self.settings.profile_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PollDecision;
    use crate::hw::MockFanInterface;
    use std::fs;
    use tempfile::TempDir;

    fn setup(config: &str) -> (TempDir, SystemPaths) {
        let dir = TempDir::new().unwrap();
        let paths = SystemPaths::under(dir.path());
        fs::create_dir_all(paths.config.parent().unwrap()).unwrap();
        fs::write(&paths.config, config).unwrap();
        fs::create_dir_all(paths.ibm_thermal.parent().unwrap()).unwrap();
        (dir, paths)
    }

    fn fan_at(level: SpeedCode) -> MockFanInterface {
        let mut fan = MockFanInterface::new();
        fan.expect_read_state()
            .returning(move || Ok(FanState { level, rpm: 2000 }));
        fan.expect_write_command().returning(|_| Ok(()));
        fan
    }

    const CONFIG: &str = "enabled = True\noverride_profile = True\nsensors = ibm_thermal\n\
                          0. CPU = 50:3\nhysteresis = 2\nmin_interval_duration = 0\n";

    #[test]
    fn test_poll_computes_speed() {
        let (_dir, paths) = setup(CONFIG);
        fs::write(&paths.ibm_thermal, "temperatures: 55 0\n").unwrap();
        let mut service =
            FanService::with_fan(&paths, &ServiceOptions::default(), Box::new(fan_at(SpeedCode::AUTO)))
                .unwrap();

        let report = service.poll(Instant::now());
        assert_eq!(report.speed, SpeedCode::new(3).unwrap());
        assert_eq!(report.next_poll, Duration::from_millis(3500));
        assert_eq!(service.trip_temperatures(), BTreeMap::from([(0, 48)]));
    }

    #[test]
    fn test_settings_change_resets_trips() {
        let (_dir, paths) = setup(CONFIG);
        fs::write(&paths.ibm_thermal, "temperatures: 55\n").unwrap();
        let mut service =
            FanService::with_fan(&paths, &ServiceOptions::default(), Box::new(fan_at(SpeedCode::AUTO)))
                .unwrap();
        service.poll(Instant::now());
        assert!(!service.trip_speeds().is_empty());

        service
            .set_settings(&SettingsUpdate {
                hysteresis: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert!(service.trip_speeds().is_empty());
        assert_eq!(service.settings().hysteresis, 5);
    }

    #[test]
    fn test_unreadable_fan_state_falls_back_to_auto() {
        let (_dir, paths) = setup(CONFIG);
        fs::write(&paths.ibm_thermal, "temperatures: 55\n").unwrap();
        let mut fan = MockFanInterface::new();
        fan.expect_read_state()
            .returning(|| Err(crate::error::TpfanError::generic("gone")));
        fan.expect_write_command().returning(|_| Ok(()));

        let mut service =
            FanService::with_fan(&paths, &ServiceOptions::default(), Box::new(fan)).unwrap();
        let report = service.poll(Instant::now());
        assert_eq!(report.speed, SpeedCode::AUTO);
        assert_eq!(report.decision, PollDecision::FanStateUnavailable);
    }

    #[test]
    fn test_poll_interval_override_is_clamped() {
        let (_dir, paths) = setup(CONFIG);
        let options = ServiceOptions {
            poll_interval_ms: Some(30_000),
            ..Default::default()
        };
        let service =
            FanService::with_fan(&paths, &options, Box::new(fan_at(SpeedCode::AUTO))).unwrap();
        assert_eq!(service.poll_interval(), Duration::from_secs(5));
    }
}
