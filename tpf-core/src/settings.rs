//! Active settings management
//!
//! Owns the user configuration, the matched hardware profile and the
//! machine identity, and decides which record is active: the user
//! configuration when `override_profile` is set or no profile matched,
//! otherwise the profile. `enabled` and `override_profile` always come from
//! the user configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::sensors::MAX_SENSORS;
use crate::data::validation::{
    clamp_hysteresis, clamp_min_interval_duration, sanitize_sensor_name, validate_sensor_id,
    validate_temperature,
};
use crate::data::{
    create_default_config, render_profile, setting_limits, ConfigStore, LoadedProfile,
    MachineIdentity, ModelInfo, ProfileMatch, ProfileMatcher, SensorId, SettingLimits, Settings,
    SpeedCode, TriggerSet,
};
use crate::error::{Result, TpfanError};
use crate::hw::detect_machine_identity;
use crate::system::SystemPaths;

/// Partial update for [`SettingsManager::set_settings`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_duration: Option<i64>,
}

impl SettingsUpdate {
    fn touches_profile_options(&self) -> bool {
        self.hysteresis.is_some() || self.min_interval_duration.is_some()
    }
}

/// Scalar options as reported by `get_settings`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSummary {
    pub enabled: bool,
    pub override_profile: bool,
    pub hysteresis: u32,
    pub min_interval_duration: u32,
}

pub struct SettingsManager {
    store: ConfigStore,
    matcher: ProfileMatcher,
    identity: MachineIdentity,
    config: Settings,
    profile: Option<LoadedProfile>,
    profile_match: ProfileMatch,
    active: Settings,
}

impl SettingsManager {
    /// Load (or create) the user configuration and resolve the profile
    ///
    /// An invalid user configuration is an error; an unusable profile only
    /// means the configuration is used instead.
    pub fn load(paths: &SystemPaths, skip_ibm_thermal: bool) -> Result<Self> {
        let store = ConfigStore::new(&paths.config);
        if !store.exists() {
            info!(
                "No configuration file at {:?}, creating one",
                store.path()
            );
            create_default_config(paths, skip_ibm_thermal)?;
        }
        let config = store.load()?;
        let identity = detect_machine_identity(&paths.dmi_dir);
        Ok(Self::with_parts(
            store,
            ProfileMatcher::new(paths.models_dir()),
            identity,
            config,
        ))
    }

    /// Assemble a manager from already loaded parts
    pub fn with_parts(
        store: ConfigStore,
        matcher: ProfileMatcher,
        identity: MachineIdentity,
        config: Settings,
    ) -> Self {
        let mut manager = Self {
            store,
            matcher,
            identity,
            config,
            profile: None,
            profile_match: ProfileMatch::default(),
            active: Settings::default(),
        };
        manager.reload_profile();
        manager
    }

    fn reload_profile(&mut self) {
        match self.matcher.load(&self.identity) {
            Ok(profile) => {
                info!(
                    "Using profiles {:?} (exact match: {})",
                    profile.matched.loaded_profiles, profile.matched.exact_match
                );
                self.profile_match = profile.matched.clone();
                self.profile = Some(profile);
            }
            Err(e) => {
                warn!("{}; using the configuration file", e);
                self.profile_match = ProfileMatch::default();
                self.profile = None;
            }
        }
        self.refresh_active();
    }

    fn refresh_active(&mut self) {
        let mut active = match &self.profile {
            Some(profile) if !self.config.override_profile => profile.settings.clone(),
            _ => self.config.clone(),
        };
        active.enabled = self.config.enabled;
        active.override_profile = self.config.override_profile;
        self.active = active;
    }

    /// Currently active settings record
    pub fn active(&self) -> &Settings {
        &self.active
    }

    /// The user configuration as stored on disk
    pub fn config(&self) -> &Settings {
        &self.config
    }

    pub fn profile_available(&self) -> bool {
        self.profile.is_some()
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo::from(&self.identity)
    }

    pub fn loaded_profiles(&self) -> &[String] {
        &self.profile_match.loaded_profiles
    }

    pub fn is_profile_exactly_matched(&self) -> bool {
        self.profile_match.exact_match
    }

    /// Comment of the most specific profile, empty once overridden
    pub fn profile_comment(&self) -> &str {
        if self.active.override_profile {
            ""
        } else {
            &self.active.comment
        }
    }

    pub fn sensor_count(&self) -> u8 {
        MAX_SENSORS
    }

    pub fn setting_limits(&self, option: &str) -> Result<SettingLimits> {
        setting_limits(option).ok_or_else(|| TpfanError::UnknownOption(option.to_string()))
    }

    pub fn summary(&self) -> SettingsSummary {
        SettingsSummary {
            enabled: self.active.enabled,
            override_profile: self.active.override_profile,
            hysteresis: self.active.hysteresis,
            min_interval_duration: self.active.min_interval_duration,
        }
    }

    pub fn sensor_names(&self) -> &BTreeMap<SensorId, String> {
        &self.active.sensor_names
    }

    pub fn trigger_points(&self) -> &BTreeMap<SensorId, TriggerSet> {
        &self.active.trigger_points
    }

    pub fn profile_string(&self) -> String {
        render_profile(&self.active)
    }

    fn require_override(&self) -> Result<()> {
        if !self.config.override_profile {
            return Err(TpfanError::ProfileNotOverridden);
        }
        Ok(())
    }

    /// Apply a partial settings update and persist it
    ///
    /// `enabled` and `override_profile` can always be changed. The other
    /// options need `override_profile`, either already set or switched on
    /// by the same update; otherwise nothing is applied.
    pub fn set_settings(&mut self, update: &SettingsUpdate) -> Result<()> {
        let override_after = update
            .override_profile
            .unwrap_or(self.config.override_profile);
        if update.touches_profile_options() && !override_after {
            return Err(TpfanError::ProfileNotOverridden);
        }

        let mut config = self.config.clone();
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }

        let mut reload = false;
        if let Some(override_profile) = update.override_profile {
            if override_profile && !config.override_profile {
                // Start editing from what was in effect
                config = Settings {
                    enabled: config.enabled,
                    override_profile: true,
                    comment: std::mem::take(&mut config.comment),
                    ..self.active.clone()
                };
                debug!("Profile overridden, active values copied into the configuration");
            } else if !override_profile && config.override_profile {
                reload = true;
            }
            config.override_profile = override_profile;
        }

        if let Some(hysteresis) = update.hysteresis {
            config.hysteresis = clamp_hysteresis(hysteresis);
        }
        if let Some(min_interval_duration) = update.min_interval_duration {
            config.min_interval_duration = clamp_min_interval_duration(min_interval_duration);
        }

        self.commit(config)?;
        if reload {
            self.reload_profile();
        }
        Ok(())
    }

    /// Replace all sensor names
    pub fn set_sensor_names(&mut self, names: &BTreeMap<SensorId, String>) -> Result<()> {
        self.require_override()?;
        let mut sanitized = BTreeMap::new();
        for (id, name) in names {
            let id = validate_sensor_id(i64::from(*id))?;
            sanitized.insert(id, sanitize_sensor_name(id, name));
        }
        self.commit(Settings {
            sensor_names: sanitized,
            ..self.config.clone()
        })
    }

    /// Replace all trigger points
    ///
    /// Temperatures, speeds and ids are checked before anything changes.
    pub fn set_trigger_points(
        &mut self,
        points: &BTreeMap<SensorId, BTreeMap<i64, i64>>,
    ) -> Result<()> {
        self.require_override()?;
        let mut validated = BTreeMap::new();
        for (id, set) in points {
            let id = validate_sensor_id(i64::from(*id))?;
            let mut triggers = TriggerSet::new();
            for (temp, speed) in set {
                triggers.insert(validate_temperature(*temp)?, SpeedCode::try_from(*speed)?);
            }
            validated.insert(id, triggers);
        }
        self.commit(Settings {
            trigger_points: validated,
            ..self.config.clone()
        })
    }

    /// Persist `config` and make it the user configuration
    ///
    /// Nothing changes in memory when the write fails.
    fn commit(&mut self, config: Settings) -> Result<()> {
        self.store.save(&config)?;
        self.config = config;
        self.refresh_active();
        Ok(())
    }

    /// Write the user configuration to disk
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SensorBackend;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup(config: &str) -> (TempDir, SystemPaths) {
        let dir = TempDir::new().unwrap();
        let paths = SystemPaths::under(dir.path());
        fs::create_dir_all(paths.config.parent().unwrap()).unwrap();
        fs::write(&paths.config, config).unwrap();

        fs::create_dir_all(&paths.dmi_dir).unwrap();
        fs::write(paths.dmi_dir.join("sys_vendor"), "LENOVO\n").unwrap();
        fs::write(paths.dmi_dir.join("product_version"), "ThinkPad X1\n").unwrap();
        fs::write(paths.dmi_dir.join("product_name"), "20AB\n").unwrap();
        (dir, paths)
    }

    fn write_profile(paths: &SystemPaths, rel: &str, contents: &str) {
        let path = paths.models_dir().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn read_config(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    const CONFIG: &str = "enabled = True\noverride_profile = False\nsensors = tp_hwmon\n\
                          0. Mine = 40:2\nhysteresis = 1\nmin_interval_duration = 5\n";
    const PROFILE: &str = "sensors = ibm_thermal\n0. CPU = 50:3 60:7\nhysteresis = 4\n\
                           min_interval_duration = 20\ncomment = X1 fan table\n";

    #[test]
    fn test_profile_is_active_unless_overridden() {
        let (_dir, paths) = setup(CONFIG);
        write_profile(&paths, "by-id/lenovo_20ab", PROFILE);

        let manager = SettingsManager::load(&paths, false).unwrap();
        assert!(manager.profile_available());
        assert!(manager.is_profile_exactly_matched());
        assert_eq!(manager.loaded_profiles(), ["by-id/lenovo_20ab"]);
        assert_eq!(manager.active().sensor_backend, SensorBackend::IbmThermal);
        assert!(manager.active().enabled);
        assert_eq!(manager.profile_comment(), "X1 fan table");
        assert_eq!(
            manager.summary(),
            SettingsSummary {
                enabled: true,
                override_profile: false,
                hysteresis: 4,
                min_interval_duration: 20,
            }
        );
    }

    #[test]
    fn test_config_is_active_without_profile() {
        let (_dir, paths) = setup(CONFIG);
        let manager = SettingsManager::load(&paths, false).unwrap();
        assert!(!manager.profile_available());
        assert_eq!(manager.active().sensor_backend, SensorBackend::TpHwmon);
        assert_eq!(manager.sensor_names()[&0], "Mine");
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let (_dir, paths) = setup("hysteresis = 12\n");
        let err = SettingsManager::load(&paths, false).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_config_is_created() {
        let (_dir, paths) = setup("");
        fs::remove_file(&paths.config).unwrap();
        let manager = SettingsManager::load(&paths, false).unwrap();
        assert!(paths.config.is_file());
        assert!(!manager.active().enabled);
        assert_eq!(manager.summary().hysteresis, 3);
    }

    #[test]
    fn test_profile_options_require_override() {
        let (_dir, paths) = setup(CONFIG);
        write_profile(&paths, "generic", PROFILE);
        let mut manager = SettingsManager::load(&paths, false).unwrap();

        let update = SettingsUpdate {
            enabled: Some(false),
            hysteresis: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            manager.set_settings(&update),
            Err(TpfanError::ProfileNotOverridden)
        ));
        assert!(manager.active().enabled);

        assert!(matches!(
            manager.set_trigger_points(&BTreeMap::new()),
            Err(TpfanError::ProfileNotOverridden)
        ));
        assert!(matches!(
            manager.set_sensor_names(&BTreeMap::new()),
            Err(TpfanError::ProfileNotOverridden)
        ));
    }

    #[test]
    fn test_override_copies_profile_and_persists() {
        let (_dir, paths) = setup(CONFIG);
        write_profile(&paths, "generic", PROFILE);
        let mut manager = SettingsManager::load(&paths, false).unwrap();

        manager
            .set_settings(&SettingsUpdate {
                override_profile: Some(true),
                hysteresis: Some(99),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(manager.active().sensor_backend, SensorBackend::IbmThermal);
        assert_eq!(manager.summary().hysteresis, 10);
        assert_eq!(manager.summary().min_interval_duration, 20);
        assert_eq!(manager.profile_comment(), "");

        let written = read_config(&paths.config);
        assert!(written.contains("override_profile = True\n"));
        assert!(written.contains("sensors = ibm_thermal\n"));
        assert!(written.contains("0. CPU = 50:3 60:7\n"));
        assert!(written.contains("hysteresis = 10\n"));
    }

    #[test]
    fn test_disabling_override_reloads_profile() {
        let (_dir, paths) = setup(&CONFIG.replace("override_profile = False", "override_profile = True"));
        write_profile(&paths, "generic", PROFILE);
        let mut manager = SettingsManager::load(&paths, false).unwrap();
        assert_eq!(manager.active().sensor_backend, SensorBackend::TpHwmon);

        manager
            .set_settings(&SettingsUpdate {
                override_profile: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(manager.active().sensor_backend, SensorBackend::IbmThermal);
        assert_eq!(manager.config().sensor_backend, SensorBackend::TpHwmon);
    }

    #[test]
    fn test_set_names_and_triggers() {
        let (_dir, paths) = setup(&CONFIG.replace("override_profile = False", "override_profile = True"));
        let mut manager = SettingsManager::load(&paths, false).unwrap();

        manager
            .set_sensor_names(&BTreeMap::from([(0, "CPU = die".to_string()), (3, " ".to_string())]))
            .unwrap();
        assert_eq!(manager.sensor_names()[&0], "CPU - die");
        assert_eq!(manager.sensor_names()[&3], "Sensor 3");

        manager
            .set_trigger_points(&BTreeMap::from([(0, BTreeMap::from([(45, 2), (70, 256)]))]))
            .unwrap();
        assert_eq!(manager.trigger_points()[&0][&70], SpeedCode::FULL_SPEED);
        assert!(read_config(&paths.config).contains("0. CPU - die = 45:2 70:256\n"));

        let bad = manager.set_trigger_points(&BTreeMap::from([(0, BTreeMap::from([(45, 9)]))]));
        assert!(matches!(bad, Err(TpfanError::ConfigInvalid { .. })));
        assert_eq!(manager.trigger_points()[&0].len(), 2);

        let bad = manager.set_sensor_names(&BTreeMap::from([(16, "Extra".to_string())]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_failed_save_leaves_settings_untouched() {
        let (_dir, paths) = setup(&CONFIG.replace("override_profile = False", "override_profile = True"));
        let mut manager = SettingsManager::load(&paths, false).unwrap();

        fs::remove_file(&paths.config).unwrap();
        fs::create_dir(&paths.config).unwrap();

        let result = manager.set_trigger_points(&BTreeMap::from([(0, BTreeMap::from([(45, 8)]))]));
        assert!(matches!(result, Err(TpfanError::FileWrite { .. })));
        let result = manager.set_sensor_names(&BTreeMap::from([(0, "Renamed".to_string())]));
        assert!(result.is_err());
        let result = manager.set_settings(&SettingsUpdate {
            enabled: Some(false),
            hysteresis: Some(7),
            ..Default::default()
        });
        assert!(result.is_err());

        let expected = BTreeMap::from([(40, SpeedCode::new(2).unwrap())]);
        assert_eq!(manager.config().trigger_points[&0], expected);
        assert_eq!(manager.trigger_points()[&0], expected);
        assert_eq!(manager.sensor_names()[&0], "Mine");
        assert!(manager.config().enabled);
        assert_eq!(manager.summary().hysteresis, 1);
    }

    #[test]
    fn test_setting_limits_lookup() {
        let (_dir, paths) = setup(CONFIG);
        let manager = SettingsManager::load(&paths, false).unwrap();
        assert_eq!(
            manager.setting_limits("hysteresis").unwrap(),
            SettingLimits::Range { min: 0, max: 10 }
        );
        assert!(matches!(
            manager.setting_limits("bogus"),
            Err(TpfanError::UnknownOption(_))
        ));
        assert_eq!(manager.sensor_count(), 16);
    }
}
