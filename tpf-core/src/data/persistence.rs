//! File persistence helpers
//!
//! Reading of pseudo-files and profiles, atomic writes of the user
//! configuration, and first-run configuration generation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::constants::defaults;
use crate::data::types::{SensorBackend, SensorId};
use crate::error::{Result, TpfanError};
use crate::hw::SensorReader;
use crate::system::SystemPaths;

/// Read a whole file as text
pub fn read_text_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| TpfanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Replace `path` with `contents` through a temporary file and rename
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| TpfanError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let map_err = |e: std::io::Error| TpfanError::FileWrite {
        path: temp_path.clone(),
        source: e,
    };
    let mut file = fs::File::create(&temp_path).map_err(map_err)?;
    file.write_all(contents.as_bytes()).map_err(map_err)?;
    file.sync_all().map_err(map_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| TpfanError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    // Make the rename itself durable
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| TpfanError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

/// Pick a sensor backend and write a fresh configuration file
///
/// Backends are probed in order `ibm_thermal` (unless `skip_ibm_thermal`),
/// `tp_hwmon`, `lm_sensors`; the first one with a working sensor wins. When
/// nothing works the file still gets written with `lm_sensors` and no
/// trigger lines, fan control disabled.
pub fn create_default_config(
    system_paths: &SystemPaths,
    skip_ibm_thermal: bool,
) -> Result<SensorBackend> {
    let reader = SensorReader::new(system_paths);
    let lm_defaults: BTreeMap<SensorId, _> =
        BTreeMap::from([(0, system_paths.default_lm_sensor.clone())]);

    let mut candidates = Vec::with_capacity(SensorBackend::ALL.len());
    if !skip_ibm_thermal {
        candidates.push(SensorBackend::IbmThermal);
    }
    candidates.extend([SensorBackend::TpHwmon, SensorBackend::LmSensors]);

    let (backend, working) = candidates
        .into_iter()
        .map(|backend| (backend, reader.working_sensors(backend, &lm_defaults)))
        .find(|(_, working)| !working.is_empty())
        .unwrap_or((SensorBackend::LmSensors, Vec::new()));
    debug!("Detected backend {} with working sensors {:?}", backend, working);

    let mut out = String::from(defaults::CONFIG_HEADER);
    out.push_str("enabled = False\n");
    out.push_str("override_profile = False\n\n");
    let _ = writeln!(out, "sensors = {}\n", backend);
    for id in &working {
        let _ = writeln!(out, "{}. Sensor {} = 0:255", id, id);
    }
    if backend == SensorBackend::LmSensors {
        out.push('\n');
        for (id, path) in &lm_defaults {
            let _ = writeln!(out, "{}. {} : lm_sensors", id, path.display());
        }
    }
    out.push('\n');
    let _ = writeln!(out, "hysteresis = {}", defaults::HYSTERESIS);
    let _ = writeln!(out, "min_interval_duration = {}", defaults::MIN_INTERVAL_DURATION);

    write_atomic(&system_paths.config, &out)?;
    info!(
        "Created configuration file {:?} using {} sensors",
        system_paths.config, backend
    );
    Ok(backend)
}

/// Profile file name relative to the `models/` directory, as reported to clients
pub fn profile_display_name(models_dir: &Path, file: &Path) -> String {
    file.strip_prefix(models_dir)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::ConfigStore;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc").join("tpfand.conf");
        write_atomic(&path, "enabled = True\n").unwrap();
        assert_eq!(read_text_file(&path).unwrap(), "enabled = True\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tpfand.conf");
        write_atomic(&path, "enabled = False\n").unwrap();
        write_atomic(&path, "enabled = True\n").unwrap();
        assert_eq!(read_text_file(&path).unwrap(), "enabled = True\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = read_text_file(&dir.path().join("nope"));
        assert!(matches!(result, Err(TpfanError::FileRead { .. })));
    }

    #[test]
    fn test_default_config_prefers_ibm_thermal() {
        let dir = TempDir::new().unwrap();
        let paths = SystemPaths::under(dir.path());
        fs::create_dir_all(paths.ibm_thermal.parent().unwrap()).unwrap();
        fs::write(&paths.ibm_thermal, "temperatures: 48 -128 39\n").unwrap();

        let backend = create_default_config(&paths, false).unwrap();
        assert_eq!(backend, SensorBackend::IbmThermal);

        let settings = ConfigStore::new(&paths.config).load().unwrap();
        assert!(!settings.enabled);
        assert!(!settings.override_profile);
        assert_eq!(settings.sensor_backend, SensorBackend::IbmThermal);
        assert_eq!(settings.trigger_points.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(settings.sensor_names[&2], "Sensor 2");
        assert_eq!(settings.hysteresis, 3);
        assert_eq!(settings.min_interval_duration, 10);
    }

    #[test]
    fn test_default_config_skips_ibm_thermal() {
        let dir = TempDir::new().unwrap();
        let paths = SystemPaths::under(dir.path());
        fs::create_dir_all(paths.ibm_thermal.parent().unwrap()).unwrap();
        fs::write(&paths.ibm_thermal, "temperatures: 48\n").unwrap();
        fs::create_dir_all(&paths.tp_hwmon).unwrap();
        fs::write(paths.tp_hwmon.join("temp3_input"), "51000\n").unwrap();

        let backend = create_default_config(&paths, true).unwrap();
        assert_eq!(backend, SensorBackend::TpHwmon);
        let settings = ConfigStore::new(&paths.config).load().unwrap();
        assert_eq!(settings.trigger_points.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_default_config_falls_back_to_lm_sensors() {
        let dir = TempDir::new().unwrap();
        let paths = SystemPaths::under(dir.path());

        let backend = create_default_config(&paths, false).unwrap();
        assert_eq!(backend, SensorBackend::LmSensors);
        let settings = ConfigStore::new(&paths.config).load().unwrap();
        assert!(settings.trigger_points.is_empty());
        assert_eq!(settings.lm_sensor_paths[&0], paths.default_lm_sensor);
    }

    #[test]
    fn test_profile_display_name() {
        let models = Path::new("/usr/share/tpfand/models");
        assert_eq!(profile_display_name(models, &models.join("generic")), "generic");
        assert_eq!(
            profile_display_name(models, &models.join("by-name").join("lenovo")),
            "by-name/lenovo"
        );
    }
}
