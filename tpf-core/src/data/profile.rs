//! Hardware profile resolution
//!
//! Profiles live below `<data_dir>/models/`:
//!
//! - `generic` applies to every machine
//! - `by-name/<prefix>` for every prefix of the product name slug, so
//!   `by-name/lenovo` covers all Lenovo machines and
//!   `by-name/lenovo_thinkpad_x1` a single series
//! - `by-id/<product id>` for one exact machine type
//!
//! Files are applied from least to most specific, each one overriding the
//! keys it defines.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::paths::models;
use crate::data::config::ConfigFragment;
use crate::data::persistence::profile_display_name;
use crate::data::types::{MachineIdentity, Settings};
use crate::error::{Result, TpfanError};

/// Profile files found for a machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMatch {
    /// Existing files in application order
    pub files: Vec<PathBuf>,
    /// The same files relative to `models/` (`generic`, `by-name/lenovo`, ...)
    pub loaded_profiles: Vec<String>,
    /// A `by-id` file for this exact machine exists
    pub exact_match: bool,
}

/// Profile loaded and validated for the current machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedProfile {
    pub settings: Settings,
    pub matched: ProfileMatch,
}

#[derive(Debug, Clone)]
pub struct ProfileMatcher {
    models_dir: PathBuf,
}

impl ProfileMatcher {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// All files that could apply, existing or not, least specific first
    pub fn candidate_files(&self, identity: &MachineIdentity) -> Vec<PathBuf> {
        let mut files = vec![self.models_dir.join(models::GENERIC)];

        let slug = identity.product_name_slug();
        let by_name = self.models_dir.join(models::BY_NAME);
        files.extend(
            slug.char_indices()
                .map(|(i, c)| &slug[..i + c.len_utf8()])
                .map(|prefix| by_name.join(prefix)),
        );

        let product_id = identity.product_id();
        if !product_id.is_empty() {
            files.push(self.models_dir.join(models::BY_ID).join(product_id));
        }
        files
    }

    /// Existing profile files for a machine
    pub fn resolve(&self, identity: &MachineIdentity) -> ProfileMatch {
        let by_id = self.models_dir.join(models::BY_ID);
        let mut matched = ProfileMatch::default();
        for file in self.candidate_files(identity) {
            if !file.is_file() {
                continue;
            }
            if file.starts_with(&by_id) {
                matched.exact_match = true;
            }
            matched
                .loaded_profiles
                .push(profile_display_name(&self.models_dir, &file));
            matched.files.push(file);
        }
        debug!(
            "Profiles for {:?}: {:?} (exact match: {})",
            identity.product_id(),
            matched.loaded_profiles,
            matched.exact_match
        );
        matched
    }

    /// Merge and validate the profile chain for a machine
    ///
    /// Fails with `ProfileUnavailable` when no file could be read or the
    /// merged result does not validate.
    pub fn load(&self, identity: &MachineIdentity) -> Result<LoadedProfile> {
        let mut matched = self.resolve(identity);
        let mut merged = ConfigFragment::default();
        let mut read_any = false;

        let mut kept_files = Vec::with_capacity(matched.files.len());
        let mut kept_names = Vec::with_capacity(matched.files.len());
        for (file, name) in matched.files.drain(..).zip(matched.loaded_profiles.drain(..)) {
            match ConfigFragment::read_file(&file) {
                Ok(fragment) => {
                    merged.merge(fragment);
                    read_any = true;
                    kept_files.push(file);
                    kept_names.push(name);
                }
                Err(e) => warn!("Error loading profile {:?}: {}", file, e),
            }
        }
        matched.files = kept_files;
        matched.loaded_profiles = kept_names;

        if !read_any {
            return Err(TpfanError::ProfileUnavailable(format!(
                "no profile found for '{}'",
                identity.product_id()
            )));
        }

        let settings = merged.into_settings().map_err(|e| {
            TpfanError::ProfileUnavailable(format!(
                "profile {:?} can't be used: {}",
                matched.loaded_profiles, e
            ))
        })?;
        Ok(LoadedProfile { settings, matched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn x1() -> MachineIdentity {
        MachineIdentity {
            vendor: "LENOVO".to_string(),
            product_version: "ThinkPad X1".to_string(),
            product_name: "20AB".to_string(),
        }
    }

    fn write_profile(models_dir: &Path, rel: &str, contents: &str) {
        let path = models_dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_candidate_order() {
        let matcher = ProfileMatcher::new("/m");
        let identity = MachineIdentity {
            vendor: "IBM".to_string(),
            product_version: "T40".to_string(),
            product_name: "2373".to_string(),
        };
        let files: Vec<_> = matcher
            .candidate_files(&identity)
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            files,
            vec![
                "/m/generic",
                "/m/by-name/i",
                "/m/by-name/ib",
                "/m/by-name/ibm",
                "/m/by-name/ibm_",
                "/m/by-name/ibm_t",
                "/m/by-name/ibm_t4",
                "/m/by-name/ibm_t40",
                "/m/by-id/ibm_2373",
            ]
        );
    }

    #[test]
    fn test_unknown_machine_only_generic() {
        let matcher = ProfileMatcher::new("/m");
        assert_eq!(
            matcher.candidate_files(&MachineIdentity::default()),
            vec![PathBuf::from("/m/generic")]
        );
    }

    #[test]
    fn test_resolve_filters_existing() {
        let dir = TempDir::new().unwrap();
        write_profile(dir.path(), "generic", "hysteresis = 2\n");
        write_profile(dir.path(), "by-name/lenovo_thinkpad", "hysteresis = 3\n");

        let matched = ProfileMatcher::new(dir.path()).resolve(&x1());
        assert_eq!(matched.loaded_profiles, vec!["generic", "by-name/lenovo_thinkpad"]);
        assert!(!matched.exact_match);
    }

    #[test]
    fn test_load_merges_and_keeps_most_specific_comment() {
        let dir = TempDir::new().unwrap();
        write_profile(
            dir.path(),
            "generic",
            "sensors = ibm_thermal\nhysteresis = 2\n0. CPU = 50:2\ncomment = generic\n",
        );
        write_profile(
            dir.path(),
            "by-name/lenovo",
            "min_interval_duration = 20\n1. GPU = 60:3\ncomment = lenovo\n",
        );
        write_profile(dir.path(), "by-id/lenovo_20ab", "hysteresis = 4\n0. CPU = 45:4\n");

        let loaded = ProfileMatcher::new(dir.path()).load(&x1()).unwrap();
        assert!(loaded.matched.exact_match);
        assert_eq!(loaded.settings.hysteresis, 4);
        assert_eq!(loaded.settings.min_interval_duration, 20);
        assert_eq!(loaded.settings.trigger_points[&0].len(), 1);
        assert!(loaded.settings.trigger_points.contains_key(&1));
        assert_eq!(loaded.settings.comment, "");
    }

    #[test]
    fn test_load_without_profiles_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let result = ProfileMatcher::new(dir.path()).load(&x1());
        assert!(matches!(result, Err(TpfanError::ProfileUnavailable(_))));
    }

    #[test]
    fn test_invalid_profile_is_unavailable() {
        let dir = TempDir::new().unwrap();
        write_profile(dir.path(), "generic", "0. CPU = 50:13\n");
        let result = ProfileMatcher::new(dir.path()).load(&x1());
        assert!(matches!(result, Err(TpfanError::ProfileUnavailable(_))));
    }
}
