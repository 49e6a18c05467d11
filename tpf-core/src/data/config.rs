//! Configuration and profile file format
//!
//! Both the user configuration and the hardware profiles use the same
//! line-oriented format:
//!
//! ```text
//! # comment
//! enabled = True
//! sensors = ibm_thermal
//! 0. CPU = 0:0 50:2 60:4 70:255
//! 3. Battery
//! 1. /sys/devices/virtual/hwmon/hwmon0/temp1_input : lm_sensors
//! hysteresis = 3
//! min_interval_duration = 10
//! comment = first line\nsecond line, \# is a literal hash
//! ```
//!
//! A file is parsed into a [`ConfigFragment`] holding only the keys it
//! defines. Fragments from a profile chain are merged option by option and
//! the result is validated into a [`Settings`] record.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::defaults;
use crate::data::persistence::{read_text_file, write_atomic};
use crate::data::types::{SensorBackend, Settings, SpeedCode, TriggerSet};
use crate::data::validation::{
    default_sensor_name, validate_sensor_id, validate_settings, validate_temperature,
};
use crate::error::{Result, TpfanError};

const LM_SENSORS_TAG: &str = "lm_sensors";
// Written by older generators
const LM_SENSORS_TAG_LEGACY: &str = "lm_sensor";

/// Keys read from a single configuration or profile file
///
/// Ids, temperatures and speeds are kept as parsed so that range errors
/// surface when the fragment is turned into [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFragment {
    pub enabled: Option<bool>,
    pub override_profile: Option<bool>,
    pub sensors: Option<String>,
    pub hysteresis: Option<u32>,
    pub min_interval_duration: Option<u32>,
    pub sensor_names: BTreeMap<i64, String>,
    pub trigger_points: BTreeMap<i64, BTreeMap<i64, i64>>,
    pub lm_sensor_paths: BTreeMap<i64, PathBuf>,
    pub comment: Option<String>,
}

impl ConfigFragment {
    /// Parse file contents
    ///
    /// Lines that fail to parse are logged and skipped.
    pub fn parse(contents: &str) -> Self {
        let mut fragment = Self::default();
        for raw in contents.lines() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = fragment.parse_line(line) {
                warn!(line = %line, "Skipping configuration line: {}", e);
            }
        }
        fragment
    }

    /// Read and parse a file
    pub fn read_file(path: &Path) -> Result<Self> {
        let contents = read_text_file(path)?;
        Ok(Self::parse(&contents))
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        let dot = line.find('.');
        let eq = line.find('=');
        match (dot, eq) {
            (Some(dot), None) => self.parse_sensor_line(line, dot),
            (Some(dot), Some(eq)) if dot < eq => self.parse_sensor_line(line, dot),
            (_, Some(eq)) => self.parse_option(line[..eq].trim(), line[eq + 1..].trim()),
            (None, None) => Err(TpfanError::config_parse(line, "not an option or sensor line")),
        }
    }

    fn parse_sensor_line(&mut self, line: &str, dot: usize) -> Result<()> {
        let id_text = line[..dot].trim();
        let id: i64 = id_text
            .parse()
            .map_err(|_| TpfanError::config_parse(line, format!("bad sensor id '{}'", id_text)))?;
        let rest = &line[dot + 1..];

        if let Some((path, tag)) = rest.rsplit_once(':') {
            let tag = tag.trim();
            if !rest.contains('=') && (tag == LM_SENSORS_TAG || tag == LM_SENSORS_TAG_LEGACY) {
                let path = path
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| TpfanError::config_parse(line, "missing sensor path"))?;
                self.lm_sensor_paths.insert(id, PathBuf::from(path));
                return Ok(());
            }
        }

        match rest.split_once('=') {
            Some((name, triggers)) => {
                let mut points = BTreeMap::new();
                for trigger in triggers.split_whitespace() {
                    let (temp, speed) = trigger.split_once(':').ok_or_else(|| {
                        TpfanError::config_parse(line, format!("bad trigger '{}'", trigger))
                    })?;
                    let temp: i64 = temp.trim().parse().map_err(|_| {
                        TpfanError::config_parse(line, format!("bad temperature in '{}'", trigger))
                    })?;
                    let speed: i64 = speed.trim().parse().map_err(|_| {
                        TpfanError::config_parse(line, format!("bad fan speed in '{}'", trigger))
                    })?;
                    points.insert(temp, speed);
                }
                if points.is_empty() {
                    points.insert(0, i64::from(SpeedCode::AUTO.value()));
                }
                self.trigger_points.insert(id, points);
                self.insert_name(id, name);
            }
            None => self.insert_name(id, rest),
        }
        Ok(())
    }

    fn insert_name(&mut self, id: i64, name: &str) {
        let name = name.trim();
        let name = if name.is_empty() {
            format!("Sensor {}", id)
        } else {
            name.to_string()
        };
        self.sensor_names.insert(id, name);
    }

    fn parse_option(&mut self, option: &str, value: &str) -> Result<()> {
        match option {
            "enabled" => self.enabled = Some(value == "True"),
            "override_profile" => self.override_profile = Some(value == "True"),
            "hysteresis" => {
                if let Some(v) = parse_digits(option, value)? {
                    self.hysteresis = Some(v);
                }
            }
            "min_interval_duration" => {
                if let Some(v) = parse_digits(option, value)? {
                    self.min_interval_duration = Some(v);
                }
            }
            "sensors" => self.sensors = Some(value.to_string()),
            "comment" => self.comment = Some(unescape_comment(value)),
            _ => return Err(TpfanError::UnknownOption(option.to_string())),
        }
        Ok(())
    }

    /// Apply a later, more specific fragment on top of this one
    ///
    /// Scalar options and per-sensor entries defined by `other` replace ours.
    /// The comment always comes from `other`, so only the most specific
    /// file's comment survives a chain.
    pub fn merge(&mut self, other: ConfigFragment) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.override_profile.is_some() {
            self.override_profile = other.override_profile;
        }
        if other.sensors.is_some() {
            self.sensors = other.sensors;
        }
        if other.hysteresis.is_some() {
            self.hysteresis = other.hysteresis;
        }
        if other.min_interval_duration.is_some() {
            self.min_interval_duration = other.min_interval_duration;
        }
        self.sensor_names.extend(other.sensor_names);
        self.trigger_points.extend(other.trigger_points);
        self.lm_sensor_paths.extend(other.lm_sensor_paths);
        self.comment = other.comment;
    }

    /// Validate into a settings record
    ///
    /// Any out-of-range value, unknown backend or bad speed code is a
    /// `ConfigInvalid` error.
    pub fn into_settings(self) -> Result<Settings> {
        let sensor_backend = match self.sensors.as_deref() {
            Some(name) => name.parse::<SensorBackend>()?,
            None => SensorBackend::default(),
        };

        let mut sensor_names = BTreeMap::new();
        for (id, name) in self.sensor_names {
            sensor_names.insert(validate_sensor_id(id)?, name);
        }

        let mut trigger_points = BTreeMap::new();
        for (id, points) in self.trigger_points {
            let id = validate_sensor_id(id)?;
            let mut set = TriggerSet::new();
            for (temp, speed) in points {
                set.insert(validate_temperature(temp)?, SpeedCode::try_from(speed)?);
            }
            trigger_points.insert(id, set);
        }

        let mut lm_sensor_paths = BTreeMap::new();
        for (id, path) in self.lm_sensor_paths {
            lm_sensor_paths.insert(validate_sensor_id(id)?, path);
        }

        let settings = Settings {
            enabled: self.enabled.unwrap_or(false),
            override_profile: self.override_profile.unwrap_or(false),
            sensor_backend,
            hysteresis: self.hysteresis.unwrap_or(0),
            min_interval_duration: self.min_interval_duration.unwrap_or(0),
            sensor_names,
            trigger_points,
            lm_sensor_paths,
            comment: self.comment.unwrap_or_default(),
        };
        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// `hysteresis` and `min_interval_duration` only accept plain digits;
/// anything else leaves the previous value in place.
fn parse_digits(option: &str, value: &str) -> Result<Option<u32>> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        debug!("Ignoring non-numeric {} value '{}'", option, value);
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| TpfanError::config_parse(value, format!("{} is out of range", option)))
}

fn bool_literal(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Cut a line at the first `#` that is not escaped as `\#`
fn strip_comment(line: &str) -> &str {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '#' if !escaped => return &line[..i],
            '\\' => escaped = !escaped,
            _ => escaped = false,
        }
    }
    line
}

fn escape_comment(comment: &str) -> String {
    comment
        .replace('\\', "\\\\")
        .replace('#', "\\#")
        .replace('\n', "\\n")
}

fn unescape_comment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(c @ ('#' | '\\')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Render the profile section of a settings record
pub fn render_profile(settings: &Settings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "sensors = {}", settings.sensor_backend);
    out.push('\n');

    let ids: std::collections::BTreeSet<_> = settings
        .sensor_names
        .keys()
        .chain(settings.trigger_points.keys())
        .copied()
        .collect();
    for id in ids {
        let name = settings
            .sensor_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| default_sensor_name(id));
        let mut line = format!("{}. {}", id, name);
        if let Some(points) = settings.trigger_points.get(&id) {
            line.push_str(" =");
            for (temp, speed) in points {
                let _ = write!(line, " {}:{}", temp, speed);
            }
        }
        out.push_str(&line);
        out.push('\n');
    }

    if !settings.lm_sensor_paths.is_empty() {
        out.push('\n');
        for (id, path) in &settings.lm_sensor_paths {
            let _ = writeln!(out, "{}. {} : {}", id, path.display(), LM_SENSORS_TAG);
        }
    }

    out.push('\n');
    let _ = writeln!(out, "hysteresis = {}", settings.hysteresis);
    let _ = writeln!(out, "min_interval_duration = {}", settings.min_interval_duration);
    if !settings.comment.is_empty() {
        let _ = writeln!(out, "comment = {}", escape_comment(&settings.comment));
    }
    out
}

/// Render a complete user configuration file
pub fn render_config(settings: &Settings) -> String {
    let mut out = String::from(defaults::CONFIG_HEADER);
    let _ = writeln!(out, "enabled = {}", bool_literal(settings.enabled));
    let _ = writeln!(out, "override_profile = {}", bool_literal(settings.override_profile));
    out.push('\n');
    out.push_str(&render_profile(settings));
    out
}

/// The user configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and validate the configuration
    pub fn load(&self) -> Result<Settings> {
        let settings = ConfigFragment::read_file(&self.path)?.into_settings()?;
        debug!(
            "Loaded configuration from {:?} (sensors={}, {} trigger sets)",
            self.path,
            settings.sensor_backend,
            settings.trigger_points.len()
        );
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        write_atomic(&self.path, &render_config(settings))?;
        debug!("Saved configuration to {:?}", self.path);
        Ok(())
    }
}
