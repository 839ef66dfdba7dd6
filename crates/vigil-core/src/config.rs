//! Configuration loading and runtime reconfiguration.
//!
//! The configuration lives in `vigil-config.yaml`. This module defines the
//! strongly-typed [`EngineConfig`] that mirrors that file, a loader, and
//! [`EngineConfig::with_option`], the key/value entry point behind
//! `EngineController::configure`.
//!
//! Runtime values are parsed as YAML into the field's type, so numbers are
//! written plainly (`"5"`), lists in flow style (`"[a, b]"`), and targets as
//! flow mappings (`"[{path: /work/app, kind: repo}]"`).

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use vigil_types::MonitorTarget;

use crate::scanner::StyleRule;

/// Errors that can occur when loading or changing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The key is not a recognized option.
    #[error("unknown configuration option: {key}")]
    UnknownOption {
        /// The rejected key.
        key: String,
    },

    /// The value could not be parsed or failed validation.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// The option being set.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// What a successful [`EngineConfig::with_option`] call changed.
///
/// The controller uses this to decide whether the event store needs to be
/// resized or reset alongside the new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Tick cadence.
    Cadence,
    /// Style rules or scanner limits.
    Scanning,
    /// Event store capacity.
    Capacity(usize),
    /// The monitored target list; redefines the engine's scope.
    Targets,
    /// Scenario trigger thresholds.
    Thresholds,
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `vigil-config.yaml`. Every field has a default,
/// so an empty file (or no file) yields a usable engine with no targets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Seconds between the start of one tick and the next.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Enabled style rule ids.
    #[serde(default = "default_style_rules")]
    pub style_rules: Vec<String>,

    /// Event store capacity.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Repositories and files under watch.
    #[serde(default)]
    pub targets: Vec<MonitorTarget>,

    /// Per-scenario trigger sensitivity.
    #[serde(default)]
    pub scenario_thresholds: ScenarioThresholds,

    /// Files larger than this are refused by the scanner and skipped by
    /// the conflict-marker walk.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Limit for the `max_line_length` rule, in characters.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Terms flagged by the `banned_term` rule (case-insensitive, whole word).
    #[serde(default = "default_banned_terms")]
    pub banned_terms: Vec<String>,

    /// File extensions scanned when a repository has uncommitted files.
    #[serde(default = "default_scan_extensions")]
    pub scan_extensions: Vec<String>,

    /// Directory names never descended into by the conflict-marker walk.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Directories a repository root should contain, each mapped to the
    /// subdirectories expected inside it. Checked by `directory_structure`.
    #[serde(default)]
    pub expected_dirs: BTreeMap<String, Vec<String>>,

    /// Logging configuration for the host binary.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            style_rules: default_style_rules(),
            max_events: default_max_events(),
            targets: Vec::new(),
            scenario_thresholds: ScenarioThresholds::default(),
            max_file_bytes: default_max_file_bytes(),
            max_line_length: default_max_line_length(),
            banned_terms: default_banned_terms(),
            scan_extensions: default_scan_extensions(),
            ignored_dirs: default_ignored_dirs(),
            expected_dirs: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidValue`] if a value fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::InvalidValue`] if a value fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Return a copy of this configuration with one option changed.
    ///
    /// `self` is left untouched, so a rejected value never leaves a
    /// half-applied configuration behind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownOption`] for unrecognized keys and
    /// [`ConfigError::InvalidValue`] when the value does not parse or the
    /// resulting configuration fails validation.
    pub fn with_option(&self, key: &str, value: &str) -> Result<(Self, ConfigChange), ConfigError> {
        let mut next = self.clone();
        let change = match key {
            "poll_interval_seconds" => {
                next.poll_interval_seconds = parse_value(key, value)?;
                ConfigChange::Cadence
            }
            "style_rules" => {
                next.style_rules = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "max_events" => {
                next.max_events = parse_value(key, value)?;
                ConfigChange::Capacity(next.max_events)
            }
            "targets" => {
                next.targets = parse_value(key, value)?;
                ConfigChange::Targets
            }
            "scenario_thresholds" => {
                next.scenario_thresholds = parse_value(key, value)?;
                ConfigChange::Thresholds
            }
            "max_file_bytes" => {
                next.max_file_bytes = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "max_line_length" => {
                next.max_line_length = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "banned_terms" => {
                next.banned_terms = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "scan_extensions" => {
                next.scan_extensions = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "ignored_dirs" => {
                next.ignored_dirs = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            "expected_dirs" => {
                next.expected_dirs = parse_value(key, value)?;
                ConfigChange::Scanning
            }
            other => match other.strip_prefix("scenario_thresholds.") {
                Some(field) => {
                    next.scenario_thresholds.set_field(key, field, value)?;
                    ConfigChange::Thresholds
                }
                None => {
                    return Err(ConfigError::UnknownOption {
                        key: key.to_owned(),
                    });
                }
            },
        };
        next.validate()?;
        Ok((next, change))
    }

    /// Check cross-field and range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "poll_interval_seconds",
                "must be at least 1",
            ));
        }
        if self.max_events == 0 {
            return Err(ConfigError::invalid("max_events", "must be at least 1"));
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::invalid("max_file_bytes", "must be at least 1"));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::invalid("max_line_length", "must be at least 1"));
        }
        if let Some(unknown) = self
            .style_rules
            .iter()
            .find(|id| StyleRule::from_id(id).is_none())
        {
            return Err(ConfigError::invalid(
                "style_rules",
                format!("unknown rule id: {unknown}"),
            ));
        }
        if self.banned_terms.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid("banned_terms", "terms must not be blank"));
        }
        if self.targets.iter().any(|t| t.path.trim().is_empty()) {
            return Err(ConfigError::invalid("targets", "target path must not be empty"));
        }
        if let Some(bad) = self
            .expected_dirs
            .iter()
            .flat_map(|(parent, children)| std::iter::once(parent).chain(children))
            .find(|dir| !is_plain_relative(dir))
        {
            return Err(ConfigError::invalid(
                "expected_dirs",
                format!("not a relative directory path: {bad:?}"),
            ));
        }
        self.scenario_thresholds.validate()
    }

    /// Targets evaluated each tick.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &MonitorTarget> {
        self.targets.iter().filter(|t| t.enabled)
    }
}

/// Trigger sensitivity for the time-based and count-based scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScenarioThresholds {
    /// Uncommitted work older than this many seconds is drift.
    #[serde(default = "default_drift_after_seconds")]
    pub drift_after_seconds: i64,

    /// A clean repository without commits for this many seconds is stale.
    /// Must exceed `drift_after_seconds`.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: i64,

    /// Violation count at which a style event becomes critical.
    #[serde(default = "default_style_critical_count")]
    pub style_critical_count: usize,
}

impl Default for ScenarioThresholds {
    fn default() -> Self {
        Self {
            drift_after_seconds: default_drift_after_seconds(),
            stale_after_seconds: default_stale_after_seconds(),
            style_critical_count: default_style_critical_count(),
        }
    }
}

impl ScenarioThresholds {
    fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "drift_after_seconds" => self.drift_after_seconds = parse_value(key, value)?,
            "stale_after_seconds" => self.stale_after_seconds = parse_value(key, value)?,
            "style_critical_count" => self.style_critical_count = parse_value(key, value)?,
            _ => {
                return Err(ConfigError::UnknownOption {
                    key: key.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.drift_after_seconds < 0 {
            return Err(ConfigError::invalid(
                "scenario_thresholds.drift_after_seconds",
                "must not be negative",
            ));
        }
        if self.stale_after_seconds <= self.drift_after_seconds {
            return Err(ConfigError::invalid(
                "scenario_thresholds.stale_after_seconds",
                "must be larger than drift_after_seconds",
            ));
        }
        if self.style_critical_count == 0 {
            return Err(ConfigError::invalid(
                "scenario_thresholds.style_critical_count",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Logging configuration, read by the host binary at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Non-empty, relative, and free of `.` and `..` segments.
fn is_plain_relative(dir: &str) -> bool {
    !dir.trim().is_empty()
        && Path::new(dir)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn parse_value<T: DeserializeOwned>(key: &str, value: &str) -> Result<T, ConfigError> {
    serde_yml::from_str(value).map_err(|e| ConfigError::invalid(key, e.to_string()))
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_style_rules() -> Vec<String> {
    StyleRule::ALL
        .iter()
        .map(|rule| rule.id().to_owned())
        .collect()
}

const fn default_max_events() -> usize {
    1000
}

const fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

const fn default_max_line_length() -> usize {
    120
}

fn default_banned_terms() -> Vec<String> {
    vec!["manus".to_owned()]
}

fn default_scan_extensions() -> Vec<String> {
    ["py", "rs", "js", "ts", "go", "java"]
        .iter()
        .map(|ext| (*ext).to_owned())
        .collect()
}

fn default_ignored_dirs() -> Vec<String> {
    [".git", "node_modules", "venv", "__pycache__", "target"]
        .iter()
        .map(|dir| (*dir).to_owned())
        .collect()
}

const fn default_drift_after_seconds() -> i64 {
    30 * 60
}

const fn default_stale_after_seconds() -> i64 {
    7 * 24 * 60 * 60
}

const fn default_style_critical_count() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vigil_types::TargetKind;

    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = EngineConfig::parse("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_events, 1000);
        assert_eq!(config.style_rules.len(), StyleRule::ALL.len());
    }

    #[test]
    fn parse_full_file() {
        let yaml = r"
poll_interval_seconds: 10
max_events: 50
style_rules: [max_line_length, trailing_whitespace]
targets:
  - path: /work/app
    kind: repo
  - path: /work/notes/*.md
    kind: file
    enabled: false
scenario_thresholds:
  drift_after_seconds: 60
logging:
  level: debug
  json: true
";
        let config = EngineConfig::parse(yaml).unwrap();
        assert_eq!(config.poll_interval_seconds, 10);
        assert_eq!(config.max_events, 50);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[1].kind, TargetKind::File);
        assert_eq!(config.enabled_targets().count(), 1);
        assert_eq!(config.scenario_thresholds.drift_after_seconds, 60);
        assert_eq!(
            config.scenario_thresholds.stale_after_seconds,
            default_stale_after_seconds()
        );
        assert!(config.logging.json);
    }

    #[test]
    fn with_option_parses_plain_numbers() {
        let base = EngineConfig::default();
        let (next, change) = base.with_option("poll_interval_seconds", "5").unwrap();
        assert_eq!(next.poll_interval_seconds, 5);
        assert_eq!(change, ConfigChange::Cadence);
        // Original untouched.
        assert_eq!(base.poll_interval_seconds, 30);
    }

    #[test]
    fn with_option_reports_capacity() {
        let (next, change) = EngineConfig::default()
            .with_option("max_events", "25")
            .unwrap();
        assert_eq!(next.max_events, 25);
        assert_eq!(change, ConfigChange::Capacity(25));
    }

    #[test]
    fn with_option_parses_targets() {
        let (next, change) = EngineConfig::default()
            .with_option("targets", "[{path: /work/app, kind: repo}]")
            .unwrap();
        assert_eq!(change, ConfigChange::Targets);
        assert_eq!(next.targets, vec![MonitorTarget::repo("/work/app")]);
    }

    #[test]
    fn dotted_threshold_keys() {
        let (next, change) = EngineConfig::default()
            .with_option("scenario_thresholds.style_critical_count", "3")
            .unwrap();
        assert_eq!(change, ConfigChange::Thresholds);
        assert_eq!(next.scenario_thresholds.style_critical_count, 3);

        let err = EngineConfig::default()
            .with_option("scenario_thresholds.bogus", "3")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { .. }));
    }

    #[test]
    fn unknown_option_rejected() {
        let err = EngineConfig::default()
            .with_option("auto_commit", "true")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { ref key } if key == "auto_commit"));
    }

    #[test]
    fn unparsable_value_rejected() {
        let err = EngineConfig::default()
            .with_option("poll_interval_seconds", "soon")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = EngineConfig::default()
            .with_option("poll_interval_seconds", "0")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "poll_interval_seconds"));
    }

    #[test]
    fn unknown_rule_id_rejected() {
        let err = EngineConfig::default()
            .with_option("style_rules", "[max_line_length, cyclomatic_complexity]")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "style_rules"));
    }

    #[test]
    fn stale_must_exceed_drift() {
        let err = EngineConfig::default()
            .with_option("scenario_thresholds.stale_after_seconds", "60")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn every_option_is_accepted_with_a_plain_value() {
        let base = EngineConfig::default();
        let values = [
            ("poll_interval_seconds", "30"),
            ("style_rules", "[trailing_whitespace]"),
            ("max_events", "1000"),
            ("targets", "[]"),
            ("scenario_thresholds", "{drift_after_seconds: 1800}"),
            ("max_file_bytes", "4096"),
            ("max_line_length", "100"),
            ("banned_terms", "[manus]"),
            ("scan_extensions", "[py]"),
            ("ignored_dirs", "[.git]"),
            ("expected_dirs", "{src: [core, utils], tests: []}"),
        ];
        for (key, value) in values {
            assert!(base.with_option(key, value).is_ok(), "{key} rejected");
        }
    }

    #[test]
    fn expected_dirs_must_stay_inside_the_repository() {
        let base = EngineConfig::default();
        for value in ["{../outside: []}", "{src: [../../etc]}", "{/abs: []}", "{\"\": []}"] {
            let err = base.with_option("expected_dirs", value).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "expected_dirs"),
                "{value} accepted"
            );
        }
        let (next, change) = base
            .with_option("expected_dirs", "{docs: [api, user_guides]}")
            .unwrap();
        assert_eq!(change, ConfigChange::Scanning);
        assert_eq!(next.expected_dirs["docs"], vec!["api", "user_guides"]);
    }
}
