//! Engine configuration.
//!
//! Loaded from a TOML or JSON file, or from the deployment's environment
//! variables. Both paths end in [`RotationConfig::validate`].

use crate::model::DEFAULT_REPLICA_PREFIX;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Longest accepted retention window, in days.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// I/O failure.
        source: std::io::Error,
    },
    /// The file contents did not deserialize.
    #[error("cannot parse config: {0}")]
    Parse(String),
    /// Neither `.toml` nor `.json`.
    #[error("unsupported config file extension: {0}")]
    UnsupportedExtension(String),
    /// A required setting is absent.
    #[error("missing required setting {0}")]
    Missing(&'static str),
    /// A setting has an unusable value.
    #[error("invalid value for {key}: {msg}")]
    Invalid {
        /// Environment variable name of the setting.
        key: &'static str,
        /// What is wrong with it.
        msg: String,
    },
}

/// What to do when the destination existence probe fails with anything
/// other than "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeErrorPolicy {
    /// Treat the replica as already present and skip the copy.
    #[default]
    AssumeCopied,
    /// Fail the candidate with a probe error.
    Fail,
}

impl ProbeErrorPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "assume-copied" | "assume_copied" | "skip" => Some(Self::AssumeCopied),
            "fail" | "error" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Settings of the rotation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Source region; the SDK's ambient region when unset.
    pub source_region: Option<String>,
    /// Region receiving the replicas. Required.
    pub dr_region: String,
    /// Encryption key used in the DR region for encrypted sources.
    pub dr_kms_key: Option<String>,
    /// Regex an instance identifier must match to be rotated.
    pub instance_filter: Option<String>,
    /// Retention window in days.
    pub retention_days: u32,
    /// Age in hours above which an uncopied snapshot raises a warning.
    pub copy_age_warning_hours: f64,
    /// Age in hours above which an uncopied snapshot raises an alert.
    pub copy_age_alert_hours: f64,
    /// Slack incoming webhook; notifications are disabled when unset.
    pub slack_webhook_url: Option<String>,
    /// Channel for warnings.
    pub slack_warnings_channel: Option<String>,
    /// Channel for alerts.
    pub slack_alerts_channel: Option<String>,
    /// Handling of probe failures other than "not found".
    pub probe_error_policy: ProbeErrorPolicy,
    /// Vendor prefix stripped from automated snapshot ids.
    pub replica_prefix: String,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            source_region: None,
            dr_region: String::new(),
            dr_kms_key: None,
            instance_filter: None,
            retention_days: 7,
            copy_age_warning_hours: 24.0,
            copy_age_alert_hours: 48.0,
            slack_webhook_url: None,
            slack_warnings_channel: None,
            slack_alerts_channel: None,
            probe_error_policy: ProbeErrorPolicy::AssumeCopied,
            replica_prefix: DEFAULT_REPLICA_PREFIX.to_string(),
        }
    }
}

impl RotationConfig {
    /// Load a `.toml` or `.json` file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: RotationConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => return Err(ConfigError::UnsupportedExtension(ext.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_vars(std::env::vars())
    }

    /// Build from `(name, value)` pairs using the deployment's variable names.
    /// Empty values count as unset.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = RotationConfig::default();
        for (key, value) in vars {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }
            match key.as_ref() {
                "SOURCE_REGION" => config.source_region = Some(value),
                "DR_REGION" => config.dr_region = value,
                "DR_KMS_KEY" => config.dr_kms_key = Some(value),
                "DATABASE_INSTANCE_FILTER" => config.instance_filter = Some(value),
                "MAINTAIN_X_SNAPSHOTS" => {
                    config.retention_days = parse_number("MAINTAIN_X_SNAPSHOTS", &value)?
                }
                "SNAPSHOT_COPY_AGE_WARNING" => {
                    config.copy_age_warning_hours =
                        parse_number("SNAPSHOT_COPY_AGE_WARNING", &value)?
                }
                "SNAPSHOT_COPY_AGE_ALERT" => {
                    config.copy_age_alert_hours = parse_number("SNAPSHOT_COPY_AGE_ALERT", &value)?
                }
                "SLACK_WEBHOOK_URL" => config.slack_webhook_url = Some(value),
                "SLACK_WARNINGS_CHANNEL" => config.slack_warnings_channel = Some(value),
                "SLACK_ALERTS_CHANNEL" => config.slack_alerts_channel = Some(value),
                "PROBE_ERROR_POLICY" => {
                    config.probe_error_policy =
                        ProbeErrorPolicy::parse(&value).ok_or(ConfigError::Invalid {
                            key: "PROBE_ERROR_POLICY",
                            msg: format!("expected assume-copied or fail, got {}", value),
                        })?
                }
                "REPLICA_PREFIX" => config.replica_prefix = value,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check required settings, ranges and the filter pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dr_region.trim().is_empty() {
            return Err(ConfigError::Missing("DR_REGION"));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid {
                key: "MAINTAIN_X_SNAPSHOTS",
                msg: "retention window must be at least one day".to_string(),
            });
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid {
                key: "MAINTAIN_X_SNAPSHOTS",
                msg: format!(
                    "retention window of {} days exceeds the maximum of {}",
                    self.retention_days, MAX_RETENTION_DAYS
                ),
            });
        }
        if self.copy_age_warning_hours.is_nan() || self.copy_age_warning_hours < 0.0 {
            return Err(ConfigError::Invalid {
                key: "SNAPSHOT_COPY_AGE_WARNING",
                msg: format!("{} is not a non-negative number", self.copy_age_warning_hours),
            });
        }
        if self.copy_age_alert_hours.is_nan()
            || self.copy_age_alert_hours < self.copy_age_warning_hours
        {
            return Err(ConfigError::Invalid {
                key: "SNAPSHOT_COPY_AGE_ALERT",
                msg: format!(
                    "alert threshold {} is below warning threshold {}",
                    self.copy_age_alert_hours, self.copy_age_warning_hours
                ),
            });
        }
        if let Some(pattern) = &self.instance_filter {
            Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                key: "DATABASE_INSTANCE_FILTER",
                msg: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        msg: format!("{}: {}", value, e),
    })
}
