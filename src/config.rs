//! Configuration for the criticality kernel.
//!
//! Read from `criticality.toml` with every field defaulting when absent.
//! Sections are closed: unknown keys and type mismatches surface as
//! descriptive field-path errors at load time rather than silent drift.
//!
//! ```toml
//! [models]
//! default = "synthesis-large"
//!
//! [models.overrides]
//! ignition = "synthesis-small"
//!
//! [paths]
//! state_file = ".criticality-state.json"
//! archive_root = ".criticality"
//!
//! [thresholds]
//! max_ticks = 64
//! blocking_timeout_ms = 86400000
//! state_max_age_ms = 86400000
//!
//! [notifications]
//! channel = "slack"
//! target = "#synthesis-runs"
//!
//! [mass_defect]
//! targets = ["binary-size", "startup-latency"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::checkpoint::{DEFAULT_MAX_AGE_MS, DEFAULT_STATE_FILE};
use crate::phase::ProtocolPhase;
use crate::transition::ARCHIVE_ROOT;

/// Outbound notification transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Slack,
    Email,
    Webhook,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationChannel::Slack => write!(f, "slack"),
            NotificationChannel::Email => write!(f, "email"),
            NotificationChannel::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for NotificationChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slack" => Ok(NotificationChannel::Slack),
            "email" => Ok(NotificationChannel::Email),
            "webhook" => Ok(NotificationChannel::Webhook),
            _ => anyhow::bail!(
                "Invalid notification channel '{}'. Valid values: slack, email, webhook",
                s
            ),
        }
    }
}

/// Which model each phase's external call should use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    /// Model used when no per-phase override matches.
    #[serde(default = "default_model")]
    pub default: String,
    /// Per-phase overrides keyed by the phase wire name.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_model() -> String {
    "synthesis-large".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            overrides: HashMap::new(),
        }
    }
}

impl ModelsConfig {
    pub fn model_for(&self, phase: ProtocolPhase) -> &str {
        self.overrides
            .get(phase.as_str())
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

/// Where the kernel keeps its files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_archive_root() -> PathBuf {
    PathBuf::from(ARCHIVE_ROOT)
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            archive_root: default_archive_root(),
        }
    }
}

/// Numeric limits for the run loop and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsConfig {
    /// Run-loop budget before a synthetic external error.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,
    /// Default timeout applied to blocking queries; none means wait forever.
    #[serde(default)]
    pub blocking_timeout_ms: Option<u64>,
    /// Checkpoint staleness horizon.
    #[serde(default = "default_state_max_age_ms")]
    pub state_max_age_ms: u64,
}

fn default_max_ticks() -> u32 {
    64
}

fn default_state_max_age_ms() -> u64 {
    DEFAULT_MAX_AGE_MS
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            blocking_timeout_ms: None,
            state_max_age_ms: default_state_max_age_ms(),
        }
    }
}

/// Notification transport settings. Absent channel disables delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub channel: Option<NotificationChannel>,
    #[serde(default)]
    pub target: Option<String>,
}

/// Mass-defect phase goals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MassDefectConfig {
    #[serde(default)]
    pub targets: Vec<String>,
}

/// The full configuration surface the kernel consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriticalityConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub mass_defect: MassDefectConfig,
}

impl CriticalityConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CriticalityConfig =
            toml::from_str(content).context("Invalid configuration")?;
        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CriticalityConfig::default();
        assert_eq!(config.paths.state_file, PathBuf::from(".criticality-state.json"));
        assert_eq!(config.paths.archive_root, PathBuf::from(".criticality"));
        assert_eq!(config.thresholds.max_ticks, 64);
        assert_eq!(config.thresholds.blocking_timeout_ms, None);
        assert_eq!(config.thresholds.state_max_age_ms, DEFAULT_MAX_AGE_MS);
        assert!(config.notifications.channel.is_none());
        assert!(config.mass_defect.targets.is_empty());
    }

    #[test]
    fn test_full_parse() {
        let config = CriticalityConfig::from_toml_str(
            r#"
            [models]
            default = "synthesis-large"

            [models.overrides]
            ignition = "synthesis-small"

            [paths]
            state_file = "run/state.json"

            [thresholds]
            max_ticks = 16
            blocking_timeout_ms = 60000

            [notifications]
            channel = "webhook"
            target = "https://hooks.example/synthesis"

            [mass_defect]
            targets = ["binary-size"]
            "#,
        )
        .unwrap();

        assert_eq!(config.models.model_for(ProtocolPhase::Ignition), "synthesis-small");
        assert_eq!(config.models.model_for(ProtocolPhase::Lattice), "synthesis-large");
        assert_eq!(config.paths.state_file, PathBuf::from("run/state.json"));
        // Unset fields keep their defaults
        assert_eq!(config.paths.archive_root, PathBuf::from(".criticality"));
        assert_eq!(config.thresholds.max_ticks, 16);
        assert_eq!(config.thresholds.blocking_timeout_ms, Some(60_000));
        assert_eq!(config.notifications.channel, Some(NotificationChannel::Webhook));
        assert_eq!(config.mass_defect.targets, vec!["binary-size"]);
    }

    #[test]
    fn test_unknown_channel_rejected_with_field_context() {
        let err = CriticalityConfig::from_toml_str(
            r#"
            [notifications]
            channel = "carrier-pigeon"
            "#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("channel"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = CriticalityConfig::from_toml_str(
            r#"
            [thresholds]
            max_tics = 5
            "#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("max_tics"));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let err = CriticalityConfig::from_toml_str(
            r#"
            [thresholds]
            max_ticks = "many"
            "#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("max_ticks") || msg.contains("integer"));
    }

    #[test]
    fn test_channel_from_str() {
        assert_eq!(
            "slack".parse::<NotificationChannel>().unwrap(),
            NotificationChannel::Slack
        );
        assert_eq!(
            "WEBHOOK".parse::<NotificationChannel>().unwrap(),
            NotificationChannel::Webhook
        );
        let err = "fax".parse::<NotificationChannel>().unwrap_err();
        assert!(err.to_string().contains("slack, email, webhook"));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("criticality.toml");
        let config = CriticalityConfig::load_or_default(&missing).unwrap();
        assert_eq!(config.thresholds.max_ticks, 64);

        fs::write(&missing, "[thresholds]\nmax_ticks = 9\n").unwrap();
        let config = CriticalityConfig::load_or_default(&missing).unwrap();
        assert_eq!(config.thresholds.max_ticks, 9);
    }
}
