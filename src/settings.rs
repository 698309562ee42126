//! Tool settings loaded from an optional TOML file

use crate::cluster::DEFAULT_TAIL_LINES;
use crate::error::SettingsError;
use crate::rules::DEFAULT_BACKPRESSURE_THRESHOLD;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings; every section and field is optional in the file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub discovery: DiscoverySettings,
    pub logs: LogSettings,
    pub rules: RuleSettings,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    /// Seconds between capability refreshes
    pub interval_seconds: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
        }
    }
}

impl DiscoverySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// Lines fetched per pod
    pub tail_lines: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleSettings {
    /// Backpressure occurrences strictly above this are Critical
    pub backpressure_threshold: usize,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    /// Path or name of the kubectl binary
    pub kubectl: String,
    /// Kube context; empty uses the current context
    pub context: String,
    pub request_timeout_seconds: u64,
    pub operator_namespace: String,
    pub operator_selector: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            context: String::new(),
            request_timeout_seconds: 10,
            operator_namespace: "opentelemetry-operator-system".to_string(),
            operator_selector: "app.kubernetes.io/name=opentelemetry-operator".to_string(),
        }
    }
}

impl ClusterSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// The configured context, if any
    pub fn context(&self) -> Option<&str> {
        match self.context.trim() {
            "" => None,
            context => Some(context),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text and validate them
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a settings file
    ///
    /// # Errors
    ///
    /// `SettingsError::ReadError` if the file cannot be read, otherwise the
    /// parse or validation error.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Load settings, falling back to defaults on any problem
    ///
    /// A missing or unreadable file is expected and only warned about; an
    /// invalid file is reported as an error before the defaults are used.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        info!("Loading settings from: {}", path.display());
        match Self::from_file(path) {
            Ok(settings) => settings,
            Err(SettingsError::ReadError(reason)) => {
                warn!("Settings file not found or unreadable ({}), using defaults", reason);
                Self::default()
            }
            Err(e) => {
                error!("Settings error in '{}': {}", path.display(), e);
                warn!("Using default settings due to invalid settings file");
                Self::default()
            }
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.discovery.interval_seconds == 0 {
            return Err(SettingsError::ValidationError(
                "discovery.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.logs.tail_lines == 0 {
            return Err(SettingsError::ValidationError(
                "logs.tail_lines must be greater than 0".to_string(),
            ));
        }
        if self.cluster.request_timeout_seconds == 0 {
            return Err(SettingsError::ValidationError(
                "cluster.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.cluster.kubectl.trim().is_empty() {
            return Err(SettingsError::ValidationError(
                "cluster.kubectl must not be empty".to_string(),
            ));
        }
        if self.cluster.operator_namespace.trim().is_empty() {
            return Err(SettingsError::ValidationError(
                "cluster.operator_namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
