//! Configuration
//!
//! TOML configuration with one section per subsystem. Every field has a
//! default so a missing file or a sparse one still yields a runnable setup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;
use crate::detect::anomaly::AnomalyConfig;
use crate::geoip::GeoIpConfig;
use crate::sink::AlertsConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub detection: AnomalyConfig,

    #[serde(default)]
    pub geoip: GeoIpConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Load from the default locations or fall back to defaults.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/netwarden/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("netwarden/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to the SQLite alert store.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path to the signature rule document.
    #[serde(default = "default_rules_path")]
    pub path: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

fn default_db_path() -> String {
    "/var/lib/netwarden/alerts.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rules_path() -> String {
    "signature_rules.json".to_string()
}
