//! Configuration system for the HITL orchestrator
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (HITL_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Scheduling and checkpoint timing
    pub engine: EngineSettings,

    /// Where snapshots and the capability table live
    pub storage: StorageSettings,

    /// Rule set consumed by the validator
    pub rules: RuleSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Engine timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Seconds a checkpoint may await review before it is escalated.
    /// A rule set may override this per deployment.
    pub escalation_window_secs: u64,

    /// Interval between escalation sweeps in `watch` mode
    pub watch_interval_secs: u64,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base data directory (snapshot logs and capability table)
    pub data_dir: String,
}

/// Rule set settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Path to a rule-set TOML file (no rules when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            escalation_window_secs: 86_400,
            watch_interval_secs: 60,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.hitl/orchestrator".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content)
                .map_err(|e| Error::config_parse(&path, e.to_string()))?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            return if path.exists() {
                Ok(Some(path))
            } else {
                Err(Error::ConfigNotFound { path })
            };
        }

        let search_paths = [
            PathBuf::from("hitl-orchestrator.toml"),
            dirs::config_dir()
                .map(|p| p.join("hitl-orchestrator").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".hitl").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HITL_ESCALATION_WINDOW_SECS") {
            if let Ok(n) = val.parse() {
                self.engine.escalation_window_secs = n;
            }
        }
        if let Ok(val) = std::env::var("HITL_WATCH_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                self.engine.watch_interval_secs = n;
            }
        }

        if let Ok(val) = std::env::var("HITL_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("HITL_RULES_FILE") {
            self.rules.file = Some(val);
        }

        if let Ok(val) = std::env::var("HITL_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("HITL_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("HITL_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.data_dir = expand_path(&self.storage.data_dir);
        if let Some(ref file) = self.rules.file {
            self.rules.file = Some(expand_path(file));
        }
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.engine.escalation_window_secs == 0 {
            return Err(Error::config_field_invalid(
                "engine.escalation_window_secs",
                "escalation window must be greater than zero",
            ));
        }
        if self.engine.watch_interval_secs == 0 {
            return Err(Error::config_field_invalid(
                "engine.watch_interval_secs",
                "watch interval must be greater than zero",
            ));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "storage.data_dir",
                "data directory cannot be empty",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the data directory as a PathBuf
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }
}

/// Expand ~ and environment variables in paths
pub fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hitl")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_field_invalid(
            "path",
            format!(
                "Configuration file already exists: {}. Use --force to overwrite.",
                config_path.display()
            ),
        ));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# HITL Orchestrator Configuration

[engine]
# Seconds a checkpoint may wait for a human decision before it is escalated
escalation_window_secs = 86400

# Seconds between escalation sweeps when running `hitl-orchestrator watch`
watch_interval_secs = 60

[storage]
# Snapshot logs (runs/<run-id>/) and the capability table live here
data_dir = "~/.hitl/orchestrator"

[rules]
# Rule set evaluated against every produced artifact
# file = "~/.hitl/rules.toml"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.hitl/logs/orchestrator.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Use JSON format for logs (useful for log aggregation)
json_format = false
"#
    .to_string()
}
