//! Core configuration loaded from TOML or JSON

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Upper bound on scheduler worker threads
pub const MAX_WORKER_THREADS: usize = 1024;

/// Top-level configuration of the server core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub server: ServerSettings,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Directory layout of the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Root directory; the process working directory when unset
    pub root_dir: Option<PathBuf>,
    pub plugins_dir_name: String,
    pub worlds_dir_name: String,
    /// Create missing directories at startup
    pub create_directories: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            plugins_dir_name: "plugins".to_string(),
            worlds_dir_name: "worlds".to_string(),
            create_directories: true,
        }
    }
}

/// What happens to queued tasks when the scheduler shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run everything already queued before the workers exit
    #[default]
    Drain,
    /// Cancel queued tasks; only tasks already running finish
    Abandon,
}

/// Task scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads, 0 for one per logical CPU
    pub worker_threads: usize,
    /// Prefix of worker thread names
    pub thread_name: String,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name: "mirai-worker".to_string(),
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

impl SchedulerConfig {
    /// Worker count with the `0 = auto` rule applied
    pub fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get().max(1),
            n => n.min(MAX_WORKER_THREADS),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Parse `level` the same way the logging setup does, so per-target
    /// directives like `mirai_api=debug,warn` are accepted
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        EnvFilter::try_new(&self.level)
            .map_err(|e| ConfigError::Invalid(format!("Invalid log filter '{}': {}", self.level, e)))
    }
}

impl CoreConfig {
    /// Load configuration from file with format detection
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let config: CoreConfig = match ConfigFormat::from_extension(path) {
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseFailed(format!("JSON parse error: {}", e)))?,
            ConfigFormat::Toml => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(format!("TOML parse error: {}", e)))?
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_extension(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::ParseFailed(format!("JSON serialize error: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ConfigError::ParseFailed(format!("TOML serialize error: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("Scheduler thread name cannot be empty".to_string()));
        }

        if self.scheduler.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::Invalid(format!(
                "Scheduler worker threads cannot exceed {}",
                MAX_WORKER_THREADS
            )));
        }

        if self.server.plugins_dir_name.is_empty() || self.server.worlds_dir_name.is_empty() {
            return Err(ConfigError::Invalid("Directory names cannot be empty".to_string()));
        }

        if self.server.plugins_dir_name == self.server.worlds_dir_name {
            return Err(ConfigError::Invalid(
                "Plugin and world directories must differ".to_string(),
            ));
        }

        self.logging.env_filter()?;
        Ok(())
    }
}

/// Configuration file format detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
