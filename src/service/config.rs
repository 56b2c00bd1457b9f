//! Service configuration file support

use crate::error::LaunchError;
use crate::session::{LaunchTarget, DEFAULT_DESKTOP};
use crate::worker::{WorkerSettings, DEFAULT_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file name looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "sessionrun.toml";

/// Longest accepted launch interval
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Executable and arguments as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Absolute path of the executable
    pub path: String,

    /// Argument string appended after the quoted executable
    #[serde(default)]
    pub args: String,
}

impl TargetConfig {
    pub fn to_launch_target(&self) -> Result<LaunchTarget, LaunchError> {
        LaunchTarget::new(self.path.clone(), self.args.clone())
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: "C:\\Windows\\System32\\notepad.exe".to_string(),
            args: String::new(),
        }
    }
}

/// Service configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Seconds between console-user launches
    pub interval_secs: u64,

    /// Desktop the launched processes attach to
    pub desktop: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    /// Launched as the console user on every interval
    pub target: TargetConfig,

    /// Launched once as the service identity when the service starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_target: Option<TargetConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            desktop: DEFAULT_DESKTOP.to_string(),
            log_level: "info".to_string(),
            log_file: String::new(),
            target: TargetConfig::default(),
            startup_target: None,
        }
    }
}

impl ServiceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: sessionrun.toml
    /// 2. %PROGRAMDATA%\sessionrun\config.toml
    ///
    /// Defaults apply only when neither file exists. A file that exists but
    /// fails to load is an error, never replaced by defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_first(Self::default_candidates())
    }

    /// Load the first of `candidates` that exists, or defaults if none does
    pub fn load_first<I>(candidates: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        match candidates.into_iter().find(|path| path.exists()) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// First existing config file among the default locations
    pub fn default_path() -> Option<PathBuf> {
        Self::default_candidates().find(|path| path.exists())
    }

    fn default_candidates() -> impl Iterator<Item = PathBuf> {
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)));
        let program_data = std::env::var("PROGRAMDATA")
            .ok()
            .map(|dir| Path::new(&dir).join("sessionrun").join("config.toml"));

        beside_exe.into_iter().chain(program_data)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be at least 1".into()));
        }
        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "interval_secs must be at most {} (one day), got {}",
                MAX_INTERVAL_SECS, self.interval_secs
            )));
        }
        if self.desktop.trim().is_empty() {
            return Err(ConfigError::Invalid("desktop must not be empty".into()));
        }
        self.target.to_launch_target().map_err(|e| ConfigError::Target {
            key: "target",
            source: e,
        })?;
        if let Some(startup) = &self.startup_target {
            startup.to_launch_target().map_err(|e| ConfigError::Target {
                key: "startup_target",
                source: e,
            })?;
        }
        Ok(())
    }

    /// Convert to WorkerSettings
    pub fn to_worker_settings(&self) -> Result<WorkerSettings, ConfigError> {
        self.validate()?;
        Ok(WorkerSettings {
            interval: Duration::from_secs(self.interval_secs),
            target: self.target.to_launch_target().map_err(|e| ConfigError::Target {
                key: "target",
                source: e,
            })?,
            startup_target: self
                .startup_target
                .as_ref()
                .map(TargetConfig::to_launch_target)
                .transpose()
                .map_err(|e| ConfigError::Target {
                    key: "startup_target",
                    source: e,
                })?,
        })
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# sessionrun Service Configuration
# This file configures the console-session launcher service

# Seconds between launches, 1 to 86400 (default: 20)
interval_secs = 20

# Desktop for launched processes (default: WinSta0\Default)
desktop = 'WinSta0\Default'

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
# Example: log_file = 'C:\ProgramData\sessionrun\sessionrun.log'
log_file = ""

# Launched as the logged-on console user on every interval
[target]
path = 'C:\Windows\System32\notepad.exe'
args = ""

# Launched once as the service account when the service starts
# [startup_target]
# path = 'C:\Windows\System32\notepad.exe'
# args = ""
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),

    /// A launch target failed validation
    #[error("Invalid '{key}': {source}")]
    Target {
        key: &'static str,
        #[source]
        source: LaunchError,
    },

    /// Any other out-of-range value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
