use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::{
    DEFAULT_BINARY_NAME, DenyRule, FileExtension, ImportRule, LanguageSpec, SecurityPolicy,
    Toolchain,
};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Holds the built-in language registry. Library users can access this to
/// generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../sandrun.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("name '{name}' is claimed by both '{first}' and '{second}'")]
    AliasCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which isolation backend runs programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Use containers when the runtime answers, subprocesses otherwise
    #[default]
    Auto,

    /// Always use containers; startup fails without a reachable runtime
    Container,

    /// Plain host subprocesses under OS resource limits
    Subprocess,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Auto => "auto",
            BackendKind::Container => "container",
            BackendKind::Subprocess => "subprocess",
        })
    }
}

/// Settings for the container backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// CPU quota in microseconds per period
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    /// CPU period in microseconds
    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,

    /// Disable networking inside containers
    #[serde(default = "default_network_disabled")]
    pub network_disabled: bool,

    /// User to run as (`uid:gid`); defaults to the host user so the
    /// bind-mounted workspace stays writable
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cpu_quota: default_cpu_quota(),
            cpu_period: default_cpu_period(),
            network_disabled: default_network_disabled(),
            user: None,
        }
    }
}

fn default_cpu_quota() -> i64 {
    50_000
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_network_disabled() -> bool {
    true
}

/// Config for sandrun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Isolation backend selection
    #[serde(default)]
    pub backend: BackendKind,

    /// Directory under which workspaces are created (system temp dir if unset)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of concurrent executions (available parallelism if unset)
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Container backend settings
    #[serde(default)]
    pub container: ContainerConfig,

    /// Default resource limits applied to all executions.
    /// This will be overridden if the code execution request specifies different limits
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageSpec>,
}

impl Config {
    /// Create a new config with the built-in languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            backend: BackendKind::default(),
            workspace_root: None,
            max_concurrent: None,
            container: ContainerConfig::default(),
            default_limits: ResourceLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Concurrency ceiling for executions
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}
