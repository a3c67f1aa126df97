//! Configuration loading for sandrun
//!
//! Layers the embedded language registry, an optional user file and the
//! `SANDRUN_*` limit variables using the config crate.

use std::collections::HashMap;
use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat, Map};
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, ConfigError, EXAMPLE_CONFIG};
use crate::types::{MAX_TIMEOUT_SECS, ResourceLimits};

/// Prefix of the environment variables that adjust default limits
const ENV_PREFIX: &str = "SANDRUN";

/// Limit defaults taken from the environment
#[derive(Debug, Default, Deserialize)]
struct EnvLimits {
    /// `SANDRUN_TIMEOUT`, wall clock seconds
    #[serde(default)]
    timeout: Option<f64>,

    /// `SANDRUN_MEMORY_MB`
    #[serde(default)]
    memory_mb: Option<u64>,
}

impl Config {
    /// Load configuration from a file layered over the built-in languages
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    /// Load the built-in languages, an optional user file, then the
    /// `SANDRUN_TIMEOUT`/`SANDRUN_MEMORY_MB` environment defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading limit variables from `env` instead of
    /// the process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            debug!(?path, "layering configuration file");
            builder = builder.add_source(File::from(path));
        }

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.apply_env_limits(env)?;
        config.finalize()
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.finalize()
    }

    fn apply_env_limits(&mut self, env: Option<Map<String, String>>) -> Result<(), ConfigError> {
        let limits: EnvLimits = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        if let Some(timeout) = limits.timeout {
            debug!(timeout, "default timeout from environment");
            self.default_limits.timeout = Some(timeout);
        }
        if let Some(memory) = limits.memory_mb {
            debug!(memory, "default memory limit from environment");
            self.default_limits.memory_limit = Some(memory);
        }
        Ok(())
    }

    /// Normalize language ids and validate the configuration
    fn finalize(mut self) -> Result<Self, ConfigError> {
        validate_limits(&self.default_limits, "default_limits")?;

        if self.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_owned(),
            ));
        }
        if self.container.cpu_quota <= 0 || self.container.cpu_period <= 0 {
            return Err(ConfigError::Invalid(
                "container cpu_quota and cpu_period must be positive".to_owned(),
            ));
        }

        let mut entries: Vec<_> = self.languages.drain().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        // Every id and alias must resolve to exactly one language
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut languages = HashMap::with_capacity(entries.len());
        for (key, mut language) in entries {
            let id = key.trim().to_lowercase();
            if id.is_empty() {
                return Err(ConfigError::Invalid("language has empty id".to_owned()));
            }
            if let Some(first) = owners.insert(id.clone(), id.clone()) {
                return Err(ConfigError::AliasCollision {
                    name: id,
                    first,
                    second: key,
                });
            }

            if let Some(ref limits) = language.run_limits {
                validate_limits(limits, &format!("languages.{id}.run_limits"))?;
            }
            if let Some(ref limits) = language.compile_limits {
                validate_limits(limits, &format!("languages.{id}.compile_limits"))?;
            }

            language.id = id.clone();
            languages.insert(id, language);
        }

        let mut ids: Vec<_> = languages.keys().cloned().collect();
        ids.sort();
        for id in ids {
            for alias in &languages[&id].aliases {
                match owners.get(alias) {
                    Some(owner) if owner == &id => {}
                    Some(owner) => {
                        return Err(ConfigError::AliasCollision {
                            name: alias.clone(),
                            first: owner.clone(),
                            second: id,
                        });
                    }
                    None => {
                        owners.insert(alias.clone(), id.clone());
                    }
                }
            }
        }

        self.languages = languages;
        Ok(self)
    }
}

fn validate_limits(limits: &ResourceLimits, context: &str) -> Result<(), ConfigError> {
    let invalid = |field: &str| {
        Err(ConfigError::Invalid(format!(
            "{context}.{field} must be positive"
        )))
    };

    if !limits.timeout_in_range() {
        return Err(ConfigError::Invalid(format!(
            "{context}.timeout must be in (0, {MAX_TIMEOUT_SECS}] seconds"
        )));
    }
    if limits.cpu_time == Some(0) {
        return invalid("cpu_time");
    }
    if limits.memory_limit == Some(0) {
        return invalid("memory_limit");
    }
    if limits.max_processes == Some(0) {
        return invalid("max_processes");
    }
    if limits.max_output == Some(0) {
        return invalid("max_output");
    }
    if limits.max_file_size == Some(0) {
        return invalid("max_file_size");
    }
    if limits.max_open_files == Some(0) {
        return invalid("max_open_files");
    }
    Ok(())
}
