//! Configuration management for rowguard
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (`ROWGUARD_*` prefix, highest precedence)
//! 2. rowguard.local.toml (gitignored, local overrides)
//! 3. rowguard.toml (git-tracked, project config)
//! 4. ~/.config/rowguard/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! Policies themselves are code. Configuration only covers how the engine
//! around them behaves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE, Paths};

/// Main rowguard configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowguardConfig {
    pub engine: EngineConfig,
    /// Feature flags visible to policy activation conditions.
    pub features: BTreeMap<String, bool>,
    pub audit: AuditConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Matched by `when_environment` activation conditions.
    pub environment: String,
    /// Deny access to tables without a policy schema.
    pub deny_unregistered_tables: bool,
    /// Scoped helpers fail when no context is installed.
    pub require_context: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            deny_unregistered_tables: false,
            require_context: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Record allow decisions as well as denials.
    pub log_allows: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_allows: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Lifetime of cached resolver output.
    pub cache_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

impl ResolverConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl RowguardConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parses a single TOML file without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create a development configuration
    pub fn development() -> Self {
        Self::default()
    }

    /// Create a production configuration
    pub fn production() -> Self {
        Self {
            engine: EngineConfig {
                environment: "production".to_string(),
                deny_unregistered_tables: true,
                require_context: true,
            },
            audit: AuditConfig {
                enabled: true,
                log_allows: false,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.environment.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.environment must not be empty".to_string(),
            ));
        }
        if let Some(name) = self.features.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "feature name {name:?} must not be blank"
            )));
        }
        Ok(())
    }

    /// Names of features switched on.
    pub fn enabled_features(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.as_str())
    }
}
