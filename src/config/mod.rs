//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data: build it in code, or load it from a
//! TOML file with [`EngineConfig::load`]. Every key is optional and falls back
//! to the value documented on the field.
//!
//! ```toml
//! debug_enabled = true
//! route_forwarding_max = 3
//! filter_default_routing_types = ["normal"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::router::RoutingType;

/// Errors raised while loading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Settings consumed by the router, the static resources and the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Append debug details (the error chain) to error bodies. Default `false`.
    pub debug_enabled: bool,

    /// How many times one exchange may be forwarded. Default `2`.
    pub route_forwarding_max: u32,

    /// Compare literal path segments case-sensitively. Default `true`.
    pub routes_case_sensitive: bool,

    /// Routing types a filter applies to when registered without explicit ones.
    /// Default `[normal, not_found]`.
    pub filter_default_routing_types: Vec<RoutingType>,

    /// Persist the output of static resource generators. Default `true`.
    pub write_generated_resources: bool,

    /// Root directory of classpath-backed static resources. Default `resources`.
    pub resource_root: PathBuf,

    /// Base directory for relative filesystem static resources. Default `.`.
    pub app_root: PathBuf,

    /// `max-age` used for static resources without explicit cache settings.
    /// Default `3600`.
    pub static_cache_seconds: u32,

    /// Prefix of the cache-buster codes removed from static resource URLs.
    /// Default `cb_`.
    pub cache_buster_prefix: String,

    /// Query parameter carrying a redirect flash message. Default `flash`.
    pub flash_message_param: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_enabled: false,
            route_forwarding_max: 2,
            routes_case_sensitive: true,
            filter_default_routing_types: vec![RoutingType::Normal, RoutingType::NotFound],
            write_generated_resources: true,
            resource_root: PathBuf::from("resources"),
            app_root: PathBuf::from("."),
            static_cache_seconds: 3600,
            cache_buster_prefix: "cb_".to_owned(),
            flash_message_param: "flash".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks the values a TOML file can get wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_buster_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "cache_buster_prefix",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.cache_buster_prefix.contains('/') {
            return Err(ConfigError::Invalid {
                key: "cache_buster_prefix",
                reason: "must not contain '/'".to_owned(),
            });
        }
        if self.flash_message_param.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "flash_message_param",
                reason: "must not be blank".to_owned(),
            });
        }
        if self.filter_default_routing_types.is_empty() {
            return Err(ConfigError::Invalid {
                key: "filter_default_routing_types",
                reason: "at least one routing type is required".to_owned(),
            });
        }
        Ok(())
    }
}
