use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DROPDOWN_CACHE_TTL_SECS: u64 = 300;

/// Application configuration structure with validation.
///
/// Only settings this core owns live here; the HTTP surface carries its own
/// configuration in the layer that embeds the crate.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Runtime environment name (development, test, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Maximum number of pooled database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of pooled database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// TTL in seconds for the dropdown lookup cache
    #[serde(default = "default_dropdown_cache_ttl")]
    pub dropdown_cache_ttl_secs: u64,

    /// Run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_dropdown_cache_ttl() -> u64 {
    DEFAULT_DROPDOWN_CACHE_TTL_SECS
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Builds a configuration directly, applying defaults for everything but
    /// the database URL. Used by tests and embedded setups.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            log_level: default_log_level(),
            environment: default_environment(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            dropdown_cache_ttl_secs: default_dropdown_cache_ttl(),
            auto_migrate: false,
        }
    }

    /// Loads configuration from `config/{RUN_ENV}.toml` (optional) layered
    /// under `APP__`-prefixed environment variables.
    pub fn load() -> Result<Self, AppConfigError> {
        let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
        info!(environment = %run_env, "loading configuration");

        let cfg: AppConfig = Config::builder()
            .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
            .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()
            .map_err(|e| AppConfigError::Invalid(e.to_string()))?;

        if cfg.db_min_connections > cfg.db_max_connections {
            return Err(AppConfigError::Invalid(
                "db_min_connections must not exceed db_max_connections".to_string(),
            ));
        }

        Ok(cfg)
    }

    pub fn is_test(&self) -> bool {
        self.environment == "test"
    }
}
