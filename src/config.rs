use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::{info, warn};
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Application configuration, layered from built-in defaults, optional
/// `config/*.toml` profiles, and `APP__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Run embedded migrations at startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Shared secret for verifying inbound payment webhook signatures.
    /// When unset, verification is disabled (development only).
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Maximum accepted age of a signed webhook timestamp, in seconds
    #[serde(default = "default_webhook_timestamp_tolerance")]
    pub webhook_timestamp_tolerance_secs: i64,

    /// Bounded retries for transient allocation conflicts
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_allocation_retry_attempts")]
    pub allocation_retry_attempts: u32,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_webhook_timestamp_tolerance() -> i64 {
    300
}

fn default_allocation_retry_attempts() -> u32 {
    3
}

impl AppConfig {
    /// Direct constructor used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            webhook_secret: None,
            webhook_timestamp_tolerance_secs: default_webhook_timestamp_tolerance(),
            allocation_retry_attempts: default_allocation_retry_attempts(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration for the current `RUN_ENV`/`APP_ENV` profile.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://carddrop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("auto_migrate", true)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    if cfg.webhook_secret.is_none() {
        warn!("webhook_secret not configured; inbound webhook signatures will NOT be verified");
    }

    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("carddrop_api={},tower_http=info", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let builder = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true);

    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_defaults() {
        let cfg = AppConfig::new(
            "sqlite://test.db".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );

        assert_eq!(cfg.port, 18080);
        assert_eq!(cfg.allocation_retry_attempts, 3);
        assert_eq!(cfg.webhook_timestamp_tolerance_secs, 300);
        assert!(cfg.webhook_secret.is_none());
        assert!(!cfg.is_production());
    }
}
