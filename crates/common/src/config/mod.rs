//! Configuration management for PaperDuel services
//!
//! Supports loading configuration from:
//! - Built-in defaults
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Environment variables (prefixed with APP__)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Paper store backend selection
    pub store: StoreConfig,

    /// Paper source (external feed) configuration
    pub source: SourceConfig,

    /// Pool refresh and retention policy
    pub pool: PoolConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run pending migrations on startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

/// Which paper store implementation backs the service
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source provider: arxiv, static
    #[serde(default = "default_source_provider")]
    pub provider: String,

    /// API base URL
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Topic query sent to the feed
    #[serde(default = "default_topic_query")]
    pub topic_query: String,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures
    #[serde(default = "default_source_retries")]
    pub max_retries: u32,

    /// User agent sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Below this many papers the pool is refreshed
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u64,

    /// Refresh when the newest paper is older than this
    #[serde(default = "default_refresh_interval_hours")]
    pub refresh_interval_hours: u32,

    /// Candidates requested per refresh
    #[serde(default = "default_pool_batch_size")]
    pub batch_size: usize,

    /// Refresh-then-select attempts per "next pair" request
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_store_backend() -> StoreBackend { StoreBackend::Postgres }
fn default_source_provider() -> String { "arxiv".to_string() }
fn default_source_base_url() -> String { "http://export.arxiv.org/api/query".to_string() }
fn default_topic_query() -> String { "cat:cs.LG".to_string() }
fn default_source_timeout() -> u64 { 30 }
fn default_source_retries() -> u32 { 3 }
fn default_user_agent() -> String { format!("paperduel/{}", crate::VERSION) }
fn default_min_pool_size() -> u64 { 50 }
fn default_refresh_interval_hours() -> u32 { 24 }
fn default_pool_batch_size() -> usize { 100 }
fn default_max_refresh_attempts() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "paperduel".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from defaults, files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&AppConfig::default())?)

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__POOL__MIN_POOL_SIZE=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Load from a specific file, layered over the defaults
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Reject settings that deserialize but cannot drive the pool
    fn validated(self) -> Result<Self, ConfigError> {
        let pool = &self.pool;
        if pool.refresh_interval_hours == 0 {
            return Err(ConfigError::Message(
                "pool.refresh_interval_hours must be at least 1".to_string(),
            ));
        }
        if pool.batch_size == 0 {
            return Err(ConfigError::Message(
                "pool.batch_size must be at least 1".to_string(),
            ));
        }
        if pool.max_refresh_attempts == 0 {
            return Err(ConfigError::Message(
                "pool.max_refresh_attempts must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl PoolConfig {
    /// Maximum age of the newest paper before the pool counts as stale
    pub fn refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.refresh_interval_hours))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: default_min_pool_size(),
            refresh_interval_hours: default_refresh_interval_hours(),
            batch_size: default_pool_batch_size(),
            max_refresh_attempts: default_max_refresh_attempts(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_source_provider(),
            base_url: default_source_base_url(),
            topic_query: default_topic_query(),
            timeout_secs: default_source_timeout(),
            max_retries: default_source_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/paperduel".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_enabled(),
            },
            store: StoreConfig {
                backend: default_store_backend(),
            },
            source: SourceConfig::default(),
            pool: PoolConfig::default(),
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.source.topic_query, "cat:cs.LG");
        assert_eq!(config.store.backend, StoreBackend::Postgres);
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.min_pool_size, 50);
        assert_eq!(pool.batch_size, 100);
        assert_eq!(pool.refresh_interval(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_defaults_round_trip_through_config_builder() {
        let built = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.pool.max_refresh_attempts, 3);
        assert_eq!(config.source.base_url, "http://export.arxiv.org/api/query");
    }

    fn with_pool_override(key: &str, value: i64) -> Result<AppConfig, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .set_override(key, value)?
            .build()?
            .try_deserialize::<AppConfig>()?
            .validated()
    }

    #[test]
    fn test_negative_refresh_interval_is_rejected() {
        assert!(with_pool_override("pool.refresh_interval_hours", -1).is_err());
    }

    #[test]
    fn test_zero_pool_settings_are_rejected() {
        for key in [
            "pool.refresh_interval_hours",
            "pool.batch_size",
            "pool.max_refresh_attempts",
        ] {
            let err = with_pool_override(key, 0).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }

    #[test]
    fn test_valid_pool_override_is_accepted() {
        let config = with_pool_override("pool.refresh_interval_hours", 6).unwrap();
        assert_eq!(config.pool.refresh_interval(), chrono::Duration::hours(6));
    }
}
