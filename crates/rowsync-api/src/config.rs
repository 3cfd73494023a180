//! Configuration management for the rowsync service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rowsync_sync::{ClientConfig, DeliveryClient, SyncConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use rowsync_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Syncing to {}", config.downstream_url);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of open database connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Number of connections kept in the pool while idle.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,
    /// Database connection idle timeout in seconds.
    ///
    /// Environment variable: `DATABASE_IDLE_TIMEOUT`
    #[serde(default = "default_idle_timeout", alias = "DATABASE_IDLE_TIMEOUT")]
    pub database_idle_timeout: u64,
    /// Maximum lifetime of database connections in seconds.
    ///
    /// Environment variable: `DATABASE_MAX_LIFETIME`
    #[serde(default = "default_max_lifetime", alias = "DATABASE_MAX_LIFETIME")]
    pub database_max_lifetime: u64,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,

    // Downstream
    /// Endpoint receiving every delivered record.
    ///
    /// Environment variable: `DOWNSTREAM_URL`
    #[serde(default = "default_downstream_url", alias = "DOWNSTREAM_URL")]
    pub downstream_url: String,
    /// Delivery request timeout in seconds. Unset waits indefinitely.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default, alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: Option<u64>,

    // Sync
    /// Records selected per category group and pass.
    ///
    /// Environment variable: `SYNC_PAGE_SIZE`
    #[serde(default = "default_page_size", alias = "SYNC_PAGE_SIZE")]
    pub sync_page_size: usize,
    /// Seconds to wait after a pass that drained the backlog.
    ///
    /// Environment variable: `SYNC_POLL_INTERVAL_SECONDS`
    #[serde(default = "default_poll_interval", alias = "SYNC_POLL_INTERVAL_SECONDS")]
    pub sync_poll_interval_seconds: u64,
    /// Whether the background polling loop runs.
    ///
    /// Environment variable: `SCHEDULER_ENABLED`
    #[serde(default = "default_scheduler_enabled", alias = "SCHEDULER_ENABLED")]
    pub scheduler_enabled: bool,
    /// Upper bound for shutdown of the server and scheduler, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_GRACE_SECONDS`
    #[serde(default = "default_shutdown_grace", alias = "SHUTDOWN_GRACE_SECONDS")]
    pub shutdown_grace_seconds: u64,

    // Logging
    /// Tracing filter directives, applied once configuration is loaded.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides, then validate it.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
    }

    /// Extracts and validates configuration from `figment`.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the engine configuration.
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.sync_page_size,
            poll_interval: Duration::from_secs(self.sync_poll_interval_seconds),
        }
    }

    /// Convert to the delivery client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.downstream_url.clone(),
            timeout: self.delivery_timeout_seconds.map(Duration::from_secs),
            ..ClientConfig::default()
        }
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.rfind('@') {
            let scheme_end = self.database_url[..at_pos].find("://").map_or(0, |pos| pos + 3);
            if let Some(colon_pos) = self.database_url[scheme_end..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(scheme_end + colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.sync_page_size == 0 {
            anyhow::bail!("sync_page_size must be greater than 0");
        }

        if self.sync_poll_interval_seconds == 0 {
            anyhow::bail!("sync_poll_interval_seconds must be greater than 0");
        }

        DeliveryClient::new(self.to_client_config()).context("invalid downstream_url")?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            database_idle_timeout: default_idle_timeout(),
            database_max_lifetime: default_max_lifetime(),
            host: default_host(),
            port: default_port(),
            downstream_url: default_downstream_url(),
            delivery_timeout_seconds: None,
            sync_page_size: default_page_size(),
            sync_poll_interval_seconds: default_poll_interval(),
            scheduler_enabled: default_scheduler_enabled(),
            shutdown_grace_seconds: default_shutdown_grace(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/rowsync".to_string()
}

fn default_max_connections() -> u32 {
    100
}

fn default_min_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    4 * 60 * 60
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_downstream_url() -> String {
    ClientConfig::default().endpoint
}

fn default_page_size() -> usize {
    rowsync_sync::selector::DEFAULT_PAGE_SIZE
}

fn default_poll_interval() -> u64 {
    rowsync_sync::engine::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_log_level() -> String {
    "info,rowsync=debug,tower_http=debug".to_string()
}
