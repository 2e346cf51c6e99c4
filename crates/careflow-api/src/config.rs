//! Configuration for the Careflow provisioning service.

use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use careflow_provisioning::{ClientConfig, ProvisioningConfig, RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "careflow.toml";

/// Service configuration with defaults, file, and environment overrides.
///
/// Loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`careflow.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Leaving `LORAWAN_MANAGER_URL` or `LORAWAN_MANAGER_API_KEY` empty disables
/// provisioning webhooks without affecting the rest of the service.
///
/// # Example
///
/// ```no_run
/// use careflow_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,

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

    // LoRaWAN manager
    /// Manager base URL.
    ///
    /// Environment variable: `LORAWAN_MANAGER_URL`
    #[serde(default, alias = "LORAWAN_MANAGER_URL")]
    pub lorawan_manager_url: String,
    /// Manager API key.
    ///
    /// Environment variable: `LORAWAN_MANAGER_API_KEY`
    #[serde(default, alias = "LORAWAN_MANAGER_API_KEY")]
    pub lorawan_manager_api_key: String,

    // Delivery
    /// HTTP timeout for one webhook attempt in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,
    /// Attempts per delivery lifecycle, including the first.
    ///
    /// Environment variable: `WEBHOOK_MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts", alias = "WEBHOOK_MAX_ATTEMPTS")]
    pub webhook_max_attempts: u32,
    /// Backoff slept after each failed attempt, in milliseconds.
    ///
    /// Environment variable: `WEBHOOK_RETRY_DELAYS_MS` (e.g. `[1000,5000,15000]`)
    #[serde(default = "default_retry_delays_ms", alias = "WEBHOOK_RETRY_DELAYS_MS")]
    pub webhook_retry_delays_ms: Vec<u64>,

    // Logging
    /// Log filter directives.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, config file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed("")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the provisioning crate's settings.
    pub fn to_provisioning_config(&self) -> ProvisioningConfig {
        ProvisioningConfig::new(&self.lorawan_manager_url, &self.lorawan_manager_api_key)
            .with_client(ClientConfig {
                timeout: Duration::from_secs(self.delivery_timeout_seconds),
                ..ClientConfig::default()
            })
            .with_retry(RetryPolicy::new(
                self.webhook_max_attempts,
                self.webhook_retry_delays_ms.iter().copied().map(Duration::from_millis).collect(),
            ))
    }

    /// Parses the server socket address from host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Database URL with the password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        if self.webhook_max_attempts == 0 {
            anyhow::bail!("webhook_max_attempts must be greater than 0");
        }

        if self.webhook_retry_delays_ms.is_empty() {
            anyhow::bail!("webhook_retry_delays_ms must contain at least one delay");
        }

        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.lorawan_manager_api_key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("Config")
            .field("database_url", &self.database_url_masked())
            .field("database_max_connections", &self.database_max_connections)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("lorawan_manager_url", &self.lorawan_manager_url)
            .field("lorawan_manager_api_key", &api_key)
            .field("delivery_timeout_seconds", &self.delivery_timeout_seconds)
            .field("webhook_max_attempts", &self.webhook_max_attempts)
            .field("webhook_retry_delays_ms", &self.webhook_retry_delays_ms)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            host: default_host(),
            port: default_port(),
            lorawan_manager_url: String::new(),
            lorawan_manager_api_key: String::new(),
            delivery_timeout_seconds: default_delivery_timeout(),
            webhook_max_attempts: default_max_attempts(),
            webhook_retry_delays_ms: default_retry_delays_ms(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/careflow".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 5_000, 15_000]
}

fn default_log_level() -> String {
    "info,careflow=debug,tower_http=debug".to_string()
}
