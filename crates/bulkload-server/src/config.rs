//! Server configuration

use bulkload_common::{env_or, ConfigError, ConfigResult};
use bulkload_ingest::DbConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default request body limit for an upload (64 MiB across all three files).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DbConfig,
    /// Create the tables on startup if they do not exist
    pub init_schema: bool,
}

/// Listener and request handling settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Read `BULKLOAD_*` variables over the defaults
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            host: env_or("BULKLOAD_HOST", DEFAULT_SERVER_HOST.to_string())?,
            port: env_or("BULKLOAD_PORT", DEFAULT_SERVER_PORT)?,
            max_upload_bytes: env_or("BULKLOAD_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            shutdown_timeout_secs: env_or("BULKLOAD_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Constraint("Server host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Constraint("Server port must be greater than 0".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Constraint(
                "Maximum upload size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DbConfig::from_env()?,
            init_schema: env_or("BULKLOAD_INIT_SCHEMA", false)?,
        })
    }
}
