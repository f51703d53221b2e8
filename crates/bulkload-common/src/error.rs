//! Configuration error types

use std::str::FromStr;

use thiserror::Error;

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while reading settings from the environment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Constraint(String),
}

/// Read `key` from the environment and parse it, falling back to `default`
/// when the variable is unset.
///
/// A variable that is set but does not parse is an error rather than a
/// silent fallback.
pub fn env_or<T: FromStr>(key: &'static str, default: T) -> ConfigResult<T> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
