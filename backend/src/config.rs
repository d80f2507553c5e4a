//! Runtime configuration.
//!
//! # Environment Variables
//!
//! - `HOST`: bind address (default: `0.0.0.0`)
//! - `PORT`: bind port (default: `3000`)
//! - `STORAGE_MODE`: `sqlite` (default) | `in_memory`
//! - `DATABASE_URL`: SQLite URL (default: `sqlite://tasks.db`)
//! - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
//! - `APP_DEBUG`: expose internal error detail in 500 responses (default: `false`)
//! - `RATE_LIMIT_PER_MINUTE`: requests per client per minute, `0` disables (default: `50`)
//! - `REDIS_URL`: share rate limit counters through Redis instead of in-process
//! - `TRUSTED_PROXIES`: comma-separated proxy IPs whose `X-Forwarded-For` is
//!   honoured when identifying clients (default: none)

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid STORAGE_MODE '{0}' (expected 'sqlite' or 'in_memory')")]
    InvalidStorageMode(String),

    #[error("invalid {key} '{value}': expected a non-negative integer")]
    InvalidNumber { key: &'static str, value: String },

    #[error("invalid {key} '{value}': expected true/false")]
    InvalidFlag { key: &'static str, value: String },

    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("invalid TRUSTED_PROXIES entry '{0}': expected an IP address")]
    InvalidProxy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    #[default]
    Sqlite,
    InMemory,
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            _ => Err(ConfigError::InvalidStorageMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_mode: StorageMode,
    pub database_url: String,
    pub max_connections: u32,
    pub debug: bool,
    pub rate_limit_per_minute: u64,
    pub redis_url: Option<String>,
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            storage_mode: StorageMode::default(),
            database_url: "sqlite://tasks.db".to_string(),
            max_connections: 5,
            debug: false,
            rate_limit_per_minute: 50,
            redis_url: None,
            trusted_proxies: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source; unset or blank
    /// keys fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: number(&lookup, "PORT")?.unwrap_or(defaults.port),
            storage_mode: match lookup("STORAGE_MODE") {
                Some(value) => value.parse()?,
                None => defaults.storage_mode,
            },
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: number(&lookup, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            debug: flag(&lookup, "APP_DEBUG")?.unwrap_or(defaults.debug),
            rate_limit_per_minute: number(&lookup, "RATE_LIMIT_PER_MINUTE")?
                .unwrap_or(defaults.rate_limit_per_minute),
            redis_url: lookup("REDIS_URL"),
            trusted_proxies: match lookup("TRUSTED_PROXIES") {
                Some(value) => proxies(&value)?,
                None => defaults.trusted_proxies,
            },
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = format!("{}:{}", self.host, self.port);
        address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address))
    }
}

fn number<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { key, value })
        })
        .transpose()
}

fn flag(
    lookup: impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    lookup(key)
        .map(|value| match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { key, value }),
        })
        .transpose()
}

fn proxies(value: &str) -> Result<Vec<IpAddr>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse()
                .map_err(|_| ConfigError::InvalidProxy(entry.to_string()))
        })
        .collect()
}
