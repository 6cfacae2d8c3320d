//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use stockflow_infra::db::PoolSettings;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not valid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// Where the server listens and which persistence engine backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// `Some` selects the PostgreSQL engine; `None` the in-memory one.
    pub database: Option<PoolSettings>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "STOCKFLOW_BIND_ADDR", || {
            DEFAULT_BIND_ADDR.parse::<SocketAddr>().map_err(|e| format!("{e}"))
        })?;

        let use_persistent = parse_or(&lookup, "USE_PERSISTENT_STORES", || Ok(false))?;

        let database = if use_persistent {
            let url = lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;

            let mut settings = PoolSettings::new(url);
            settings.max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", || {
                Ok(PoolSettings::DEFAULT_MAX_CONNECTIONS)
            })?;
            settings.acquire_timeout = Duration::from_secs(parse_or(
                &lookup,
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                || Ok(PoolSettings::DEFAULT_ACQUIRE_TIMEOUT.as_secs()),
            )?);
            Some(settings)
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            database,
        })
    }
}

fn parse_or<F, T, D>(lookup: &F, var: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> Result<T, String>,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
            ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }
        }),
        _ => default().map_err(|reason| ConfigError::Invalid { var, reason }),
    }
}
