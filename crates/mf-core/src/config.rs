//! Configuration types and loading
//!
//! Env-driven configuration, loaded once at process start. Embedding
//! services read their environment (or a dotenv file) before calling
//! `from_env`.

use serde::{Deserialize, Serialize};

use crate::error::MfError;
use crate::result::MfResult;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/maintflow".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 30,
        }
    }
}

/// Settings for the order orchestrator
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// How many times a conflicting transition is retried with a reload
    /// before the conflict surfaces to the caller.
    pub max_conflict_retries: u32,
    /// Pad width of the correlative in generated order codes.
    pub correlative_width: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            correlative_width: 4,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> MfResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.database.max_connections)?,
                min_connections: env_parse("DB_MIN_CONNECTIONS", defaults.database.min_connections)?,
                connect_timeout_secs: env_parse(
                    "DB_CONNECT_TIMEOUT",
                    defaults.database.connect_timeout_secs,
                )?,
            },
            orchestrator: OrchestratorConfig {
                max_conflict_retries: env_parse(
                    "ORDER_MAX_CONFLICT_RETRIES",
                    defaults.orchestrator.max_conflict_retries,
                )?,
                correlative_width: env_parse(
                    "ORDER_CORRELATIVE_WIDTH",
                    defaults.orchestrator.correlative_width,
                )?,
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> MfResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| MfError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
