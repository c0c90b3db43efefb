//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL. Without it rows live in memory.
    pub database_url: Option<String>,
    /// HS256 secret used to verify bearer tokens
    pub auth_secret: String,
    /// Connection pool size
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let auth_secret = env::var("AUTH_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::MissingAuthSecret)?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidMaxConnections)?;

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            db_max_connections,
        })
    }

    /// Configuration for tests: in-memory store, fixed secret.
    pub fn for_tests(auth_secret: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            auth_secret: auth_secret.into(),
            db_max_connections: 1,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("AUTH_SECRET environment variable is required")]
    MissingAuthSecret,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid DB_MAX_CONNECTIONS value")]
    InvalidMaxConnections,
}
