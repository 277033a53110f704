//! Database Backend Abstractions
//!
//! The transactional driver wraps any backend implementing [`Backend`]. Two
//! sqlx based backends are provided for PostgreSQL and SQLite.

pub mod core;
mod cursor;
pub mod postgres;
pub mod sqlite;

// Re-export core traits and types
pub use self::core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use std::time::Duration;

use crate::error::{TxDbError, TxDbResult};

/// Build sqlx pool options from the pool configuration
pub(crate) fn pool_options<DB: sqlx::Database>(config: &BackendPoolConfig) -> sqlx::pool::PoolOptions<DB> {
    let mut options = sqlx::pool::PoolOptions::<DB>::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .test_before_acquire(config.test_before_acquire);

    if let Some(idle_timeout) = config.idle_timeout_seconds {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    if let Some(max_lifetime) = config.max_lifetime_seconds {
        options = options.max_lifetime(Duration::from_secs(max_lifetime));
    }

    options
}

/// Built-in backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    PostgreSQL,
    SQLite,
}

impl BackendKind {
    /// Detect the backend kind from a data source name
    pub fn detect(dsn: &str) -> TxDbResult<Self> {
        let scheme = url::Url::parse(dsn)
            .map(|url| url.scheme().to_string())
            .map_err(|e| TxDbError::Configuration(format!("Invalid data source name '{}': {}", dsn, e)))?;
        scheme
            .parse()
            .map_err(|_| TxDbError::UnknownBackend(scheme))
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::PostgreSQL => write!(f, "postgres"),
            BackendKind::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(BackendKind::PostgreSQL),
            "sqlite" => Ok(BackendKind::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
