//! Driver configuration types and builders

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use service_builder::builder;

use crate::backends::BackendPoolConfig;
use crate::error::{TxDbError, TxDbResult};
use crate::options::{savepoint_option, transaction_option, ConnOption, IsolationLevel, TransactionOptions};
use crate::savepoint::DefaultSavePoint;

/// Configuration of a transactional driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder]
pub struct TxDbConfig {
    /// Emulate nested transactions with savepoints
    #[builder(default = "true", getter)]
    savepoints: bool,

    /// Isolation level of the ambient transaction
    #[builder(default = "None", getter)]
    isolation_level: Option<IsolationLevel>,

    /// Begin the ambient transaction read-only
    #[builder(default = "false", getter)]
    read_only: bool,

    /// Pool settings of the built-in backends
    #[builder(default = "BackendPoolConfig::default()", getter)]
    pool: BackendPoolConfig,
}

impl Default for TxDbConfig {
    fn default() -> Self {
        Self {
            savepoints: true,
            isolation_level: None,
            read_only: false,
            pool: BackendPoolConfig::default(),
        }
    }
}

impl TxDbConfig {
    /// Load configuration from `TXDB_*` environment variables
    pub fn from_env() -> TxDbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup, unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> TxDbResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("TXDB_SAVEPOINTS") {
            config.savepoints = parse_bool("TXDB_SAVEPOINTS", &value)?;
        }
        if let Some(value) = lookup("TXDB_ISOLATION_LEVEL") {
            config.isolation_level = Some(value.parse().map_err(TxDbError::Configuration)?);
        }
        if let Some(value) = lookup("TXDB_READ_ONLY") {
            config.read_only = parse_bool("TXDB_READ_ONLY", &value)?;
        }
        if let Some(value) = lookup("TXDB_MAX_CONNECTIONS") {
            config.pool.max_connections = value.trim().parse().map_err(|_| {
                TxDbError::Configuration(format!("TXDB_MAX_CONNECTIONS must be a number, got '{}'", value))
            })?;
        }

        Ok(config)
    }

    /// Connection options implementing this configuration
    pub fn options(&self) -> Vec<ConnOption> {
        let savepoint = if self.savepoints {
            Some(Arc::new(DefaultSavePoint) as Arc<dyn crate::savepoint::SavePoint>)
        } else {
            None
        };

        vec![
            savepoint_option(savepoint),
            transaction_option(TransactionOptions {
                isolation_level: self.isolation_level,
                read_only: self.read_only,
            }),
        ]
    }
}

fn parse_bool(key: &str, value: &str) -> TxDbResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TxDbError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

impl TxDbConfigBuilder {
    /// Configuration for backends without savepoint support
    pub fn without_savepoints() -> Self {
        TxDbConfigBuilder::new().savepoints(false)
    }
}
