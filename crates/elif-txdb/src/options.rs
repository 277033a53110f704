//! Connection options
//!
//! Options run against every freshly created logical connection, in
//! registration order, before its ambient transaction begins.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TxDbResult;
use crate::savepoint::{DefaultSavePoint, SavePoint};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Read Uncommitted - lowest isolation level
    ReadUncommitted,
    /// Read Committed - default PostgreSQL isolation level
    ReadCommitted,
    /// Repeatable Read - stronger consistency guarantees
    RepeatableRead,
    /// Serializable - highest isolation level
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "read uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(format!("Unknown isolation level: {}", s)),
        }
    }
}

/// Options applied when the ambient transaction begins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Isolation level, backend default when unset
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

/// Settings of a logical connection that options may change
#[derive(Clone)]
pub struct ConnSettings {
    /// Savepoint strategy; `None` turns nested transactions into no-ops
    pub savepoint: Option<Arc<dyn SavePoint>>,
    pub transaction: TransactionOptions,
}

impl Default for ConnSettings {
    fn default() -> Self {
        Self {
            savepoint: Some(Arc::new(DefaultSavePoint)),
            transaction: TransactionOptions::default(),
        }
    }
}

impl fmt::Debug for ConnSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnSettings")
            .field("savepoint", &self.savepoint.is_some())
            .field("transaction", &self.transaction)
            .finish()
    }
}

/// A configuration step applied to a new logical connection
pub type ConnOption = Arc<dyn Fn(&mut ConnSettings) -> TxDbResult<()> + Send + Sync>;

/// Replace the savepoint strategy.
///
/// Pass `None` for backends without savepoint support: nested begin, commit
/// and rollback then succeed without touching the database.
pub fn savepoint_option(savepoint: Option<Arc<dyn SavePoint>>) -> ConnOption {
    Arc::new(move |settings: &mut ConnSettings| {
        settings.savepoint = savepoint.clone();
        Ok(())
    })
}

/// Set the options of the ambient transaction
pub fn transaction_option(options: TransactionOptions) -> ConnOption {
    Arc::new(move |settings: &mut ConnSettings| {
        settings.transaction = options.clone();
        Ok(())
    })
}
