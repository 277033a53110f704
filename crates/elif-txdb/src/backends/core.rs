//! Core Database Backend Traits
//!
//! This module defines the traits the transactional driver consumes from a real
//! database driver. A backend opens a handle (usually a pool), the handle begins
//! real transactions, and a transaction executes statements and hands out live
//! cursors that the driver drains into memory right away.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{TxDbError, TxDbResult};
use crate::options::TransactionOptions;
use crate::value::{DatabaseValue, NamedValue, ValueCheck};

use super::BackendKind;

/// Identifier of a prepared statement within one backend transaction
pub type StatementId = u64;

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Column metadata captured from a live cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    /// Backend specific type name, e.g. `INT8` or `TEXT`
    pub type_name: String,
}

/// Live result cursor borrowed from a backend transaction
#[async_trait]
pub trait BackendCursor: Send {
    /// Column metadata of the current result set
    fn column_types(&self) -> Vec<ColumnType>;

    /// Column names of the current result set
    fn columns(&self) -> Vec<String> {
        self.column_types().into_iter().map(|c| c.name).collect()
    }

    /// Fetch the next row of the current result set
    async fn next_row(&mut self) -> TxDbResult<Option<Vec<DatabaseValue>>>;

    /// Advance to the next result set, skipping unread rows of the current one
    async fn next_result_set(&mut self) -> TxDbResult<bool>;

    /// Release the cursor
    async fn close(self: Box<Self>) -> TxDbResult<()>;
}

/// A real transaction owned by the backend
#[async_trait]
pub trait BackendTransaction: Send {
    /// Execute a statement and return the affected rows
    async fn exec(&mut self, query: &str, args: &[NamedValue]) -> TxDbResult<ExecResult>;

    /// Execute a query and return a cursor over its result sets
    async fn query<'a>(
        &'a mut self,
        query: &'a str,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>>;

    /// Prepare a statement bound to this transaction
    async fn prepare(&mut self, query: &str) -> TxDbResult<StatementId>;

    async fn exec_prepared(&mut self, id: StatementId, args: &[NamedValue]) -> TxDbResult<ExecResult>;

    async fn query_prepared<'a>(
        &'a mut self,
        id: StatementId,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>>;

    /// Release a prepared statement
    async fn close_prepared(&mut self, id: StatementId) -> TxDbResult<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> TxDbResult<()>;
}

/// Optional backend capability: custom parameter checking
pub trait NamedValueChecker: Send + Sync {
    fn check_named_value(&self, value: &mut NamedValue) -> TxDbResult<ValueCheck>;
}

/// The real database handle, shared by every logical connection of a driver
#[async_trait]
pub trait BackendHandle: Send + Sync {
    /// Begin a real transaction
    async fn begin(&self, options: &TransactionOptions) -> TxDbResult<Box<dyn BackendTransaction>>;

    /// Liveness check
    async fn ping(&self) -> TxDbResult<()>;

    /// Close the handle and every pooled connection
    async fn close(&self) -> TxDbResult<()>;

    /// Parameter checker offered by the backend, queried once per handle
    fn value_checker(&self) -> Option<Arc<dyn NamedValueChecker>> {
        None
    }
}

/// Database backend: opens real handles from a data source name
#[async_trait]
pub trait Backend: Send + Sync {
    /// Kind name used for registration, e.g. `postgres`
    fn kind(&self) -> &str;

    /// Open a real handle for the given data source name
    async fn open(&self, dsn: &str) -> TxDbResult<Arc<dyn BackendHandle>>;

    /// This backend with other pool settings, `None` for backends without a pool
    fn with_pool(&self, _pool: &BackendPoolConfig) -> Option<Arc<dyn Backend>> {
        None
    }
}

/// Pool configuration for the sqlx backed handles.
///
/// Every live identifier keeps one pooled connection for its ambient
/// transaction, so `max_connections` bounds the number of identifiers open at
/// once. Further opens wait up to `acquire_timeout_seconds` for a connection
/// to be released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendPoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for BackendPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// Registry of backend implementations keyed by kind name
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the sqlx backends
    pub fn with_builtin(pool: BackendPoolConfig) -> Self {
        let mut registry = Self::new();
        let postgres: Arc<dyn Backend> = Arc::new(super::PostgresBackend::new(pool.clone()));
        registry.register("postgres", postgres.clone());
        registry.register("postgresql", postgres);
        registry.register("sqlite", Arc::new(super::SqliteBackend::new(pool)));
        registry
    }

    /// Register a backend under a kind name
    pub fn register(&mut self, kind: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends.insert(kind.into().to_lowercase(), backend);
    }

    /// Get a backend by kind name
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(&kind.to_lowercase()).cloned()
    }

    /// Resolve the backend for a kind, detecting it from the DSN when the kind is empty
    pub fn resolve(&self, kind: &str, dsn: &str) -> TxDbResult<Arc<dyn Backend>> {
        let kind = if kind.is_empty() {
            BackendKind::detect(dsn)?.to_string()
        } else {
            kind.to_string()
        };
        self.get(&kind).ok_or(TxDbError::UnknownBackend(kind))
    }

    /// List all registered kind names
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.backends.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_kinds() {
        let registry = BackendRegistry::with_builtin(BackendPoolConfig::default());
        assert_eq!(
            registry.registered_kinds(),
            vec!["postgres", "postgresql", "sqlite"]
        );
        assert_eq!(registry.get("SQLite").map(|b| b.kind().to_string()), Some("sqlite".to_string()));
    }

    #[test]
    fn test_resolve_detects_kind_from_dsn() {
        let registry = BackendRegistry::with_builtin(BackendPoolConfig::default());
        let backend = registry.resolve("", "postgres://localhost/txdb_test").unwrap();
        assert_eq!(backend.kind(), "postgres");
        assert!(matches!(
            registry.resolve("mysql", "mysql://root@localhost/txdb_test"),
            Err(TxDbError::UnknownBackend(kind)) if kind == "mysql"
        ));
    }

    #[test]
    fn test_pool_config_default() {
        let config = BackendPoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.idle_timeout_seconds, Some(600));
        assert!(config.test_before_acquire);
    }
}
