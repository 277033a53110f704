//! # elif-txdb
//!
//! Single-transaction database driver for the elif.rs framework.
//!
//! Every logical connection identifier gets one ambient transaction that is
//! never committed. Tests can write to a shared database freely and every
//! change disappears when the identifier's last connection closes.
//!
//! ## Features
//!
//! - **Identifier isolation**: distinct identifiers run in distinct transactions
//! - **Reference counting**: reopening an identifier shares its transaction
//! - **Nested transactions**: `begin` inside the ambient transaction becomes a savepoint
//! - **Buffered rows**: query results never pin the shared transaction
//! - **Multi-backend support**: PostgreSQL and SQLite through sqlx, or any [`Backend`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use elif_txdb::{positional, DatabaseValue, DriverRegistry};
//!
//! # async fn demo() -> elif_txdb::TxDbResult<()> {
//! let registry = DriverRegistry::new();
//! registry.register("txdb", "postgres", "postgres://localhost/app_test", vec![])?;
//!
//! let conn = registry.open("txdb", "users-test").await?;
//! conn.exec("INSERT INTO users (name) VALUES ($1)", &positional(["mark"])).await?;
//!
//! let tx = conn.begin().await?;
//! conn.exec("DELETE FROM users", &[]).await?;
//! tx.rollback().await?;
//!
//! let mut rows = conn.query("SELECT COUNT(*) FROM users", &[]).await?;
//! let mut count = vec![DatabaseValue::Null];
//! rows.next(&mut count)?;
//!
//! // the insert is rolled back here
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Every operation has a `*_with` variant taking a
//! [`CancellationToken`](tokio_util::sync::CancellationToken). Cancelling the
//! token while the operation is still running cancels the whole ambient
//! transaction of that identifier, for every connection sharing it.

pub mod backends;
mod cancel;
pub mod config;
pub mod conn;
pub mod driver;
pub mod error;
pub mod options;
pub mod registry;
pub mod rows;
pub mod savepoint;
pub mod statement;
pub mod value;

pub use backends::{
    Backend, BackendCursor, BackendHandle, BackendKind, BackendPoolConfig, BackendRegistry,
    BackendTransaction, ColumnType, ExecResult, NamedValueChecker, PostgresBackend, SqliteBackend,
    StatementId,
};
pub use config::{TxDbConfig, TxDbConfigBuilder};
pub use conn::{Connection, Tx};
pub use driver::TxDriver;
pub use error::{BoxError, TxDbError, TxDbResult};
pub use options::{
    savepoint_option, transaction_option, ConnOption, ConnSettings, IsolationLevel, TransactionOptions,
};
pub use registry::{open, register, DriverRegistry};
pub use rows::{RowBuffer, Rows};
pub use savepoint::{DefaultSavePoint, SavePoint};
pub use statement::Statement;
pub use value::{positional, DatabaseValue, NamedValue, OutParam, ValueCheck};

pub use tokio_util::sync::CancellationToken;
