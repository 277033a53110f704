//! Error types for the transactional driver
//!
//! Backend errors are carried unchanged inside [`TxDbError::Backend`] so callers
//! can still downcast to the native driver error (for example `sqlx::Error`).

use thiserror::Error;

/// Boxed error produced by a backend
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for driver operations
pub type TxDbResult<T> = Result<T, TxDbError>;

/// Error types for driver operations
#[derive(Debug, Error)]
pub enum TxDbError {
    /// Error reported by the underlying database backend
    #[error("{0}")]
    Backend(#[source] BoxError),

    /// The ambient transaction has already ended
    #[error("transaction has already been committed or rolled back")]
    TxDone,

    /// The operation was interrupted by cancellation of the ambient transaction
    #[error("operation cancelled")]
    Canceled,

    #[error("connection is closed")]
    ConnClosed,

    #[error("statement is closed")]
    StmtClosed,

    #[error("driver '{0}' is already registered")]
    DuplicateDriver(String),

    #[error("no driver registered under '{0}'")]
    UnknownDriver(String),

    #[error("no backend registered for kind '{0}'")]
    UnknownBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    /// Destination slice does not match the number of columns of the row
    #[error("expected {expected} destination values, got {actual}")]
    ColumnCount { expected: usize, actual: usize },
}

impl TxDbError {
    /// Wrap a backend error without translating it
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TxDbError::Backend(Box::new(err))
    }

    /// Borrow the backend error as its concrete type, if it is one
    pub fn backend_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            TxDbError::Backend(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Check whether this error reports an ended or poisoned transaction
    pub fn is_tx_done(&self) -> bool {
        matches!(self, TxDbError::TxDone | TxDbError::Canceled)
    }
}

impl From<sqlx::Error> for TxDbError {
    fn from(err: sqlx::Error) -> Self {
        TxDbError::backend(err)
    }
}
