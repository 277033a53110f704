//! Prepared statements
//!
//! A statement lives inside the ambient transaction that prepared it. Each one
//! owns a watcher task that releases the backend statement when the statement
//! is closed or dropped, or right after an execution fails. The watcher exits
//! on its own once the transaction ends, since the backend statement ends with
//! it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::{ExecResult, StatementId};
use crate::conn::ConnShared;
use crate::error::{TxDbError, TxDbResult};
use crate::rows::Rows;
use crate::value::NamedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Close,
    Failed,
}

/// A statement prepared against the ambient transaction
pub struct Statement {
    conn: Arc<ConnShared>,
    id: StatementId,
    query: String,
    signal: Option<oneshot::Sender<Signal>>,
    watcher: Option<JoinHandle<TxDbResult<()>>>,
}

impl Statement {
    pub(crate) fn new(conn: Arc<ConnShared>, id: StatementId, query: &str) -> Self {
        let (signal, signal_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_statement(conn.clone(), id, signal_rx));

        Self {
            conn,
            id,
            query: query.to_string(),
            signal: Some(signal),
            watcher: Some(watcher),
        }
    }

    pub fn query_text(&self) -> &str {
        &self.query
    }

    /// Number of placeholders, `None` meaning any count is accepted.
    ///
    /// The backend validates the argument count when the statement runs.
    pub fn num_input(&self) -> Option<usize> {
        None
    }

    fn ensure_open(&self) -> TxDbResult<()> {
        if self.watcher.is_none() {
            return Err(TxDbError::StmtClosed);
        }
        Ok(())
    }

    /// Wake the watcher to release the backend statement early
    fn fail(&mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(Signal::Failed);
        }
    }

    pub async fn exec(&mut self, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        self.exec_with(&CancellationToken::new(), args).await
    }

    pub async fn exec_with(&mut self, ctx: &CancellationToken, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        self.ensure_open()?;
        let result = self.conn.exec_prepared(ctx, self.id, args).await;
        if result.is_err() {
            self.fail();
        }
        result
    }

    pub async fn query(&mut self, args: &[NamedValue]) -> TxDbResult<Rows> {
        self.query_with(&CancellationToken::new(), args).await
    }

    pub async fn query_with(&mut self, ctx: &CancellationToken, args: &[NamedValue]) -> TxDbResult<Rows> {
        self.ensure_open()?;
        let result = self.conn.query_prepared(ctx, self.id, args).await;
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Release the backend statement and wait for the watcher to finish
    pub async fn close(&mut self) -> TxDbResult<()> {
        let watcher = self.watcher.take().ok_or(TxDbError::StmtClosed)?;
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(Signal::Close);
        }
        watcher.await.map_err(TxDbError::backend)?
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("closed", &self.watcher.is_none())
            .finish()
    }
}

async fn watch_statement(
    conn: Arc<ConnShared>,
    id: StatementId,
    signal: oneshot::Receiver<Signal>,
) -> TxDbResult<()> {
    tokio::select! {
        biased;
        _ = conn.root().cancelled() => return Ok(()),
        received = signal => {
            if let Ok(Signal::Failed) = received {
                debug!("Statement {} on '{}' failed, releasing it", id, conn.key());
            }
        }
    }

    let closed = conn.close_statement(id).await;
    if let Err(e) = &closed {
        warn!("Failed to close statement {} on '{}': {}", id, conn.key(), e);
    }
    closed
}
