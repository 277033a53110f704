//! Logical connections
//!
//! A logical connection owns the ambient transaction of one identifier. Every
//! [`Connection`] opened under that identifier is a lease on the same shared
//! state, and every operation runs under the shared state's lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::{BackendHandle, BackendTransaction, ExecResult, NamedValueChecker, StatementId};
use crate::cancel::watch;
use crate::driver::DriverInner;
use crate::error::{TxDbError, TxDbResult};
use crate::options::TransactionOptions;
use crate::rows::{drain, Rows};
use crate::savepoint::{SavePoint, SavepointCounter};
use crate::statement::Statement;
use crate::value::{NamedValue, ValueCheck};

/// State shared by every lease of one identifier
pub(crate) struct ConnShared {
    key: String,
    state: Mutex<ConnState>,
    savepoint: Option<Arc<dyn SavePoint>>,
    counter: SavepointCounter,
    root: CancellationToken,
    handle: Arc<dyn BackendHandle>,
    checker: Option<Arc<dyn NamedValueChecker>>,
}

pub(crate) struct ConnState {
    tx: Option<Box<dyn BackendTransaction>>,
}

impl ConnState {
    pub(crate) fn tx(&mut self) -> TxDbResult<&mut (dyn BackendTransaction + 'static)> {
        self.tx.as_deref_mut().ok_or(TxDbError::TxDone)
    }
}

impl ConnShared {
    pub(crate) fn new(
        key: String,
        tx: Box<dyn BackendTransaction>,
        savepoint: Option<Arc<dyn SavePoint>>,
        handle: Arc<dyn BackendHandle>,
        checker: Option<Arc<dyn NamedValueChecker>>,
    ) -> Self {
        Self {
            key,
            state: Mutex::new(ConnState { tx: Some(tx) }),
            savepoint,
            counter: SavepointCounter::new(),
            root: CancellationToken::new(),
            handle,
            checker,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn root(&self) -> &CancellationToken {
        &self.root
    }

    pub(crate) fn cancel(&self) {
        self.root.cancel();
    }

    pub(crate) async fn take_transaction(&self) -> Option<Box<dyn BackendTransaction>> {
        self.state.lock().await.tx.take()
    }

    /// Lock the transaction, failing once it has ended or been cancelled
    pub(crate) async fn lock(&self) -> TxDbResult<MutexGuard<'_, ConnState>> {
        let state = self.state.lock().await;
        if self.root.is_cancelled() || state.tx.is_none() {
            return Err(TxDbError::TxDone);
        }
        Ok(state)
    }

    pub(crate) fn check_named_value(&self, value: &mut NamedValue) -> TxDbResult<ValueCheck> {
        if let Some(checker) = &self.checker {
            return checker.check_named_value(value);
        }
        if value.value.is_out() {
            Ok(ValueCheck::Accepted)
        } else {
            Ok(ValueCheck::Skip)
        }
    }

    /// Run every argument through the value check, converting skipped ones
    pub(crate) fn convert_args(&self, args: &[NamedValue]) -> TxDbResult<Vec<NamedValue>> {
        args.iter()
            .cloned()
            .map(|mut arg| -> TxDbResult<NamedValue> {
                if self.check_named_value(&mut arg)? == ValueCheck::Skip {
                    arg.value = arg.value.default_converted();
                }
                Ok(arg)
            })
            .collect()
    }

    pub(crate) async fn exec(
        &self,
        ctx: &CancellationToken,
        query: &str,
        args: &[NamedValue],
    ) -> TxDbResult<ExecResult> {
        let args = self.convert_args(args)?;
        watch(ctx, &self.root, async {
            let mut state = self.lock().await?;
            state.tx()?.exec(query, &args).await
        })
        .await
    }

    pub(crate) async fn query(&self, ctx: &CancellationToken, query: &str, args: &[NamedValue]) -> TxDbResult<Rows> {
        let args = self.convert_args(args)?;
        watch(ctx, &self.root, async {
            let mut state = self.lock().await?;
            let cursor = state.tx()?.query(query, &args).await?;
            drain(cursor).await
        })
        .await
    }

    pub(crate) async fn exec_prepared(
        &self,
        ctx: &CancellationToken,
        id: StatementId,
        args: &[NamedValue],
    ) -> TxDbResult<ExecResult> {
        let args = self.convert_args(args)?;
        watch(ctx, &self.root, async {
            let mut state = self.lock().await?;
            state.tx()?.exec_prepared(id, &args).await
        })
        .await
    }

    pub(crate) async fn query_prepared(
        &self,
        ctx: &CancellationToken,
        id: StatementId,
        args: &[NamedValue],
    ) -> TxDbResult<Rows> {
        let args = self.convert_args(args)?;
        watch(ctx, &self.root, async {
            let mut state = self.lock().await?;
            let cursor = state.tx()?.query_prepared(id, &args).await?;
            drain(cursor).await
        })
        .await
    }

    /// Release a prepared statement; a transaction that already ended took it along
    pub(crate) async fn close_statement(&self, id: StatementId) -> TxDbResult<()> {
        let mut state = self.state.lock().await;
        match state.tx.as_deref_mut() {
            Some(tx) => tx.close_prepared(id).await,
            None => Ok(()),
        }
    }

    async fn savepoint_exec(&self, ctx: &CancellationToken, sql: String) -> TxDbResult<()> {
        self.exec(ctx, &sql, &[]).await.map(|_| ())
    }
}

/// A lease on the logical connection of one identifier.
///
/// Leases of the same identifier share one ambient transaction. The
/// transaction is rolled back when the last lease is closed.
pub struct Connection {
    shared: Arc<ConnShared>,
    driver: Arc<DriverInner>,
    released: AtomicBool,
}

impl Connection {
    pub(crate) fn new(shared: Arc<ConnShared>, driver: Arc<DriverInner>) -> Self {
        Self {
            shared,
            driver,
            released: AtomicBool::new(false),
        }
    }

    /// Identifier this lease was opened under
    pub fn key(&self) -> &str {
        self.shared.key()
    }

    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn live(&self) -> TxDbResult<&Arc<ConnShared>> {
        if self.is_closed() {
            return Err(TxDbError::ConnClosed);
        }
        Ok(&self.shared)
    }

    pub async fn exec(&self, query: &str, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        self.exec_with(&CancellationToken::new(), query, args).await
    }

    /// Execute a statement inside the ambient transaction.
    ///
    /// If `ctx` is cancelled before the statement finishes, the whole ambient
    /// transaction is cancelled with it: every lease of this identifier gets
    /// [`TxDbError::TxDone`] from then on, until the last lease is closed.
    pub async fn exec_with(
        &self,
        ctx: &CancellationToken,
        query: &str,
        args: &[NamedValue],
    ) -> TxDbResult<ExecResult> {
        self.live()?.exec(ctx, query, args).await
    }

    pub async fn query(&self, query: &str, args: &[NamedValue]) -> TxDbResult<Rows> {
        self.query_with(&CancellationToken::new(), query, args).await
    }

    /// Run a query and buffer all of its result sets.
    ///
    /// Cancellation behaves as for [`Connection::exec_with`].
    pub async fn query_with(&self, ctx: &CancellationToken, query: &str, args: &[NamedValue]) -> TxDbResult<Rows> {
        self.live()?.query(ctx, query, args).await
    }

    pub async fn prepare(&self, query: &str) -> TxDbResult<Statement> {
        self.prepare_with(&CancellationToken::new(), query).await
    }

    /// Prepare a statement bound to the ambient transaction
    pub async fn prepare_with(&self, ctx: &CancellationToken, query: &str) -> TxDbResult<Statement> {
        let shared = self.live()?;
        let id = watch(ctx, shared.root(), async {
            let mut state = shared.lock().await?;
            state.tx()?.prepare(query).await
        })
        .await?;
        Ok(Statement::new(shared.clone(), id, query))
    }

    pub async fn begin(&self) -> TxDbResult<Tx> {
        self.begin_with(&CancellationToken::new(), TransactionOptions::default())
            .await
    }

    /// Begin a nested transaction, emulated with a savepoint.
    ///
    /// `options` cannot change a savepoint and are ignored. Without a savepoint
    /// strategy the returned [`Tx`] does nothing on commit or rollback.
    pub async fn begin_with(&self, ctx: &CancellationToken, options: TransactionOptions) -> TxDbResult<Tx> {
        let shared = self.live()?;
        if options != TransactionOptions::default() {
            debug!("Ignoring transaction options for nested transaction on '{}'", shared.key());
        }

        let Some(strategy) = &shared.savepoint else {
            return Ok(Tx {
                savepoint: None,
                conn: shared.clone(),
            });
        };

        let id = shared.counter.next_id();
        shared.savepoint_exec(ctx, strategy.create(&id)).await?;
        debug!("Created savepoint {} on '{}'", id, shared.key());
        Ok(Tx {
            savepoint: Some(id),
            conn: shared.clone(),
        })
    }

    pub async fn ping(&self) -> TxDbResult<()> {
        self.ping_with(&CancellationToken::new()).await
    }

    /// Check that the real handle is alive
    pub async fn ping_with(&self, ctx: &CancellationToken) -> TxDbResult<()> {
        let shared = self.live()?;
        watch(ctx, shared.root(), shared.handle.ping()).await
    }

    /// Check a parameter before it is sent to the backend.
    ///
    /// Uses the backend's own checker when it offers one. Otherwise output
    /// markers are accepted as is and everything else is left to the default
    /// conversion.
    pub fn check_named_value(&self, value: &mut NamedValue) -> TxDbResult<ValueCheck> {
        self.shared.check_named_value(value)
    }

    /// Close this lease. Closing the last lease rolls back the ambient
    /// transaction; a rollback error is returned but the connection is gone
    /// either way.
    pub async fn close(&self) -> TxDbResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(TxDbError::ConnClosed);
        }
        self.driver.release(&self.shared).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.shared.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!("Connection '{}' dropped without close", self.shared.key);
        let shared = self.shared.clone();
        let driver = self.driver.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = driver.release(&shared).await {
                        warn!("Failed to close connection '{}': {}", shared.key, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to close connection '{}', transaction left open", shared.key),
        }
    }
}

/// A nested transaction, emulated with a savepoint
pub struct Tx {
    savepoint: Option<String>,
    conn: Arc<ConnShared>,
}

impl Tx {
    /// Savepoint name, `None` when nesting is disabled
    pub fn savepoint_id(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    /// Release the savepoint; its changes stay in the ambient transaction
    pub async fn commit(self) -> TxDbResult<()> {
        let (Some(id), Some(strategy)) = (&self.savepoint, &self.conn.savepoint) else {
            return Ok(());
        };
        self.conn
            .savepoint_exec(&CancellationToken::new(), strategy.release(id))
            .await?;
        debug!("Released savepoint {} on '{}'", id, self.conn.key);
        Ok(())
    }

    /// Roll back to the savepoint
    pub async fn rollback(self) -> TxDbResult<()> {
        let (Some(id), Some(strategy)) = (&self.savepoint, &self.conn.savepoint) else {
            return Ok(());
        };
        self.conn
            .savepoint_exec(&CancellationToken::new(), strategy.rollback(id))
            .await?;
        debug!("Rolled back to savepoint {} on '{}'", id, self.conn.key);
        Ok(())
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("savepoint", &self.savepoint)
            .field("key", &self.conn.key)
            .finish()
    }
}
