//! Transactional driver
//!
//! A [`TxDriver`] wraps one backend and data source name. It opens the real
//! handle lazily on the first [`TxDriver::open`], hands out one logical
//! connection per identifier, and closes the real handle again as soon as the
//! last logical connection is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::{Backend, BackendHandle, NamedValueChecker};
use crate::conn::{ConnShared, Connection};
use crate::error::{TxDbError, TxDbResult};
use crate::options::{ConnOption, ConnSettings};

/// Driver handing out identifier-keyed logical connections
#[derive(Clone)]
pub struct TxDriver {
    inner: Arc<DriverInner>,
}

pub(crate) struct DriverInner {
    backend: Arc<dyn Backend>,
    dsn: String,
    options: Vec<ConnOption>,
    state: Mutex<DriverState>,
}

/// Map of logical connections.
///
/// The lock is only held to look up, insert or remove entries. Opening the
/// real handle, beginning and rolling back run outside of it, through the
/// per-entry cells.
#[derive(Default)]
struct DriverState {
    handle: Option<Arc<OnceCell<OpenHandle>>>,
    conns: HashMap<String, ConnEntry>,
    /// Identifiers whose last transaction is still rolling back, cancelled once it is done
    closing: HashMap<String, CancellationToken>,
}

#[derive(Clone)]
struct OpenHandle {
    handle: Arc<dyn BackendHandle>,
    checker: Option<Arc<dyn NamedValueChecker>>,
}

/// An identifier's logical connection, still being created while the cell is empty
struct ConnEntry {
    conn: Arc<OnceCell<Arc<ConnShared>>>,
    refs: usize,
}

/// Work left to do once the last lease of an identifier is gone
#[derive(Default)]
struct Teardown {
    conn: Option<(Arc<ConnShared>, CancellationToken)>,
    handle: Option<Arc<OnceCell<OpenHandle>>>,
}

impl TxDriver {
    /// Create a driver for a backend and data source name
    pub fn new(backend: Arc<dyn Backend>, dsn: impl Into<String>, options: Vec<ConnOption>) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                backend,
                dsn: dsn.into(),
                options,
                state: Mutex::new(DriverState::default()),
            }),
        }
    }

    /// Open a lease on the logical connection for `identifier`.
    ///
    /// The first open of an identifier begins its ambient transaction; later
    /// opens share it until every lease has been closed. Reopening an
    /// identifier whose last lease was just closed waits until the previous
    /// transaction has rolled back.
    pub async fn open(&self, identifier: &str) -> TxDbResult<Connection> {
        let inner = self.inner.clone();
        let key = identifier.to_string();
        // detached, so an abandoned open still settles its lease
        tokio::spawn(async move { inner.open(&key).await })
            .await
            .map_err(TxDbError::backend)?
    }

    pub fn dsn(&self) -> &str {
        &self.inner.dsn
    }

    pub fn backend_kind(&self) -> &str {
        self.inner.backend.kind()
    }

    /// Whether the real handle is currently open
    pub async fn is_open(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .handle
            .as_ref()
            .map_or(false, |cell| cell.initialized())
    }

    /// Number of live logical connections
    pub async fn open_connections(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .conns
            .values()
            .filter(|entry| entry.conn.initialized())
            .count()
    }

    /// Number of leases on the logical connection for `identifier`, opens in progress included
    pub async fn connection_count(&self, identifier: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .conns
            .get(identifier)
            .map_or(0, |entry| entry.refs)
    }
}

impl fmt::Debug for TxDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxDriver")
            .field("backend", &self.inner.backend.kind())
            .field("dsn", &self.inner.dsn)
            .field("options", &self.inner.options.len())
            .finish()
    }
}

impl DriverInner {
    async fn open(self: &Arc<Self>, key: &str) -> TxDbResult<Connection> {
        let (slot, handle, closing) = {
            let mut state = self.state.lock().await;
            let handle = state.handle.get_or_insert_with(Default::default).clone();
            let closing = state.closing.get(key).cloned();
            let entry = state.conns.entry(key.to_string()).or_insert_with(|| ConnEntry {
                conn: Default::default(),
                refs: 0,
            });
            entry.refs += 1;
            if entry.refs > 1 {
                debug!("Reusing connection '{}' ({} leases)", key, entry.refs);
            }
            (entry.conn.clone(), handle, closing)
        };

        let created = slot
            .get_or_try_init(|| self.create(key, &handle, closing))
            .await
            .map(Arc::clone);

        match created {
            Ok(conn) => Ok(Connection::new(conn, self.clone())),
            Err(e) => {
                let teardown = {
                    let mut state = self.state.lock().await;
                    let ours = state
                        .conns
                        .get(key)
                        .map_or(false, |entry| Arc::ptr_eq(&entry.conn, &slot));
                    if ours {
                        Self::drop_lease(&mut state, key)
                    } else {
                        Teardown::default()
                    }
                };
                if let Err(cleanup) = self.teardown(teardown).await {
                    warn!("Cleanup after failed open of '{}' failed: {}", key, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn create(
        &self,
        key: &str,
        handle: &OnceCell<OpenHandle>,
        closing: Option<CancellationToken>,
    ) -> TxDbResult<Arc<ConnShared>> {
        let mut settings = ConnSettings::default();
        for option in &self.options {
            option(&mut settings)?;
        }

        let OpenHandle { handle, checker } = handle.get_or_try_init(|| self.open_handle()).await?.clone();

        if let Some(closing) = closing {
            debug!("Waiting for the previous transaction of '{}' to roll back", key);
            closing.cancelled().await;
        }

        let tx = handle.begin(&settings.transaction).await?;
        debug!("Began transaction for '{}'", key);
        Ok(Arc::new(ConnShared::new(
            key.to_string(),
            tx,
            settings.savepoint,
            handle,
            checker,
        )))
    }

    async fn open_handle(&self) -> TxDbResult<OpenHandle> {
        let handle = self.backend.open(&self.dsn).await?;
        debug!("Opened {} handle", self.backend.kind());
        Ok(OpenHandle {
            checker: handle.value_checker(),
            handle,
        })
    }

    /// Drop one lease of `conn`; the last one rolls back and removes it
    pub(crate) async fn release(&self, conn: &Arc<ConnShared>) -> TxDbResult<()> {
        let teardown = {
            let mut state = self.state.lock().await;
            let owned = state
                .conns
                .get(conn.key())
                .and_then(|entry| entry.conn.get())
                .map_or(false, |live| Arc::ptr_eq(live, conn));
            if !owned {
                return Err(TxDbError::ConnClosed);
            }
            Self::drop_lease(&mut state, conn.key())
        };

        self.teardown(teardown).await
    }

    /// Decrement the lease count of `key`, detaching the entry at zero.
    ///
    /// A detached live connection is marked as closing so that a reopen of the
    /// same identifier waits for its rollback. The handle is detached too once
    /// no entry is left.
    fn drop_lease(state: &mut DriverState, key: &str) -> Teardown {
        let mut teardown = Teardown::default();
        let Some(entry) = state.conns.get_mut(key) else {
            return teardown;
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            debug!("Released lease on '{}' ({} left)", key, entry.refs);
            return teardown;
        }

        if let Some(conn) = state.conns.remove(key).and_then(|entry| entry.conn.get().cloned()) {
            let done = CancellationToken::new();
            state.closing.insert(key.to_string(), done.clone());
            teardown.conn = Some((conn, done));
        }
        if state.conns.is_empty() {
            teardown.handle = state.handle.take();
        }
        teardown
    }

    async fn teardown(&self, teardown: Teardown) -> TxDbResult<()> {
        let mut rolled_back = Ok(());
        if let Some((conn, done)) = teardown.conn {
            conn.cancel();
            if let Some(tx) = conn.take_transaction().await {
                rolled_back = tx.rollback().await;
            }
            debug!("Rolled back transaction for '{}'", conn.key());

            self.state.lock().await.closing.remove(conn.key());
            done.cancel();
        }

        let closed = match teardown.handle.as_ref().and_then(|cell| cell.get()) {
            Some(open) => {
                debug!("Closing {} handle", self.backend.kind());
                open.handle.close().await
            }
            None => Ok(()),
        };

        rolled_back?;
        closed
    }
}
