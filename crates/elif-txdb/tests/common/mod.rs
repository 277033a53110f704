//! Shared test support: a backend that records every call instead of
//! talking to a database.
//!
//! Query text prefixes steer its behavior:
//! - `SLEEP` never completes
//! - `FAIL` fails on exec, query and prepare
//! - `BROKEN` prepares fine but fails whenever the statement runs
//! - `INSERT` is counted per transaction, `COUNT` returns that count

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use elif_txdb::{
    Backend, BackendCursor, BackendHandle, BackendTransaction, ColumnType, DatabaseValue, ExecResult,
    NamedValue, NamedValueChecker, StatementId, TransactionOptions, TxDbError, TxDbResult, TxDriver,
    ValueCheck,
};

#[derive(Default)]
pub struct Recorder {
    pub handles_opened: AtomicUsize,
    pub handles_closed: AtomicUsize,
    pub begun: AtomicUsize,
    pub rolled_back: AtomicUsize,
    pub pings: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
    pub closed_statements: Mutex<Vec<StatementId>>,
    pub begin_options: Mutex<Vec<TransactionOptions>>,
    pub fail_open: AtomicBool,
    pub fail_begin: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub slow_begin: AtomicBool,
    pub slow_rollback: AtomicBool,
    live: AtomicUsize,
    max_live: AtomicUsize,
    next_statement: AtomicUsize,
}

impl Recorder {
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn closed_statements(&self) -> Vec<StatementId> {
        self.closed_statements.lock().clone()
    }

    pub fn opened(&self) -> usize {
        self.handles_opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.handles_closed.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    /// Most transactions that were open at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> TxDbError {
    TxDbError::backend(std::io::Error::new(std::io::ErrorKind::Other, what.to_string()))
}

pub struct RecordingBackend {
    pub recorder: Arc<Recorder>,
    with_checker: bool,
    capacity: Option<Arc<Semaphore>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            with_checker: false,
            capacity: None,
        }
    }

    /// A backend whose handle runs at most `connections` transactions at once,
    /// like a bounded pool
    pub fn with_capacity(connections: usize) -> Self {
        Self {
            capacity: Some(Arc::new(Semaphore::new(connections))),
            ..Self::new()
        }
    }

    /// A backend whose handle offers its own parameter checker
    pub fn with_checker() -> Self {
        Self {
            with_checker: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn open(&self, _dsn: &str) -> TxDbResult<Arc<dyn BackendHandle>> {
        if self.recorder.fail_open.load(Ordering::SeqCst) {
            return Err(injected("open refused"));
        }
        self.recorder.handles_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingHandle {
            recorder: self.recorder.clone(),
            with_checker: self.with_checker,
            capacity: self.capacity.clone(),
        }))
    }
}

struct RecordingHandle {
    recorder: Arc<Recorder>,
    with_checker: bool,
    capacity: Option<Arc<Semaphore>>,
}

#[async_trait]
impl BackendHandle for RecordingHandle {
    async fn begin(&self, options: &TransactionOptions) -> TxDbResult<Box<dyn BackendTransaction>> {
        if self.recorder.fail_begin.load(Ordering::SeqCst) {
            return Err(injected("begin refused"));
        }
        let permit = match &self.capacity {
            Some(capacity) => Some(capacity.clone().acquire_owned().await.map_err(TxDbError::backend)?),
            None => None,
        };
        if self.recorder.slow_begin.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.recorder.begun.fetch_add(1, Ordering::SeqCst);
        self.recorder.begin_options.lock().push(options.clone());
        let live = self.recorder.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(RecordingTransaction {
            recorder: self.recorder.clone(),
            prepared: HashMap::new(),
            inserted: 0,
            _permit: permit,
        }))
    }

    async fn ping(&self) -> TxDbResult<()> {
        self.recorder.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> TxDbResult<()> {
        self.recorder.handles_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn value_checker(&self) -> Option<Arc<dyn NamedValueChecker>> {
        if self.with_checker {
            Some(Arc::new(RejectBytes))
        } else {
            None
        }
    }
}

/// Accepts every value unchanged except raw bytes
struct RejectBytes;

impl NamedValueChecker for RejectBytes {
    fn check_named_value(&self, value: &mut NamedValue) -> TxDbResult<ValueCheck> {
        match value.value {
            DatabaseValue::Bytes(_) => Err(TxDbError::UnsupportedParameter("bytes".to_string())),
            _ => Ok(ValueCheck::Accepted),
        }
    }
}

struct RecordingTransaction {
    recorder: Arc<Recorder>,
    prepared: HashMap<StatementId, String>,
    inserted: i64,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RecordingTransaction {
    async fn run(&self, query: &str) -> TxDbResult<()> {
        self.recorder.statements.lock().push(query.to_string());
        if query.starts_with("SLEEP") {
            std::future::pending::<()>().await;
        }
        if query.starts_with("FAIL") || query.starts_with("BROKEN") {
            return Err(injected(query));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendTransaction for RecordingTransaction {
    async fn exec(&mut self, query: &str, _args: &[NamedValue]) -> TxDbResult<ExecResult> {
        self.run(query).await?;
        if query.starts_with("INSERT") {
            tokio::task::yield_now().await;
            self.inserted += 1;
        }
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    async fn query<'a>(
        &'a mut self,
        query: &'a str,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        self.run(query).await?;
        if query.starts_with("COUNT") {
            return Ok(Box::new(EchoCursor::count(self.inserted)));
        }
        Ok(Box::new(EchoCursor::new(query, args)))
    }

    async fn prepare(&mut self, query: &str) -> TxDbResult<StatementId> {
        if query.starts_with("FAIL") {
            return Err(injected(query));
        }
        let id = self.recorder.next_statement.fetch_add(1, Ordering::SeqCst) as StatementId + 1;
        self.prepared.insert(id, query.to_string());
        Ok(id)
    }

    async fn exec_prepared(&mut self, id: StatementId, _args: &[NamedValue]) -> TxDbResult<ExecResult> {
        let query = self.prepared.get(&id).cloned().ok_or(TxDbError::StmtClosed)?;
        self.run(&query).await?;
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    async fn query_prepared<'a>(
        &'a mut self,
        id: StatementId,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        let query = self.prepared.get(&id).cloned().ok_or(TxDbError::StmtClosed)?;
        self.run(&query).await?;
        Ok(Box::new(EchoCursor::new(&query, args)))
    }

    async fn close_prepared(&mut self, id: StatementId) -> TxDbResult<()> {
        self.prepared.remove(&id).ok_or(TxDbError::StmtClosed)?;
        self.recorder.closed_statements.lock().push(id);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> TxDbResult<()> {
        if self.recorder.slow_rollback.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.recorder.live.fetch_sub(1, Ordering::SeqCst);
        if self.recorder.fail_rollback.load(Ordering::SeqCst) {
            return Err(injected("rollback refused"));
        }
        self.recorder.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One result set with a single row: the query text followed by the arguments
struct EchoCursor {
    columns: Vec<ColumnType>,
    rows: VecDeque<Vec<DatabaseValue>>,
}

impl EchoCursor {
    fn new(query: &str, args: &[NamedValue]) -> Self {
        let mut columns = vec![ColumnType {
            name: "query".to_string(),
            type_name: "TEXT".to_string(),
        }];
        let mut row = vec![DatabaseValue::String(query.to_string())];
        for arg in args {
            columns.push(ColumnType {
                name: format!("arg{}", arg.ordinal),
                type_name: "ANY".to_string(),
            });
            row.push(arg.value.clone());
        }
        Self {
            columns,
            rows: VecDeque::from(vec![row]),
        }
    }

    fn count(inserted: i64) -> Self {
        Self {
            columns: vec![ColumnType {
                name: "count".to_string(),
                type_name: "INT8".to_string(),
            }],
            rows: VecDeque::from(vec![vec![DatabaseValue::Int64(inserted)]]),
        }
    }
}

#[async_trait]
impl BackendCursor for EchoCursor {
    fn column_types(&self) -> Vec<ColumnType> {
        self.columns.clone()
    }

    async fn next_row(&mut self) -> TxDbResult<Option<Vec<DatabaseValue>>> {
        Ok(self.rows.pop_front())
    }

    async fn next_result_set(&mut self) -> TxDbResult<bool> {
        Ok(false)
    }

    async fn close(self: Box<Self>) -> TxDbResult<()> {
        Ok(())
    }
}

/// A driver over a fresh recording backend
pub fn recording_driver(options: Vec<elif_txdb::ConnOption>) -> (TxDriver, Arc<Recorder>) {
    let backend = RecordingBackend::new();
    let recorder = backend.recorder.clone();
    (TxDriver::new(Arc::new(backend), "recording://test", options), recorder)
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
