//! SQLite Backend Implementation
//!
//! SQLite runs a single writer at a time, so several identifiers writing
//! concurrently will contend on the database lock. Isolation is always
//! serializable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow, SqliteStatement};
use sqlx::{Executor, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::core::*;
use super::cursor::SqlxCursor;
use crate::error::{TxDbError, TxDbResult};
use crate::options::{IsolationLevel, TransactionOptions};
use crate::value::{DatabaseValue, NamedValue};

/// SQLite database backend implementation
#[derive(Debug, Clone, Default)]
pub struct SqliteBackend {
    pool: BackendPoolConfig,
}

impl SqliteBackend {
    pub fn new(pool: BackendPoolConfig) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> &str {
        "sqlite"
    }

    async fn open(&self, dsn: &str) -> TxDbResult<Arc<dyn BackendHandle>> {
        let pool = super::pool_options::<Sqlite>(&self.pool)
            .connect(dsn)
            .await?;
        debug!("SQLite pool opened for {}", dsn);
        Ok(Arc::new(SqliteHandle { pool }))
    }

    fn with_pool(&self, pool: &BackendPoolConfig) -> Option<Arc<dyn Backend>> {
        Some(Arc::new(SqliteBackend::new(pool.clone())))
    }
}

pub struct SqliteHandle {
    pool: SqlitePool,
}

#[async_trait]
impl BackendHandle for SqliteHandle {
    async fn begin(&self, options: &TransactionOptions) -> TxDbResult<Box<dyn BackendTransaction>> {
        if options.read_only {
            return Err(TxDbError::Configuration(
                "SQLite does not support read-only transactions".to_string(),
            ));
        }
        if let Some(level) = options.isolation_level {
            if level != IsolationLevel::Serializable {
                warn!("SQLite transactions are always serializable, ignoring {:?}", level);
            }
        }

        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            statements: HashMap::new(),
            next_statement: 0,
        }))
    }

    async fn ping(&self) -> TxDbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> TxDbResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    statements: HashMap<StatementId, SqliteStatement<'static>>,
    next_statement: StatementId,
}

#[async_trait]
impl BackendTransaction for SqliteTransaction {
    async fn exec(&mut self, query: &str, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        let result = if args.is_empty() {
            (&mut *self.tx).execute(sqlx::raw_sql(query)).await?
        } else {
            bind_args(sqlx::query(query), args)?
                .execute(&mut *self.tx)
                .await?
        };

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn query<'a>(
        &'a mut self,
        query: &'a str,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        // one result set per statement of the text
        let stream = if args.is_empty() {
            sqlx::raw_sql(query).fetch_many(&mut *self.tx)
        } else {
            (&mut *self.tx).fetch_many(bind_args(sqlx::query(query), args)?)
        };
        Ok(Box::new(SqlxCursor::<Sqlite>::new(stream, sqlite_value_to_database_value)))
    }

    async fn prepare(&mut self, query: &str) -> TxDbResult<StatementId> {
        let statement = (&mut *self.tx).prepare(query).await?;
        self.next_statement += 1;
        let id = self.next_statement;
        self.statements.insert(id, sqlx::Statement::to_owned(&statement));
        Ok(id)
    }

    async fn exec_prepared(&mut self, id: StatementId, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        let statement = self.statements.get(&id).ok_or(TxDbError::StmtClosed)?;
        let result = bind_args(sqlx::Statement::query(statement), args)?
            .execute(&mut *self.tx)
            .await?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn query_prepared<'a>(
        &'a mut self,
        id: StatementId,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        let SqliteTransaction { tx, statements, .. } = self;
        let statement = statements.get(&id).ok_or(TxDbError::StmtClosed)?;
        let stream = (&mut **tx).fetch_many(bind_args(sqlx::Statement::query(statement), args)?);
        Ok(Box::new(SqlxCursor::<Sqlite>::new(stream, sqlite_value_to_database_value)))
    }

    async fn close_prepared(&mut self, id: StatementId) -> TxDbResult<()> {
        self.statements
            .remove(&id)
            .map(|_| ())
            .ok_or(TxDbError::StmtClosed)
    }

    async fn rollback(self: Box<Self>) -> TxDbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Bind arguments by ordinal. Names are not matched against the SQL text,
/// statements refer to arguments as `?`, `?NNN` or `$NNN`.
fn bind_args<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &[NamedValue],
) -> TxDbResult<Query<'q, Sqlite, SqliteArguments<'q>>> {
    let mut ordered: Vec<&NamedValue> = args.iter().collect();
    ordered.sort_by_key(|arg| arg.ordinal);

    for arg in ordered {
        query = bind_database_value(query, &arg.value)?;
    }
    Ok(query)
}

fn bind_database_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> TxDbResult<Query<'q, Sqlite, SqliteArguments<'q>>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float32(f) => Ok(query.bind(*f)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(*u)),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Date(d) => Ok(query.bind(*d)),
        DatabaseValue::Time(t) => Ok(query.bind(*t)),
        DatabaseValue::Json(j) => Ok(query.bind(sqlx::types::Json(j.clone()))),
        DatabaseValue::Out(_) => Err(TxDbError::UnsupportedParameter(
            "output parameters are not supported by SQLite".to_string(),
        )),
    }
}

/// Convert a SQLite value by its runtime storage class
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> TxDbResult<DatabaseValue> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(DatabaseValue::Null);
        }
        raw.type_info().name().to_uppercase()
    };

    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" => DatabaseValue::Int64(row.try_get_unchecked(index)?),
        "BOOLEAN" => DatabaseValue::Bool(row.try_get_unchecked(index)?),
        "REAL" | "NUMERIC" => DatabaseValue::Float64(row.try_get_unchecked(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get_unchecked(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked(index)?),
    };
    Ok(value)
}
