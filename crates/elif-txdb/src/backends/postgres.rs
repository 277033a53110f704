//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the backend traits
//! using sqlx as the underlying database driver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow, PgStatement};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::core::*;
use super::cursor::SqlxCursor;
use crate::error::{TxDbError, TxDbResult};
use crate::options::TransactionOptions;
use crate::value::{DatabaseValue, NamedValue};

/// PostgreSQL database backend implementation
#[derive(Debug, Clone, Default)]
pub struct PostgresBackend {
    pool: BackendPoolConfig,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend with the given pool configuration
    pub fn new(pool: BackendPoolConfig) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> &str {
        "postgres"
    }

    async fn open(&self, dsn: &str) -> TxDbResult<Arc<dyn BackendHandle>> {
        let pool = super::pool_options::<Postgres>(&self.pool)
            .connect(dsn)
            .await?;
        debug!("PostgreSQL pool opened (max connections: {})", self.pool.max_connections);
        Ok(Arc::new(PostgresHandle { pool }))
    }

    fn with_pool(&self, pool: &BackendPoolConfig) -> Option<Arc<dyn Backend>> {
        Some(Arc::new(PostgresBackend::new(pool.clone())))
    }
}

/// PostgreSQL pool acting as the real handle
pub struct PostgresHandle {
    pool: PgPool,
}

#[async_trait]
impl BackendHandle for PostgresHandle {
    async fn begin(&self, options: &TransactionOptions) -> TxDbResult<Box<dyn BackendTransaction>> {
        let mut tx = self.pool.begin().await?;

        if let Some(isolation_level) = options.isolation_level {
            let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation_level.as_sql());
            sqlx::query(&sql).execute(&mut *tx).await?;
            debug!("Transaction isolation level set to: {:?}", isolation_level);
        }

        if options.read_only {
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
            debug!("Transaction set to read-only mode");
        }

        Ok(Box::new(PostgresTransaction {
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

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    statements: HashMap<StatementId, PgStatement<'static>>,
    next_statement: StatementId,
}

#[async_trait]
impl BackendTransaction for PostgresTransaction {
    async fn exec(&mut self, query: &str, args: &[NamedValue]) -> TxDbResult<ExecResult> {
        // without arguments the simple query protocol allows several statements
        let result = if args.is_empty() {
            (&mut *self.tx).execute(sqlx::raw_sql(query)).await?
        } else {
            bind_args(sqlx::query(query), args)?
                .execute(&mut *self.tx)
                .await?
        };

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn query<'a>(
        &'a mut self,
        query: &'a str,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        let stream = if args.is_empty() {
            sqlx::raw_sql(query).fetch_many(&mut *self.tx)
        } else {
            (&mut *self.tx).fetch_many(bind_args(sqlx::query(query), args)?)
        };
        Ok(Box::new(SqlxCursor::<Postgres>::new(stream, postgres_value_to_database_value)))
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
            last_insert_id: None,
        })
    }

    async fn query_prepared<'a>(
        &'a mut self,
        id: StatementId,
        args: &'a [NamedValue],
    ) -> TxDbResult<Box<dyn BackendCursor + 'a>> {
        let PostgresTransaction { tx, statements, .. } = self;
        let statement = statements.get(&id).ok_or(TxDbError::StmtClosed)?;
        let stream = (&mut **tx).fetch_many(bind_args(sqlx::Statement::query(statement), args)?);
        Ok(Box::new(SqlxCursor::<Postgres>::new(stream, postgres_value_to_database_value)))
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

/// Bind arguments in order; PostgreSQL only knows positional parameters
fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[NamedValue],
) -> TxDbResult<Query<'q, Postgres, PgArguments>> {
    for arg in args {
        if arg.is_named() {
            return Err(TxDbError::UnsupportedParameter(format!(
                "named parameter '{}' is not supported by PostgreSQL",
                arg.name.as_deref().unwrap_or_default()
            )));
        }
        query = bind_database_value(query, &arg.value)?;
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> TxDbResult<Query<'q, Postgres, PgArguments>> {
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
        DatabaseValue::Json(j) => Ok(query.bind(j.clone())),
        DatabaseValue::Out(_) => Err(TxDbError::UnsupportedParameter(
            "output parameters are not supported by PostgreSQL".to_string(),
        )),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> TxDbResult<DatabaseValue> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(DatabaseValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float32(row.try_get(index)?),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc()),
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        // Fallback: try to get as string
        _ => DatabaseValue::String(row.try_get(index)?),
    };
    Ok(value)
}
