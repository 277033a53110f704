//! Cursor over a sqlx `fetch_many` stream
//!
//! sqlx reports the end of every statement with an `Either::Left` query result,
//! which is what splits the stream into result sets.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{Column, Database, Either, Row, TypeInfo};

use super::core::{BackendCursor, ColumnType};
use crate::error::TxDbResult;
use crate::value::DatabaseValue;

pub(crate) type RowStream<'a, DB> = BoxStream<
    'a,
    Result<Either<<DB as Database>::QueryResult, <DB as Database>::Row>, sqlx::Error>,
>;

pub(crate) type DecodeFn<DB> = fn(&<DB as Database>::Row, usize) -> TxDbResult<DatabaseValue>;

pub(crate) struct SqlxCursor<'a, DB: Database> {
    stream: RowStream<'a, DB>,
    decode: DecodeFn<DB>,
    pending: Option<DB::Row>,
    columns: Vec<ColumnType>,
    set_done: bool,
    exhausted: bool,
}

impl<'a, DB: Database> SqlxCursor<'a, DB> {
    pub(crate) fn new(stream: RowStream<'a, DB>, decode: DecodeFn<DB>) -> Self {
        Self {
            stream,
            decode,
            pending: None,
            columns: Vec::new(),
            set_done: false,
            exhausted: false,
        }
    }

    fn capture_columns(&mut self, row: &DB::Row) {
        self.columns = row
            .columns()
            .iter()
            .map(|column| ColumnType {
                name: column.name().to_string(),
                type_name: column.type_info().name().to_string(),
            })
            .collect();
    }

    fn decode_row(&self, row: &DB::Row) -> TxDbResult<Vec<DatabaseValue>> {
        (0..row.len()).map(|index| (self.decode)(row, index)).collect()
    }
}

#[async_trait]
impl<'a, DB: Database> BackendCursor for SqlxCursor<'a, DB> {
    fn column_types(&self) -> Vec<ColumnType> {
        self.columns.clone()
    }

    async fn next_row(&mut self) -> TxDbResult<Option<Vec<DatabaseValue>>> {
        if let Some(row) = self.pending.take() {
            return self.decode_row(&row).map(Some);
        }
        if self.set_done {
            return Ok(None);
        }

        match self.stream.next().await {
            None => {
                self.exhausted = true;
                self.set_done = true;
                Ok(None)
            }
            Some(Err(e)) => Err(e.into()),
            Some(Ok(Either::Left(_))) => {
                self.set_done = true;
                Ok(None)
            }
            Some(Ok(Either::Right(row))) => {
                if self.columns.is_empty() {
                    self.capture_columns(&row);
                }
                self.decode_row(&row).map(Some)
            }
        }
    }

    async fn next_result_set(&mut self) -> TxDbResult<bool> {
        while self.next_row().await?.is_some() {}
        if self.exhausted {
            return Ok(false);
        }

        self.columns.clear();
        match self.stream.next().await {
            None => {
                self.exhausted = true;
                Ok(false)
            }
            Some(Err(e)) => Err(e.into()),
            // a statement that produced no rows
            Some(Ok(Either::Left(_))) => {
                self.set_done = true;
                Ok(true)
            }
            Some(Ok(Either::Right(row))) => {
                self.capture_columns(&row);
                self.pending = Some(row);
                self.set_done = false;
                Ok(true)
            }
        }
    }

    async fn close(self: Box<Self>) -> TxDbResult<()> {
        drop(self);
        Ok(())
    }
}
