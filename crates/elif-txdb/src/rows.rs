//! Buffered result sets
//!
//! Query results are read into memory as soon as the query runs and the
//! backend cursor is closed before the caller sees anything, so holding a
//! [`Rows`] never pins the shared transaction.

use crate::backends::{BackendCursor, ColumnType};
use crate::error::{TxDbError, TxDbResult};
use crate::value::DatabaseValue;

/// One fully materialized result set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBuffer {
    columns: Vec<String>,
    column_types: Vec<ColumnType>,
    rows: Vec<Vec<DatabaseValue>>,
    pos: usize,
}

impl RowBuffer {
    pub fn new(column_types: Vec<ColumnType>, rows: Vec<Vec<DatabaseValue>>) -> Self {
        Self {
            columns: column_types.iter().map(|c| c.name.clone()).collect(),
            column_types,
            rows,
            pos: 0,
        }
    }

    /// Read the current result set of a cursor to its end
    async fn read(cursor: &mut (dyn BackendCursor + '_)) -> TxDbResult<Self> {
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row().await? {
            rows.push(row);
        }
        Ok(Self::new(cursor.column_types(), rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy the next row into `dest`. Returns `Ok(false)` once exhausted.
    pub fn next(&mut self, dest: &mut [DatabaseValue]) -> TxDbResult<bool> {
        let Some(row) = self.rows.get(self.pos) else {
            return Ok(false);
        };
        if dest.len() != row.len() {
            return Err(TxDbError::ColumnCount {
                expected: row.len(),
                actual: dest.len(),
            });
        }
        dest.clone_from_slice(row);
        self.pos += 1;
        Ok(true)
    }
}

/// Buffered rows of a query, possibly spanning several result sets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    sets: Vec<RowBuffer>,
    pos: usize,
}

impl Rows {
    pub fn new(sets: Vec<RowBuffer>) -> Self {
        Self { sets, pos: 0 }
    }

    fn current(&self) -> Option<&RowBuffer> {
        self.sets.get(self.pos)
    }

    /// Column names of the active result set
    pub fn columns(&self) -> &[String] {
        self.current().map(RowBuffer::columns).unwrap_or_default()
    }

    /// Column type metadata of the active result set
    pub fn column_types(&self) -> &[ColumnType] {
        self.current().map(RowBuffer::column_types).unwrap_or_default()
    }

    /// Copy the next row of the active result set into `dest`
    pub fn next(&mut self, dest: &mut [DatabaseValue]) -> TxDbResult<bool> {
        match self.sets.get_mut(self.pos) {
            Some(set) => set.next(dest),
            None => Ok(false),
        }
    }

    pub fn has_next_result_set(&self) -> bool {
        self.pos + 1 < self.sets.len()
    }

    /// Advance to the next result set. Returns `false` when there is none.
    pub fn next_result_set(&mut self) -> bool {
        if !self.has_next_result_set() {
            return false;
        }
        self.pos += 1;
        true
    }

    /// Number of rows in the active result set
    pub fn row_count(&self) -> usize {
        self.current().map_or(0, RowBuffer::len)
    }

    pub fn result_set_count(&self) -> usize {
        self.sets.len()
    }
}

/// Drain every result set of a cursor into memory and close the cursor
pub(crate) async fn drain(mut cursor: Box<dyn BackendCursor + '_>) -> TxDbResult<Rows> {
    let read = read_sets(cursor.as_mut()).await;
    let closed = cursor.close().await;
    let sets = read?;
    closed?;
    Ok(Rows::new(sets))
}

async fn read_sets(cursor: &mut (dyn BackendCursor + '_)) -> TxDbResult<Vec<RowBuffer>> {
    let mut sets = vec![RowBuffer::read(cursor).await?];
    while cursor.next_result_set().await? {
        sets.push(RowBuffer::read(cursor).await?);
    }
    Ok(sets)
}
