//! Transaction Savepoints
//!
//! Nested transactions are emulated with savepoints inside the ambient
//! transaction. A [`SavePoint`] strategy produces the SQL for the three
//! savepoint operations; [`SavepointCounter`] hands out unique names.

use std::sync::atomic::{AtomicU32, Ordering};

/// Syntax used to create, release and roll back savepoints
pub trait SavePoint: Send + Sync {
    fn create(&self, id: &str) -> String;
    fn release(&self, id: &str) -> String;
    fn rollback(&self, id: &str) -> String;
}

/// Standard SQL savepoint syntax, understood by PostgreSQL, MySQL and SQLite
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSavePoint;

impl SavePoint for DefaultSavePoint {
    fn create(&self, id: &str) -> String {
        format!("SAVEPOINT {}", id)
    }

    fn release(&self, id: &str) -> String {
        format!("RELEASE SAVEPOINT {}", id)
    }

    fn rollback(&self, id: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", id)
    }
}

/// Monotonic savepoint name generator, one per logical connection
#[derive(Debug, Default)]
pub struct SavepointCounter {
    savepoint_count: AtomicU32,
}

impl SavepointCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next savepoint name
    pub fn next_id(&self) -> String {
        let n = self.savepoint_count.fetch_add(1, Ordering::SeqCst) + 1;
        format!("tx_{}", n)
    }

    /// Get the current savepoint count
    pub fn savepoint_count(&self) -> u32 {
        self.savepoint_count.load(Ordering::SeqCst)
    }
}
