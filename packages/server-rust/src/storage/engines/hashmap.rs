//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.

use dashmap::DashMap;

use auditlog_core::RecordType;

use crate::storage::engine::{Row, StorageEngine};

/// In-memory row storage backed by [`DashMap`].
pub struct HashMapStorage {
    rows: DashMap<(RecordType, u64), Row>,
    next_ids: DashMap<RecordType, u64>,
}

impl HashMapStorage {
    /// Creates a new, empty `HashMapStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_ids: DashMap::new(),
        }
    }
}

impl Default for HashMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for HashMapStorage {
    fn put(&self, record_type: RecordType, pk: u64, row: Row) -> Option<Row> {
        self.rows.insert((record_type, pk), row)
    }

    fn get(&self, record_type: RecordType, pk: u64) -> Option<Row> {
        self.rows.get(&(record_type, pk)).map(|r| r.clone())
    }

    fn next_id(&self, record_type: RecordType) -> u64 {
        let mut next = self.next_ids.entry(record_type).or_insert(0);
        *next += 1;
        *next
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}
