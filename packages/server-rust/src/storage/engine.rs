//! Low-level row storage trait.
//!
//! Defines [`StorageEngine`], the innermost layer under
//! [`ModelStore`](super::ModelStore). Engines store attribute rows keyed by
//! record type and primary key and know nothing about write events.

use std::collections::BTreeMap;

use auditlog_core::{RecordType, Value};

/// A stored attribute snapshot.
pub type Row = BTreeMap<String, Value>;

/// Synchronous key-value storage for record rows.
///
/// Wrapped in `Arc<dyn StorageEngine>` for sharing across threads.
pub trait StorageEngine: Send + Sync + 'static {
    /// Insert or replace a row. Returns the previous row if any.
    fn put(&self, record_type: RecordType, pk: u64, row: Row) -> Option<Row>;

    /// Retrieve a row, or `None` if not present.
    fn get(&self, record_type: RecordType, pk: u64) -> Option<Row>;

    /// Allocate the next primary key for `record_type`. Keys start at 1.
    fn next_id(&self, record_type: RecordType) -> u64;

    /// Total number of stored rows across all record types.
    fn row_count(&self) -> usize;
}
