//! Write events emitted by the persistence layer around every save.

use crate::context::RegistrationKey;
use crate::record::{tracking_suppressed, AuditRecord};
use crate::registry::RecordType;

/// Which side of the underlying write an event is emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Before the row is written; attribute changes become part of the write.
    PreWrite,
    /// After the row is durable.
    PostWrite,
}

/// Result of a completed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub pk: u64,
    /// `true` if the save inserted a new row.
    pub created: bool,
}

/// Persistence entry point handlers use for nested saves.
///
/// Implementations emit a pre-write and a post-write [`WriteEvent`] around
/// each save.
pub trait RecordSaver: Send + Sync {
    /// Saves `record`, inserting it if it has no primary key yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or a write-event handler fails.
    fn save(&self, record: &mut dyn AuditRecord) -> anyhow::Result<SaveOutcome>;
}

/// A single pre-write or post-write notification.
pub struct WriteEvent<'a> {
    pub phase: WritePhase,
    pub record_type: RecordType,
    pub record: &'a mut dyn AuditRecord,
    /// `true` if the write inserts (or inserted) a new row.
    pub is_new: bool,
    /// Request the write was issued under, if any.
    pub origin: Option<RegistrationKey>,
    /// Saver that emitted this event.
    pub saver: &'a dyn RecordSaver,
}

impl WriteEvent<'_> {
    /// Returns `true` if the write was issued under `key`.
    #[must_use]
    pub fn is_from(&self, key: RegistrationKey) -> bool {
        self.origin == Some(key)
    }

    #[must_use]
    pub fn tracking_suppressed(&self) -> bool {
        tracking_suppressed(&*self.record)
    }
}

impl std::fmt::Debug for WriteEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteEvent")
            .field("phase", &self.phase)
            .field("record_type", &self.record_type)
            .field("pk", &self.record.pk())
            .field("is_new", &self.is_new)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
