//! Record persistence with write events.
//!
//! [`ModelStore`] is the save path the interceptor hooks into: every save
//! emits a pre-write event, writes the row, then emits a post-write event.
//! Each event carries the ambient request scope as its origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use auditlog_core::{
    AuditRecord, Record, RecordSaver, RecordType, SaveOutcome, WriteEvent, WritePhase,
};

use super::engine::StorageEngine;
use super::engines::HashMapStorage;
use crate::scope;
use crate::signals::WriteSignals;

/// Saves records into a [`StorageEngine`], emitting write events.
pub struct ModelStore {
    engine: Arc<dyn StorageEngine>,
    signals: Arc<WriteSignals>,
    writes: AtomicU64,
}

impl ModelStore {
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>, signals: Arc<WriteSignals>) -> Self {
        Self {
            engine,
            signals,
            writes: AtomicU64::new(0),
        }
    }

    /// Creates a store over a fresh [`HashMapStorage`].
    #[must_use]
    pub fn in_memory(signals: Arc<WriteSignals>) -> Self {
        Self::new(Arc::new(HashMapStorage::new()), signals)
    }

    #[must_use]
    pub fn signals(&self) -> &Arc<WriteSignals> {
        &self.signals
    }

    /// Loads a stored record.
    #[must_use]
    pub fn load(&self, record_type: RecordType, pk: u64) -> Option<Record> {
        self.engine
            .get(record_type, pk)
            .map(|row| Record::from_row(record_type, pk, row))
    }

    /// Number of rows written since this store was created.
    ///
    /// Counts every underlying write, including nested saves issued by
    /// write-event receivers.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl RecordSaver for ModelStore {
    fn save(&self, record: &mut dyn AuditRecord) -> anyhow::Result<SaveOutcome> {
        let record_type = record.record_type();
        let is_new = record.pk().is_none();
        let origin = scope::current();

        self.signals.pre_write.send(&mut WriteEvent {
            phase: WritePhase::PreWrite,
            record_type,
            record: &mut *record,
            is_new,
            origin,
            saver: self,
        })?;

        let pk = if let Some(pk) = record.pk() {
            pk
        } else {
            let pk = self.engine.next_id(record_type);
            record.set_pk(pk);
            pk
        };
        self.engine.put(record_type, pk, record.to_row());
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%record_type, pk, created = is_new, "row written");

        self.signals.post_write.send(&mut WriteEvent {
            phase: WritePhase::PostWrite,
            record_type,
            record: &mut *record,
            is_new,
            origin,
            saver: self,
        })?;

        Ok(SaveOutcome {
            pk,
            created: is_new,
        })
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("rows", &self.engine.row_count())
            .field("writes", &self.write_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use auditlog_core::{RegistrationKey, Value};

    use super::*;
    use crate::signals::handler;

    const NOTE: RecordType = RecordType::new("note");

    fn make_store() -> ModelStore {
        ModelStore::in_memory(Arc::new(WriteSignals::new()))
    }

    #[test]
    fn insert_then_update() {
        let store = make_store();
        let mut note = Record::new(NOTE).with("title", "draft");

        let first = store.save(&mut note).unwrap();
        assert!(first.created);
        assert_eq!(note.pk(), Some(first.pk));

        note.set_field("title", Value::from("final"));
        let second = store.save(&mut note).unwrap();
        assert!(!second.created);
        assert_eq!(second.pk, first.pk);

        let loaded = store.load(NOTE, first.pk).unwrap();
        assert_eq!(loaded.get("title"), &Value::from("final"));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn pre_write_changes_are_part_of_the_write() {
        let store = make_store();
        store.signals().pre_write.observe(
            RegistrationKey::new("test"),
            handler(|event| {
                event.record.set_field("stamped", Value::from(true));
                Ok(())
            }),
        );

        let mut note = Record::new(NOTE);
        let outcome = store.save(&mut note).unwrap();
        let loaded = store.load(NOTE, outcome.pk).unwrap();
        assert_eq!(loaded.get("stamped"), &Value::Bool(true));
    }

    #[test]
    fn events_report_new_flag_and_phase_order() {
        let store = make_store();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for phase in [WritePhase::PreWrite, WritePhase::PostWrite] {
            let log = Arc::clone(&log);
            store.signals().signal(phase).observe(
                RegistrationKey::new("test"),
                handler(move |event| {
                    log.lock().push((event.phase, event.is_new, event.record.pk()));
                    Ok(())
                }),
            );
        }

        let mut note = Record::new(NOTE);
        store.save(&mut note).unwrap();
        store.save(&mut note).unwrap();

        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec![
                (WritePhase::PreWrite, true, None),
                (WritePhase::PostWrite, true, Some(1)),
                (WritePhase::PreWrite, false, Some(1)),
                (WritePhase::PostWrite, false, Some(1)),
            ]
        );
    }

    #[test]
    fn events_carry_thread_scope_origin() {
        let store = make_store();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.signals().pre_write.observe(
            RegistrationKey::new("test"),
            handler(move |event| {
                sink.lock().push(event.origin);
                Ok(())
            }),
        );

        let key = RegistrationKey::new("request");
        {
            let _scope = scope::enter(key);
            store.save(&mut Record::new(NOTE)).unwrap();
        }
        store.save(&mut Record::new(NOTE)).unwrap();

        assert_eq!(*seen.lock(), vec![Some(key), None]);
    }

    #[test]
    fn pre_write_failure_aborts_the_write() {
        let store = make_store();
        store.signals().pre_write.observe(
            RegistrationKey::new("test"),
            handler(|_event| anyhow::bail!("rejected")),
        );

        let mut note = Record::new(NOTE);
        let err = store.save(&mut note).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert!(note.pk().is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn receiver_can_issue_nested_save() {
        let store = make_store();
        let nested = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&nested);
        store.signals().post_write.observe(
            RegistrationKey::new("test"),
            handler(move |event| {
                if event.is_new {
                    counter.fetch_add(1, Ordering::SeqCst);
                    event.record.set_field("touched", Value::from(true));
                    event.saver.save(&mut *event.record)?;
                }
                Ok(())
            }),
        );

        let mut note = Record::new(NOTE);
        let outcome = store.save(&mut note).unwrap();
        assert_eq!(nested.load(Ordering::SeqCst), 1);
        assert_eq!(store.write_count(), 2);
        assert_eq!(
            store.load(NOTE, outcome.pk).unwrap().get("touched"),
            &Value::Bool(true)
        );
    }
}
