//! Record capability trait, the generic dynamic record, and tracking
//! suppression.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::registry::RecordType;
use crate::types::Value;

/// A mutable record with settable named attributes.
///
/// This is the contract the interceptor needs from the persistence layer's
/// models. Saving is done through a [`RecordSaver`](crate::RecordSaver).
pub trait AuditRecord: Send {
    fn record_type(&self) -> RecordType;

    /// Primary key, or `None` if the record has never been written.
    fn pk(&self) -> Option<u64>;

    fn set_pk(&mut self, pk: u64);

    fn field(&self, name: &str) -> Option<&Value>;

    fn set_field(&mut self, name: &str, value: Value);

    /// Snapshot of all attributes, as written to storage.
    fn to_row(&self) -> BTreeMap<String, Value>;

    /// Tracking suppression control for this instance, if the record's
    /// accessor supports it.
    ///
    /// Records that return `None` cannot suppress the interceptor during a
    /// nested save.
    fn tracking(&self) -> Option<TrackingControl> {
        None
    }
}

/// Shared handle to a per-instance tracking flag.
///
/// Disable/enable calls nest: tracking is suppressed while at least one
/// disable is outstanding. Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct TrackingControl {
    suppressed: Arc<AtomicU32>,
}

impl TrackingControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self) {
        self.suppressed.fetch_add(1, Ordering::AcqRel);
    }

    /// Re-enables tracking. Extra calls are ignored.
    pub fn enable(&self) {
        let _ = self
            .suppressed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.suppressed.load(Ordering::Acquire) == 0
    }
}

/// Disables tracking on `record`. Returns `false` if the record has no
/// tracking control.
pub fn disable_tracking(record: &dyn AuditRecord) -> bool {
    let Some(control) = record.tracking() else {
        return false;
    };
    control.disable();
    true
}

/// Re-enables tracking on `record`. Returns `false` if the record has no
/// tracking control.
pub fn enable_tracking(record: &dyn AuditRecord) -> bool {
    let Some(control) = record.tracking() else {
        return false;
    };
    control.enable();
    true
}

/// Returns `true` if tracking is currently disabled on `record`.
#[must_use]
pub fn tracking_suppressed(record: &dyn AuditRecord) -> bool {
    record
        .tracking()
        .is_some_and(|control| !control.is_enabled())
}

/// RAII guard that keeps tracking disabled on one record instance.
///
/// Tracking is re-enabled when the guard is dropped, including when the
/// guarded save returns an error or panics.
#[derive(Debug)]
#[must_use = "tracking is re-enabled as soon as the guard is dropped"]
pub struct SuppressionGuard {
    control: Option<TrackingControl>,
}

impl SuppressionGuard {
    pub fn acquire(record: &dyn AuditRecord) -> Self {
        let control = record.tracking();
        if let Some(control) = &control {
            control.disable();
        }
        Self { control }
    }

    /// Returns `true` if the record supports suppression.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.control.is_some()
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        if let Some(control) = &self.control {
            control.enable();
        }
    }
}

/// Generic record with a dynamic attribute map.
///
/// Cloning produces a distinct instance with its own tracking flag.
#[derive(Debug)]
pub struct Record {
    record_type: RecordType,
    pk: Option<u64>,
    fields: BTreeMap<String, Value>,
    tracking: TrackingControl,
}

impl Record {
    #[must_use]
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            pk: None,
            fields: BTreeMap::new(),
            tracking: TrackingControl::new(),
        }
    }

    /// Rebuilds a record from a stored row.
    #[must_use]
    pub fn from_row(record_type: RecordType, pk: u64, row: BTreeMap<String, Value>) -> Self {
        Self {
            record_type,
            pk: Some(pk),
            fields: row,
            tracking: TrackingControl::new(),
        }
    }

    /// Sets an attribute, builder style.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Attribute value, or [`Value::Null`] if unset.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.fields.get(name).unwrap_or(NULL)
    }
}

impl Clone for Record {
    fn clone(&self) -> Self {
        Self {
            record_type: self.record_type,
            pk: self.pk,
            fields: self.fields.clone(),
            tracking: TrackingControl::new(),
        }
    }
}

impl AuditRecord for Record {
    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn pk(&self) -> Option<u64> {
        self.pk
    }

    fn set_pk(&mut self, pk: u64) {
        self.pk = Some(pk);
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    fn to_row(&self) -> BTreeMap<String, Value> {
        self.fields.clone()
    }

    fn tracking(&self) -> Option<TrackingControl> {
        Some(self.tracking.clone())
    }
}
