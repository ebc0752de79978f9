//! Process-wide index of marker fields per record type.
//!
//! Populated while record types are declared at startup and read on every
//! write event. Lookups are by exact [`RecordType`]: a record type never
//! inherits marker fields declared on another type.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::marker::MarkerFieldKind;

/// Exact identity of a declared record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(&'static str);

impl RecordType {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

type FieldsByType = HashMap<RecordType, Arc<[String]>>;

/// Mapping `MarkerFieldKind -> RecordType -> [field name]`.
///
/// Field order within a record type is declaration order, so stamping
/// writes fields in a deterministic sequence.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: RwLock<HashMap<MarkerFieldKind, FieldsByType>>,
}

static GLOBAL: OnceLock<Arc<FieldRegistry>> = OnceLock::new();

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers `field` on `record_type` with the given marker kind.
    ///
    /// Idempotent: returns `false` if the field was already registered for
    /// this kind and type.
    pub fn register(
        &self,
        kind: MarkerFieldKind,
        record_type: RecordType,
        field: impl Into<String>,
    ) -> bool {
        let field = field.into();
        let mut fields = self.fields.write();
        let by_type = fields.entry(kind).or_default();
        let mut declared = match by_type.get(&record_type) {
            Some(declared) if declared.contains(&field) => return false,
            Some(declared) => declared.to_vec(),
            None => Vec::new(),
        };
        tracing::trace!(%kind, %record_type, field = %field, "registered marker field");
        declared.push(field);
        by_type.insert(record_type, declared.into());
        true
    }

    /// Field names of `record_type` declared with `kind`, in declaration order.
    ///
    /// Empty if none were declared.
    #[must_use]
    pub fn fields_of(&self, kind: MarkerFieldKind, record_type: RecordType) -> Vec<String> {
        self.marked_fields(kind, record_type)
            .map(|fields| fields.to_vec())
            .unwrap_or_default()
    }

    /// Shared list of the fields [`fields_of`](Self::fields_of) returns, or
    /// `None` if none were declared. Does not copy the names.
    #[must_use]
    pub fn marked_fields(
        &self,
        kind: MarkerFieldKind,
        record_type: RecordType,
    ) -> Option<Arc<[String]>> {
        self.fields
            .read()
            .get(&kind)
            .and_then(|by_type| by_type.get(&record_type))
            .map(Arc::clone)
    }

    #[must_use]
    pub fn has_any(&self, kind: MarkerFieldKind, record_type: RecordType) -> bool {
        self.fields
            .read()
            .get(&kind)
            .and_then(|by_type| by_type.get(&record_type))
            .is_some_and(|fields| !fields.is_empty())
    }

    /// Returns `true` if `record_type` has a marker field of any kind.
    #[must_use]
    pub fn is_tracked(&self, record_type: RecordType) -> bool {
        MarkerFieldKind::ALL
            .iter()
            .any(|kind| self.has_any(*kind, record_type))
    }

    /// Starts a declarative marker-field declaration for `record_type`.
    pub fn declare(&self, record_type: RecordType) -> ModelDeclaration<'_> {
        ModelDeclaration {
            registry: self,
            record_type,
        }
    }
}

/// Builder returned by [`FieldRegistry::declare`].
///
/// ```
/// use auditlog_core::{FieldRegistry, MarkerFieldKind, RecordType};
///
/// const NOTE: RecordType = RecordType::new("note");
///
/// let registry = FieldRegistry::new();
/// registry
///     .declare(NOTE)
///     .field(MarkerFieldKind::CreatingIdentity, "created_by")
///     .field(MarkerFieldKind::LastModifyingIdentity, "modified_by");
///
/// assert_eq!(
///     registry.fields_of(MarkerFieldKind::CreatingIdentity, NOTE),
///     vec!["created_by".to_string()]
/// );
/// ```
pub struct ModelDeclaration<'a> {
    registry: &'a FieldRegistry,
    record_type: RecordType,
}

impl ModelDeclaration<'_> {
    pub fn field(self, kind: MarkerFieldKind, name: impl Into<String>) -> Self {
        self.registry.register(kind, self.record_type, name);
        self
    }

    pub fn last_modified_by(self, name: impl Into<String>) -> Self {
        self.field(MarkerFieldKind::LastModifyingIdentity, name)
    }

    pub fn last_session(self, name: impl Into<String>) -> Self {
        self.field(MarkerFieldKind::LastSessionToken, name)
    }

    pub fn created_by(self, name: impl Into<String>) -> Self {
        self.field(MarkerFieldKind::CreatingIdentity, name)
    }

    pub fn created_in_session(self, name: impl Into<String>) -> Self {
        self.field(MarkerFieldKind::CreatingSessionToken, name)
    }
}
