//! `auditlog` core: marker fields, the field registry, records and write events.

pub mod context;
pub mod event;
pub mod marker;
pub mod record;
pub mod registry;
pub mod types;

pub use context::{RegistrationKey, RequestContext};
pub use event::{RecordSaver, SaveOutcome, WriteEvent, WritePhase};
pub use marker::MarkerFieldKind;
pub use record::{
    disable_tracking, enable_tracking, tracking_suppressed, AuditRecord, Record,
    SuppressionGuard, TrackingControl,
};
pub use registry::{FieldRegistry, ModelDeclaration, RecordType};
pub use types::{Principal, Value};
