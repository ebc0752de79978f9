//! `auditlog` server: request-scoped stamping of who created or modified a
//! record, and in which session.
//!
//! A request is captured when it starts ([`capture`]), its handlers are
//! connected to the process-wide write signals ([`signals`]) under a key
//! unique to that request, and every save issued under that request's
//! [`scope`] is stamped before it is written. Installs exist for
//! thread-per-request hosts and for tower/axum
//! ([`interceptor::SyncInterceptor`], [`interceptor::AuditLayer`]).

pub mod capture;
pub mod config;
pub mod interceptor;
pub mod network;
pub mod scope;
pub mod signals;
pub mod storage;

pub use capture::{Capture, CaptureError, Capturer, RequestHead, SkipReason};
pub use config::{AuditConfig, AuditSettings, ConfigError, JwtConfig};
pub use interceptor::{
    save_offloaded, wrap_application, AuditInterceptor, AuditLayer, AuditService, ExecutionMode,
    OffloadError, Registration, SyncInterceptor, TrackedBody,
};
pub use signals::{Signal, WriteSignals};
pub use storage::{HashMapStorage, ModelStore, StorageEngine};
