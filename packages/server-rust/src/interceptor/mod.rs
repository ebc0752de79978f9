//! Write-event interceptor and its installs.
//!
//! [`AuditInterceptor`] holds the stamping logic. It is installed either
//! around a blocking handler with [`SyncInterceptor`], or as tower
//! middleware with [`AuditLayer`], where the registration lives until the
//! response body is done.

pub mod audit;
pub mod body;
pub mod layer;
pub mod offload;
pub mod sync;

pub use audit::{AuditInterceptor, ExecutionMode, Registration};
pub use body::TrackedBody;
pub use layer::{wrap_application, AuditLayer, AuditService};
pub use offload::{run_blocking, save_offloaded, OffloadError};
pub use sync::SyncInterceptor;
