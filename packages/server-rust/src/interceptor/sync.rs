//! Thread-per-request install.

use super::audit::{AuditInterceptor, ExecutionMode};
use crate::capture::RequestHead;
use crate::scope;

/// Wraps a blocking request handler so writes it issues on the calling thread
/// are stamped with the request's identity and session.
#[derive(Debug, Clone)]
pub struct SyncInterceptor {
    interceptor: AuditInterceptor,
}

impl SyncInterceptor {
    #[must_use]
    pub fn new(interceptor: AuditInterceptor) -> Self {
        Self {
            interceptor: interceptor.with_mode(ExecutionMode::Threaded),
        }
    }

    #[must_use]
    pub fn interceptor(&self) -> &AuditInterceptor {
        &self.interceptor
    }

    /// Runs `f` with `request` registered and the thread scope entered.
    ///
    /// Handlers are disconnected when `f` returns or unwinds.
    pub fn handle<Q, R>(&self, request: Q, f: impl FnOnce(Q) -> R) -> R
    where
        Q: RequestHead,
    {
        let registration = self.interceptor.begin(&request);
        let _scope = registration.as_ref().map(|r| scope::enter(r.key()));
        f(request)
    }
}

impl Default for SyncInterceptor {
    fn default() -> Self {
        Self::new(AuditInterceptor::from_globals())
    }
}
