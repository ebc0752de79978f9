//! Request-scoped write handlers shared by every install.

use std::sync::Arc;

use auditlog_core::{
    FieldRegistry, MarkerFieldKind, RegistrationKey, RequestContext, SuppressionGuard, WriteEvent,
};
use metrics::counter;

use super::offload;
use crate::capture::{Capture, Capturer, RequestHead};
use crate::signals::{handler, WriteSignals};

/// Owner name stamped into every [`RegistrationKey`] this interceptor issues.
const OWNER: &str = "audit_interceptor";

/// How the host schedules request handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One request per thread. Nested saves run inline.
    #[default]
    Threaded,
    /// Many requests interleaved on an async runtime. Nested saves are moved
    /// off the runtime worker.
    Cooperative,
}

// ---------------------------------------------------------------------------
// AuditInterceptor
// ---------------------------------------------------------------------------

/// Connects per-request stamping handlers to the write signals.
///
/// Cheap to clone; every clone shares the same registry, signals and
/// capturer.
#[derive(Clone)]
pub struct AuditInterceptor {
    registry: Arc<FieldRegistry>,
    signals: Arc<WriteSignals>,
    capturer: Capturer,
    mode: ExecutionMode,
}

impl AuditInterceptor {
    #[must_use]
    pub fn new(registry: Arc<FieldRegistry>, signals: Arc<WriteSignals>, capturer: Capturer) -> Self {
        Self {
            registry,
            signals,
            capturer,
            mode: ExecutionMode::default(),
        }
    }

    /// Interceptor over the process-wide registry, signals and settings.
    #[must_use]
    pub fn from_globals() -> Self {
        Self::new(
            FieldRegistry::global(),
            WriteSignals::global(),
            Capturer::default(),
        )
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn signals(&self) -> &Arc<WriteSignals> {
        &self.signals
    }

    #[must_use]
    pub fn capturer(&self) -> &Capturer {
        &self.capturer
    }

    #[must_use]
    pub fn capture(&self, request: &dyn RequestHead) -> Capture {
        self.capturer.capture(request, OWNER)
    }

    /// Captures `request` and, if it is tracked, registers its handlers.
    pub fn begin(&self, request: &dyn RequestHead) -> Option<Registration> {
        match self.capture(request) {
            Capture::Skip(reason) => {
                tracing::trace!(?reason, method = %request.method(), path = request.path(), "request not tracked");
                None
            }
            Capture::Track(ctx) => {
                tracing::debug!(
                    registration = %ctx.registration_key,
                    method = %request.method(),
                    path = request.path(),
                    "registering write handlers"
                );
                Some(self.enter(ctx))
            }
        }
    }

    /// Connects the pre-write and post-write handlers for `ctx`.
    ///
    /// Both handlers only act on events whose origin is `ctx`'s key and whose
    /// record is not suppressed.
    pub fn enter(&self, ctx: RequestContext) -> Registration {
        let key = ctx.registration_key;
        let ctx = Arc::new(ctx);

        let pre = {
            let registry = Arc::clone(&self.registry);
            let ctx = Arc::clone(&ctx);
            handler(move |event| {
                if event.is_from(key) && !event.tracking_suppressed() {
                    stamp(&registry, event, &ctx, &MarkerFieldKind::PRE_WRITE);
                }
                Ok(())
            })
        };

        let post = {
            let registry = Arc::clone(&self.registry);
            let mode = self.mode;
            handler(move |event| {
                if !event.is_new || !event.is_from(key) || event.tracking_suppressed() {
                    return Ok(());
                }
                if stamp(&registry, event, &ctx, &MarkerFieldKind::POST_CREATE) == 0 {
                    return Ok(());
                }
                nested_save(event, mode)
            })
        };

        let replaced_pre = self.signals.pre_write.connect(key, pre);
        let replaced_post = self.signals.post_write.connect(key, post);
        if replaced_pre || replaced_post {
            tracing::warn!(registration = %key, "registration key reused; previous handlers replaced");
        }
        counter!("auditlog_registrations_total").increment(1);

        Registration {
            key,
            signals: Arc::clone(&self.signals),
            closed: false,
        }
    }
}

impl Default for AuditInterceptor {
    fn default() -> Self {
        Self::from_globals()
    }
}

impl std::fmt::Debug for AuditInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditInterceptor")
            .field("mode", &self.mode)
            .field("capturer", &self.capturer)
            .finish_non_exhaustive()
    }
}

/// Writes the request's identity or session into every field of `kinds`
/// declared on the event's record type. Returns the number of fields set.
fn stamp(
    registry: &FieldRegistry,
    event: &mut WriteEvent<'_>,
    ctx: &RequestContext,
    kinds: &[MarkerFieldKind],
) -> usize {
    let mut stamped = 0;
    for &kind in kinds {
        let Some(fields) = registry.marked_fields(kind, event.record_type) else {
            continue;
        };
        let value = if kind.is_identity() {
            ctx.identity_value()
        } else {
            ctx.session_value()
        };
        for field in &*fields {
            tracing::trace!(
                registration = %ctx.registration_key,
                record_type = %event.record_type,
                field = field.as_str(),
                %kind,
                "stamping field"
            );
            event.record.set_field(field, value.clone());
        }
        counter!("auditlog_fields_stamped_total", "kind" => kind.as_str())
            .increment(fields.len() as u64);
        stamped += fields.len();
    }
    stamped
}

/// Persists the creating fields just stamped on a new record, with this
/// record's tracking suppressed for the duration of the save.
fn nested_save(event: &mut WriteEvent<'_>, mode: ExecutionMode) -> anyhow::Result<()> {
    let guard = SuppressionGuard::acquire(&*event.record);
    if !guard.is_effective() {
        tracing::debug!(record_type = %event.record_type, "record has no tracking control");
    }
    let saver = event.saver;
    let record = &mut *event.record;
    match mode {
        ExecutionMode::Threaded => saver.save(record)?,
        ExecutionMode::Cooperative => offload::run_blocking(|| saver.save(record))?,
    };
    drop(guard);
    counter!("auditlog_nested_saves_total").increment(1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A live handler pair for one request.
///
/// Disconnects both handlers exactly once, on [`close`](Self::close) or when
/// dropped.
#[must_use = "handlers are disconnected as soon as the registration is dropped"]
pub struct Registration {
    key: RegistrationKey,
    signals: Arc<WriteSignals>,
    closed: bool,
}

impl Registration {
    #[must_use]
    pub fn key(&self) -> RegistrationKey {
        self.key
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        let pre = self.signals.pre_write.disconnect(self.key);
        let post = self.signals.post_write.disconnect(self.key);
        if pre || post {
            counter!("auditlog_deregistrations_total").increment(1);
            tracing::debug!(registration = %self.key, "write handlers disconnected");
        } else {
            tracing::trace!(registration = %self.key, "write handlers already gone");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
