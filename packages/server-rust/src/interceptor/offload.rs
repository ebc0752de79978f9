//! Moving blocking saves off async runtime workers.

use std::cell::Cell;
use std::sync::Arc;

use auditlog_core::{AuditRecord, RecordSaver, SaveOutcome};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::scope;

thread_local! {
    static OFFLOAD_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Failure of an offloaded save.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// The save itself, or one of its write-event handlers, failed.
    #[error(transparent)]
    Save(#[from] anyhow::Error),
    /// The worker panicked or was cancelled before the save completed.
    #[error("offloaded save did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Saves `record` on the blocking pool and waits for the result.
///
/// The save runs under the caller's request scope, so the interceptor
/// attributes it to the calling request. The record is handed back with the
/// outcome. A plain `spawn_blocking` does not carry the scope; use
/// [`scope::wrap_blocking`] for other blocking work that saves records.
///
/// # Errors
///
/// Returns [`OffloadError::Save`] if the save fails and
/// [`OffloadError::Join`] if the worker panics.
pub async fn save_offloaded<S, R>(saver: Arc<S>, mut record: R) -> Result<(R, SaveOutcome), OffloadError>
where
    S: RecordSaver + ?Sized + 'static,
    R: AuditRecord + 'static,
{
    let outcome = tokio::task::spawn_blocking(scope::wrap_blocking(move || {
        let _worker = WorkerMark::set();
        saver.save(&mut record).map(|outcome| (record, outcome))
    }))
    .await??;
    Ok(outcome)
}

/// Runs blocking `f` from synchronous code that may be on a runtime worker.
///
/// Runs inline on offload workers and outside any runtime. On a
/// multi-threaded runtime worker the worker is handed over to the blocking
/// pool for the duration of `f`. A current-thread runtime has nowhere to move
/// the work, so `f` runs inline with a warning.
pub fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    if is_offload_worker() {
        return f();
    }
    let Ok(handle) = Handle::try_current() else {
        return f();
    };
    match handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        flavor => {
            tracing::warn!(?flavor, "blocking save on a single-threaded runtime");
            f()
        }
    }
}

/// Returns `true` on a thread currently running a [`save_offloaded`] job.
#[must_use]
pub fn is_offload_worker() -> bool {
    OFFLOAD_WORKER.with(Cell::get)
}

/// Marks the current blocking-pool thread as an offload worker until dropped.
struct WorkerMark {
    previous: bool,
}

impl WorkerMark {
    fn set() -> Self {
        Self {
            previous: OFFLOAD_WORKER.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for WorkerMark {
    fn drop(&mut self) {
        OFFLOAD_WORKER.with(|flag| flag.set(self.previous));
    }
}
