//! Ambient request scope.
//!
//! Records which request the current code runs under, so the persistence
//! layer can tag every [`WriteEvent`](auditlog_core::WriteEvent) with its
//! origin without the key being passed through every call site.
//!
//! Two slots exist: a thread-local one for thread-per-request hosts and
//! offload workers, and a tokio task-local one for cooperative hosts. The
//! thread slot wins when both are set.
//!
//! Neither slot is inherited by work started from inside the scope: a
//! future handed to `tokio::spawn` or a closure handed to `spawn_blocking`
//! or `std::thread::spawn` runs unscoped, and its writes are not stamped.
//! Wrap such work with [`propagate`] or [`wrap_blocking`] to carry the key.

use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;

use auditlog_core::RegistrationKey;

tokio::task_local! {
    static TASK_SCOPE: RegistrationKey;
}

thread_local! {
    static THREAD_SCOPE: Cell<Option<RegistrationKey>> = const { Cell::new(None) };
}

/// Key of the request the caller is running under, if any.
#[must_use]
pub fn current() -> Option<RegistrationKey> {
    THREAD_SCOPE
        .with(Cell::get)
        .or_else(|| TASK_SCOPE.try_with(|key| *key).ok())
}

/// Enters `key` on the current thread until the guard is dropped.
pub fn enter(key: RegistrationKey) -> ScopeGuard {
    let previous = THREAD_SCOPE.with(|slot| slot.replace(Some(key)));
    ScopeGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Runs `f` on the current thread under `key`, or unscoped if `key` is `None`.
pub fn run_in<R>(key: Option<RegistrationKey>, f: impl FnOnce() -> R) -> R {
    let _guard = key.map(enter);
    f()
}

/// Polls `fut` with the task-local scope set to `key`.
pub async fn in_scope<F: Future>(key: RegistrationKey, fut: F) -> F::Output {
    TASK_SCOPE.scope(key, fut).await
}

/// Binds `fut` to the caller's scope, for handing to `tokio::spawn`.
///
/// The scope is read when this is called, not when the future is first
/// polled.
pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let key = current();
    async move {
        match key {
            Some(key) => TASK_SCOPE.scope(key, fut).await,
            None => fut.await,
        }
    }
}

/// Binds `f` to the caller's scope, for handing to `spawn_blocking` or a
/// new thread.
pub fn wrap_blocking<R>(f: impl FnOnce() -> R) -> impl FnOnce() -> R {
    let key = current();
    move || run_in(key, f)
}

/// Restores the previous thread scope on drop.
///
/// Not `Send`: a thread scope must not outlive the thread it was entered on.
#[derive(Debug)]
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<RegistrationKey>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        THREAD_SCOPE.with(|slot| slot.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_scope_by_default() {
        assert!(current().is_none());
    }

    #[test]
    fn thread_scope_nests_and_restores() {
        let outer = RegistrationKey::new("test");
        let inner = RegistrationKey::new("test");
        {
            let _outer = enter(outer);
            assert_eq!(current(), Some(outer));
            {
                let _inner = enter(inner);
                assert_eq!(current(), Some(inner));
            }
            assert_eq!(current(), Some(outer));
        }
        assert!(current().is_none());
    }

    #[test]
    fn thread_scope_does_not_leak_to_other_threads() {
        let key = RegistrationKey::new("test");
        let _guard = enter(key);
        let seen = std::thread::spawn(current).join().unwrap();
        assert!(seen.is_none());
    }

    #[test]
    fn run_in_without_key_is_unscoped() {
        assert!(run_in(None, current).is_none());
        let key = RegistrationKey::new("test");
        assert_eq!(run_in(Some(key), current), Some(key));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn task_scope_visible_across_awaits() {
        let key = RegistrationKey::new("test");
        let seen = in_scope(key, async {
            tokio::task::yield_now().await;
            current()
        })
        .await;
        assert_eq!(seen, Some(key));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn interleaved_tasks_keep_their_own_scope() {
        let a = RegistrationKey::new("test");
        let b = RegistrationKey::new("test");
        let check = |key: RegistrationKey| {
            in_scope(key, async move {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    assert_eq!(current(), Some(key));
                }
            })
        };
        tokio::join!(check(a), check(b));
    }

    #[tokio::test]
    async fn thread_scope_takes_precedence() {
        let task = RegistrationKey::new("test");
        let thread = RegistrationKey::new("test");
        in_scope(task, async move {
            let _guard = enter(thread);
            assert_eq!(current(), Some(thread));
        })
        .await;
    }

    #[tokio::test]
    async fn spawned_task_is_unscoped_unless_propagated() {
        let key = RegistrationKey::new("test");
        let (plain, carried) = in_scope(key, async {
            let plain = tokio::spawn(async { current() });
            let carried = tokio::spawn(propagate(async {
                tokio::task::yield_now().await;
                current()
            }));
            (plain.await.unwrap(), carried.await.unwrap())
        })
        .await;
        assert!(plain.is_none());
        assert_eq!(carried, Some(key));
    }

    #[test]
    fn wrapped_closure_carries_thread_scope() {
        let key = RegistrationKey::new("test");
        let job = {
            let _guard = enter(key);
            wrap_blocking(current)
        };
        let seen = std::thread::spawn(job).join().unwrap();
        assert_eq!(seen, Some(key));
    }

    #[test]
    fn wrap_blocking_outside_scope_stays_unscoped() {
        let job = wrap_blocking(current);
        assert!(std::thread::spawn(job).join().unwrap().is_none());
    }
}
