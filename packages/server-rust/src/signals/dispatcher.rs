//! Keyed write-event dispatcher.
//!
//! A [`Signal`] is a process-wide channel with two kinds of receivers:
//!
//! - request receivers, at most one per [`RegistrationKey`], which only see
//!   events whose origin is their key;
//! - observers, which see every event.
//!
//! Connecting under a key that is already connected replaces the previous
//! receiver. Delivering an event looks up its origin directly, so the cost
//! of a send does not grow with the number of in-flight requests.

use std::sync::{Arc, OnceLock};

use auditlog_core::{RegistrationKey, WriteEvent, WritePhase};
use dashmap::DashMap;

/// Receiver invoked synchronously for events sent on a signal.
pub type WriteHandler = Arc<dyn Fn(&mut WriteEvent<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Boxes a closure as a [`WriteHandler`].
pub fn handler<F>(f: F) -> WriteHandler
where
    F: Fn(&mut WriteEvent<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A named channel of write events.
pub struct Signal {
    name: &'static str,
    receivers: DashMap<RegistrationKey, WriteHandler>,
    observers: DashMap<RegistrationKey, WriteHandler>,
}

impl Signal {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            receivers: DashMap::new(),
            observers: DashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Connects `handler` for events issued under `key`.
    ///
    /// Returns `true` if a receiver already held `key` and was replaced.
    pub fn connect(&self, key: RegistrationKey, handler: WriteHandler) -> bool {
        let replaced = self.receivers.insert(key, handler).is_some();
        if replaced {
            tracing::debug!(signal = self.name, registration = %key, "replaced receiver");
        }
        replaced
    }

    /// Connects `handler` under `key` for every event, whatever its origin.
    ///
    /// Returns `true` if an observer already held `key` and was replaced.
    pub fn observe(&self, key: RegistrationKey, handler: WriteHandler) -> bool {
        self.observers.insert(key, handler).is_some()
    }

    /// Disconnects the receiver or observer held under `key`.
    ///
    /// Returns `false` if nothing was connected under `key`.
    pub fn disconnect(&self, key: RegistrationKey) -> bool {
        let removed =
            self.receivers.remove(&key).is_some() | self.observers.remove(&key).is_some();
        if !removed {
            tracing::trace!(signal = self.name, registration = %key, "disconnect of unknown key");
        }
        removed
    }

    #[must_use]
    pub fn is_connected(&self, key: RegistrationKey) -> bool {
        self.receivers.contains_key(&key) || self.observers.contains_key(&key)
    }

    /// Number of request receivers. Observers are not counted.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Delivers `event` to the receiver connected under its origin, then to
    /// every observer.
    ///
    /// No map guard is held while a handler runs, so a handler may save a
    /// record (and re-enter this signal) or connect and disconnect receivers
    /// without deadlocking.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; later handlers are not called.
    pub fn send(&self, event: &mut WriteEvent<'_>) -> anyhow::Result<()> {
        let routed = event
            .origin
            .and_then(|key| self.receivers.get(&key).map(|entry| Arc::clone(entry.value())));
        if let Some(receiver) = routed {
            receiver(&mut *event)?;
        }

        if self.observers.is_empty() {
            return Ok(());
        }
        let observers: Vec<WriteHandler> = self
            .observers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for observer in observers {
            observer(&mut *event)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("receivers", &self.receivers.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WriteSignals
// ---------------------------------------------------------------------------

/// The pre-write and post-write signal pair emitted around every save.
#[derive(Debug)]
pub struct WriteSignals {
    pub pre_write: Signal,
    pub post_write: Signal,
}

static GLOBAL: OnceLock<Arc<WriteSignals>> = OnceLock::new();

impl WriteSignals {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pre_write: Signal::new("pre_write"),
            post_write: Signal::new("post_write"),
        }
    }

    /// Returns the process-wide signal pair.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    #[must_use]
    pub fn signal(&self, phase: WritePhase) -> &Signal {
        match phase {
            WritePhase::PreWrite => &self.pre_write,
            WritePhase::PostWrite => &self.post_write,
        }
    }

    /// Sends `event` on the signal matching its phase.
    ///
    /// # Errors
    ///
    /// Propagates the first receiver error.
    pub fn send(&self, event: &mut WriteEvent<'_>) -> anyhow::Result<()> {
        self.signal(event.phase).send(event)
    }
}

impl Default for WriteSignals {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
