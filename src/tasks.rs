//! Cancellable deferred-work registry.
//!
//! Every piece of deferred work in the crate (visibility checks, retries,
//! debounced event handlers) is scheduled through one registry instance so
//! a full teardown can cancel all of it at once. A task that has been
//! cancelled never executes its effect, even if its deadline later
//! elapses: cancellation both flips the task's flag and aborts the
//! underlying tokio task, and the flag is re-checked after the sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

/// Category of deferred work, used for kind-scoped cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Post-creation visibility check or retry.
    VisibilityCheck,
    /// Debounced display-topology handler.
    TopologyDebounce,
    /// Debounced wake-from-sleep handler.
    WakeDebounce,
}

/// Registry-assigned task identifier.
pub type TaskId = u64;

/// Effect executed when a task fires.
pub type TaskEffect = Box<dyn FnOnce() + Send + 'static>;

struct TaskEntry {
    kind: TaskKind,
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

/// Registry of outstanding deferred work.
#[derive(Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Schedule `effect` to run after `delay`.
    ///
    /// Must be called from within a tokio runtime. The entry removes
    /// itself before the effect runs, so an effect may schedule follow-up
    /// work through the same registry.
    pub fn schedule(self: &Arc<Self>, kind: TaskKind, delay: Duration, effect: TaskEffect) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));

        let registry = Arc::clone(self);
        let flag = Arc::clone(&cancelled);

        // Hold the lock across spawn+insert so a zero-delay task cannot
        // observe the registry before its own entry exists.
        let mut entries = self.entries.lock().expect("task registry lock poisoned");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let armed = !flag.load(Ordering::SeqCst);
            registry.remove(id);
            if armed {
                effect();
            }
        });
        entries.insert(
            id,
            TaskEntry {
                kind,
                cancelled,
                abort: handle.abort_handle(),
            },
        );
        id
    }

    /// Cancel one task. Cancelling an already-fired or unknown id is a
    /// no-op.
    pub fn cancel(&self, id: TaskId) {
        let entry = self
            .entries
            .lock()
            .expect("task registry lock poisoned")
            .remove(&id);
        if let Some(entry) = entry {
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.abort.abort();
        }
    }

    /// Cancel every outstanding task of one kind. Returns how many were
    /// cancelled.
    pub fn cancel_kind(&self, kind: TaskKind) -> usize {
        let mut entries = self.entries.lock().expect("task registry lock poisoned");
        let ids: Vec<TaskId> = entries
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(entry) = entries.remove(id) {
                entry.cancelled.store(true, Ordering::SeqCst);
                entry.abort.abort();
            }
        }
        ids.len()
    }

    /// Cancel every outstanding task. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock().expect("task registry lock poisoned");
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.abort.abort();
        }
        count
    }

    /// Number of tasks still pending.
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .expect("task registry lock poisoned")
            .len()
    }

    fn remove(&self, id: TaskId) {
        self.entries
            .lock()
            .expect("task registry lock poisoned")
            .remove(&id);
    }
}
