//! Debouncing for bursty system notifications.
//!
//! Topology-change and wake-from-sleep notifications arrive in rapid
//! bursts (one physical event often produces several). Without
//! coalescing, each would trigger a full surface teardown/recreate and
//! visible flicker. Each event kind gets its own cooldown window and its
//! own delay before the downstream action fires.
//!
//! Per kind, on `notify`:
//! - Inside the cooldown window of the last accepted event: the
//!   occurrence is ignored entirely.
//! - Otherwise: record now as last-accepted, cancel any pending task for
//!   the kind, and schedule the action after the kind's delay.
//!
//! A replaced pending action never executes late, so at most one
//! downstream action fires per kind per cooldown window.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::DebounceSettings;
use crate::tasks::{TaskEffect, TaskId, TaskKind, TaskRegistry};

/// Debounced system event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceKind {
    /// Display topology changed (connect/disconnect/rearrange).
    Topology,
    /// System woke from sleep.
    Wake,
}

impl DebounceKind {
    fn task_kind(self) -> TaskKind {
        match self {
            Self::Topology => TaskKind::TopologyDebounce,
            Self::Wake => TaskKind::WakeDebounce,
        }
    }
}

/// Cooldown and downstream-delay configuration.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub topology_cooldown: Duration,
    pub topology_delay: Duration,
    pub wake_cooldown: Duration,
    pub wake_delay: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            topology_cooldown: Duration::from_millis(1_000),
            topology_delay: Duration::from_millis(500),
            wake_cooldown: Duration::from_millis(500),
            wake_delay: Duration::from_millis(300),
        }
    }
}

impl From<&DebounceSettings> for DebounceConfig {
    fn from(settings: &DebounceSettings) -> Self {
        Self {
            topology_cooldown: settings.topology_cooldown(),
            topology_delay: settings.topology_delay(),
            wake_cooldown: settings.wake_cooldown(),
            wake_delay: settings.wake_delay(),
        }
    }
}

impl DebounceConfig {
    fn cooldown(&self, kind: DebounceKind) -> Duration {
        match kind {
            DebounceKind::Topology => self.topology_cooldown,
            DebounceKind::Wake => self.wake_cooldown,
        }
    }

    fn delay(&self, kind: DebounceKind) -> Duration {
        match kind {
            DebounceKind::Topology => self.topology_delay,
            DebounceKind::Wake => self.wake_delay,
        }
    }
}

#[derive(Debug, Default)]
struct KindState {
    last_accepted: Option<Instant>,
    pending: Option<TaskId>,
}

/// Coalesces bursts of system notifications into one downstream action
/// per kind per cooldown window.
pub struct EventDebouncer {
    registry: Arc<TaskRegistry>,
    config: DebounceConfig,
    topology: Mutex<KindState>,
    wake: Mutex<KindState>,
}

impl EventDebouncer {
    pub fn new(registry: Arc<TaskRegistry>, config: DebounceConfig) -> Self {
        Self {
            registry,
            config,
            topology: Mutex::new(KindState::default()),
            wake: Mutex::new(KindState::default()),
        }
    }

    /// Report one occurrence of `kind`. Returns whether it was accepted;
    /// an ignored occurrence schedules nothing and mutates nothing.
    pub fn notify(&self, kind: DebounceKind, action: TaskEffect) -> bool {
        let now = Instant::now();
        let mut state = self.kind_state(kind).lock().expect("debounce lock poisoned");

        if let Some(last) = state.last_accepted {
            if now.duration_since(last) < self.config.cooldown(kind) {
                log::debug!("{kind:?} event inside cooldown window, ignored");
                return false;
            }
        }

        state.last_accepted = Some(now);
        if let Some(previous) = state.pending.take() {
            self.registry.cancel(previous);
        }
        let id = self
            .registry
            .schedule(kind.task_kind(), self.config.delay(kind), action);
        state.pending = Some(id);
        log::debug!("{kind:?} event accepted, action scheduled");
        true
    }

    /// Forget any tracked pending task (the registry owner has already
    /// cancelled it).
    pub fn reset(&self) {
        self.topology
            .lock()
            .expect("debounce lock poisoned")
            .pending = None;
        self.wake.lock().expect("debounce lock poisoned").pending = None;
    }

    fn kind_state(&self, kind: DebounceKind) -> &Mutex<KindState> {
        match kind {
            DebounceKind::Topology => &self.topology,
            DebounceKind::Wake => &self.wake,
        }
    }
}
