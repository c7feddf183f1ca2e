//! Visibility watchdog for overlay surfaces.
//!
//! This module provides:
//! - Delayed post-creation checks that a surface actually rendered
//! - Bounded retries that escalate through the depth ladder
//! - A terminal, non-fatal "failed to become visible" signal
//!
//! Every check is a cancellable task in the shared registry, so a
//! teardown cancels outstanding checks before surfaces disappear. A
//! check also carries the [`SurfaceId`] it was scheduled for; if the
//! display has since been given a new surface, the check is stale and
//! does nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WatchdogSettings;
use crate::display::DisplayHandle;
use crate::surface::{depth_for_attempt, DepthLevel, SurfaceBackend, SurfaceId, SurfaceTable};
use crate::tasks::{TaskKind, TaskRegistry};

/// Delay before each visibility check.
const DEFAULT_CHECK_DELAY: Duration = Duration::from_millis(500);

/// Failed checks before a surface is abandoned at its last depth.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Watchdog configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Delay between creation (or a retry) and the next check.
    pub check_delay: Duration,
    /// Failed checks tolerated before giving up.
    pub max_retries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_delay: DEFAULT_CHECK_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<&WatchdogSettings> for WatchdogConfig {
    fn from(settings: &WatchdogSettings) -> Self {
        Self {
            check_delay: settings.check_delay(),
            max_retries: settings.max_retries,
        }
    }
}

/// Watchdog event emitted to listeners.
#[derive(Debug, Clone)]
pub enum WatchdogEvent {
    /// Surface confirmed visible; no further checks.
    SurfaceVisible {
        display: DisplayHandle,
        attempts: u32,
    },
    /// Surface not visible; depth escalated and another check scheduled.
    SurfaceRetry {
        display: DisplayHandle,
        depth: DepthLevel,
        attempt: u32,
    },
    /// Retries exhausted; surface left at its last-assigned depth.
    SurfaceFailed {
        display: DisplayHandle,
        attempts: u32,
    },
}

enum CheckOutcome {
    Stale,
    Visible { attempts: u32 },
    Retry { depth: DepthLevel, attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Watchdog verifying that created surfaces actually render.
pub struct VisibilityWatchdog {
    backend: Arc<dyn SurfaceBackend>,
    surfaces: Arc<SurfaceTable>,
    registry: Arc<TaskRegistry>,
    config: WatchdogConfig,
    event_tx: broadcast::Sender<WatchdogEvent>,
}

impl VisibilityWatchdog {
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        surfaces: Arc<SurfaceTable>,
        registry: Arc<TaskRegistry>,
        config: WatchdogConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            backend,
            surfaces,
            registry,
            config,
            event_tx,
        }
    }

    /// Subscribe to watchdog events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.event_tx.subscribe()
    }

    /// Schedule a visibility check for `surface_id` on `display` after
    /// the configured delay. Cancelling the underlying task before it
    /// fires is a no-op with no effect.
    pub fn schedule_check(self: &Arc<Self>, display: DisplayHandle, surface_id: SurfaceId) {
        let watchdog = Arc::clone(self);
        self.registry.schedule(
            TaskKind::VisibilityCheck,
            self.config.check_delay,
            Box::new(move || {
                watchdog.run_check(display, surface_id);
            }),
        );
    }

    fn run_check(self: &Arc<Self>, display: DisplayHandle, surface_id: SurfaceId) {
        let outcome = self.evaluate(display, surface_id);

        match outcome {
            CheckOutcome::Stale => {
                log::debug!("Stale visibility check for {display} ignored");
            }
            CheckOutcome::Visible { attempts } => {
                log::debug!("Surface on {display} visible after {attempts} failed checks");
                let _ = self
                    .event_tx
                    .send(WatchdogEvent::SurfaceVisible { display, attempts });
            }
            CheckOutcome::Retry { depth, attempt } => {
                log::warn!(
                    "Surface on {display} not visible (attempt {attempt}), escalating to {depth:?}"
                );
                if let Err(error) = self.backend.set_depth(surface_id, depth) {
                    log::warn!("Depth change failed on {display}: {error}");
                }
                if let Err(error) = self.backend.show(surface_id) {
                    log::warn!("Re-show failed on {display}: {error}");
                }
                let _ = self.event_tx.send(WatchdogEvent::SurfaceRetry {
                    display,
                    depth,
                    attempt,
                });
                self.schedule_check(display, surface_id);
            }
            CheckOutcome::Exhausted { attempts } => {
                log::error!(
                    "Surface on {display} failed to become visible after {attempts} checks; leaving it at its last depth"
                );
                let _ = self
                    .event_tx
                    .send(WatchdogEvent::SurfaceFailed { display, attempts });
            }
        }
    }

    /// Decide what this check means, updating attempt count and depth in
    /// the table. Backend calls happen outside the table lock.
    fn evaluate(&self, display: DisplayHandle, surface_id: SurfaceId) -> CheckOutcome {
        let current = match self.surfaces.get(display) {
            Some(surface) if surface.id == surface_id => surface,
            // Display untracked or surface recreated since scheduling.
            _ => return CheckOutcome::Stale,
        };

        if self.backend.is_visible(surface_id) {
            return CheckOutcome::Visible {
                attempts: current.attempts,
            };
        }

        let max_retries = self.config.max_retries;
        self.surfaces
            .with_surface(display, |surface| {
                if surface.id != surface_id {
                    return CheckOutcome::Stale;
                }
                surface.attempts += 1;
                if surface.attempts >= max_retries {
                    CheckOutcome::Exhausted {
                        attempts: surface.attempts,
                    }
                } else {
                    let depth = depth_for_attempt(surface.attempts);
                    surface.depth = depth;
                    CheckOutcome::Retry {
                        depth,
                        attempt: surface.attempts,
                    }
                }
            })
            .unwrap_or(CheckOutcome::Stale)
    }
}
