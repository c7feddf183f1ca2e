//! Overlay lifecycle orchestration.
//!
//! `surface.rs` owns the surface model and windowing seam.
//! `watchdog.rs` owns visibility verification.
//! `debounce.rs` owns event coalescing.
//! `manager.rs` owns lifecycle policy: the authoritative surface set,
//! serialized teardown/recreate cycles, observer re-arming, and status
//! emission.
//!
//! A recreation cycle is exclusive: a second request arriving while one
//! is in flight is dropped (not queued) with a log entry; the debouncer
//! is the primary mitigation for bursts, and the next external trigger
//! covers the rest. Before any surface is torn down, every pending task
//! is cancelled so no stale visibility check can touch a surface being
//! destroyed or its freshly created successor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::json;

use crate::config::{OverlayConfig, ThemeConfig};
use crate::counter::CounterStore;
use crate::debounce::{DebounceConfig, DebounceKind, EventDebouncer};
use crate::display::DisplayEnumerator;
use crate::events::{payload_with_next_seq, EventSink};
use crate::surface::{
    ContentProviderFactory, OverlaySurface, PermissionState, SurfaceBackend, SurfaceSpec,
    SurfaceTable,
};
use crate::tasks::TaskRegistry;
use crate::watchdog::{VisibilityWatchdog, WatchdogConfig, WatchdogEvent};

const EVENT_OVERLAY_STATUS: &str = "overlay:status";

/// Inbound system notifications, fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventKind {
    /// Display connected, disconnected, or rearranged.
    TopologyChanged,
    /// System woke from sleep.
    Wake,
}

/// Handle for one attached observer.
pub type ObserverId = u64;

/// Host-side system notification registration.
///
/// The manager re-arms its observers on every recreation cycle; `attach`
/// must register the handler for subsequent events of `kind` and
/// `detach` must stop delivery for that registration.
pub trait SystemEventSource: Send + Sync {
    fn attach(&self, kind: SystemEventKind, handler: Arc<dyn Fn() + Send + Sync>) -> ObserverId;
    fn detach(&self, id: ObserverId);
}

/// Result of a recreation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// Cycle ran to completion with this many surfaces created.
    Completed { surfaces: usize },
    /// Another cycle was in flight; this request was dropped.
    AlreadyInFlight,
}

/// Owner of the authoritative overlay surface set.
pub struct OverlayLifecycleManager {
    backend: Arc<dyn SurfaceBackend>,
    enumerator: Arc<dyn DisplayEnumerator>,
    event_source: Arc<dyn SystemEventSource>,
    provider_factory: Arc<dyn ContentProviderFactory>,
    counter: Arc<CounterStore>,
    theme: ThemeConfig,
    permission: Mutex<PermissionState>,

    surfaces: Arc<SurfaceTable>,
    registry: Arc<TaskRegistry>,
    watchdog: Arc<VisibilityWatchdog>,
    debouncer: EventDebouncer,

    in_flight: AtomicBool,
    observers: Mutex<Vec<ObserverId>>,
    sink: Mutex<Option<Arc<dyn EventSink>>>,
}

impl OverlayLifecycleManager {
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        enumerator: Arc<dyn DisplayEnumerator>,
        event_source: Arc<dyn SystemEventSource>,
        provider_factory: Arc<dyn ContentProviderFactory>,
        counter: Arc<CounterStore>,
        config: &OverlayConfig,
    ) -> Arc<Self> {
        let surfaces = Arc::new(SurfaceTable::new());
        let registry = Arc::new(TaskRegistry::new());
        let watchdog = Arc::new(VisibilityWatchdog::new(
            Arc::clone(&backend),
            Arc::clone(&surfaces),
            Arc::clone(&registry),
            WatchdogConfig::from(&config.watchdog),
        ));
        let debouncer = EventDebouncer::new(
            Arc::clone(&registry),
            DebounceConfig::from(&config.debounce),
        );

        Arc::new(Self {
            backend,
            enumerator,
            event_source,
            provider_factory,
            counter,
            theme: config.theme.clone(),
            permission: Mutex::new(PermissionState::NotDetermined),
            surfaces,
            registry,
            watchdog,
            debouncer,
            in_flight: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        })
    }

    /// Forward emitted status payloads to the host UI layer.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock().expect("sink lock poisoned") = Some(sink);
    }

    /// Update the permission state threaded into new content providers.
    pub fn set_permission_state(&self, state: PermissionState) {
        *self.permission.lock().expect("permission lock poisoned") = state;
    }

    /// Number of currently tracked surfaces.
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Snapshot of tracked display handles.
    pub fn tracked_displays(&self) -> Vec<crate::display::DisplayHandle> {
        self.surfaces.handles()
    }

    /// Subscribe to visibility watchdog events.
    pub fn subscribe_watchdog(&self) -> tokio::sync::broadcast::Receiver<WatchdogEvent> {
        self.watchdog.subscribe()
    }

    /// Tear down every surface and rebuild one per currently attached
    /// display.
    ///
    /// Exclusive: overlapping requests are dropped, never queued. The
    /// in-flight flag clears only after observers are re-armed, so a
    /// request accepted later always sees a consistent observer set.
    pub async fn recreate_all(self: &Arc<Self>) -> RecreateOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("Recreation already in flight; request dropped");
            return RecreateOutcome::AlreadyInFlight;
        }

        let cancelled = self.registry.cancel_all();
        self.debouncer.reset();
        if cancelled > 0 {
            log::debug!("Cancelled {cancelled} pending tasks before teardown");
        }

        self.detach_observers();
        let closed = self.close_surfaces();
        if closed > 0 {
            log::info!("Closed {closed} surfaces for recreation");
        }

        let displays = self.enumerator.list_displays();
        if displays.is_empty() {
            // Transient during topology changes; the next topology event
            // recovers.
            log::warn!("Zero displays enumerated; no surfaces created");
        }

        let mut created = 0usize;
        for display in &displays {
            if display.usable_region.is_empty() {
                log::warn!("Display {} has no usable region, skipped", display.handle);
                continue;
            }

            let permission = *self.permission.lock().expect("permission lock poisoned");
            let provider =
                self.provider_factory
                    .build(Arc::clone(&self.counter), &self.theme, permission);

            let surface = OverlaySurface::new(display.handle, display.usable_region);
            let spec = SurfaceSpec::for_surface(&surface);
            match self.backend.create(&spec, provider) {
                Ok(()) => {
                    let id = surface.id;
                    self.surfaces.insert(surface);
                    self.watchdog.schedule_check(display.handle, id);
                    created += 1;
                }
                Err(error) => {
                    // Likely a mid-cycle disconnect; the resulting
                    // topology event triggers the corrective cycle.
                    log::warn!(
                        "Surface creation failed on {}, skipped for this cycle: {error}",
                        display.handle
                    );
                }
            }
        }

        self.attach_observers();
        self.emit_status(None);
        self.in_flight.store(false, Ordering::SeqCst);

        log::info!(
            "Recreation cycle complete: {created} surfaces for {} displays",
            displays.len()
        );
        RecreateOutcome::Completed { surfaces: created }
    }

    /// Re-issue the show request for every tracked surface. The cheap
    /// wake-from-sleep re-assertion; no teardown.
    pub fn reshow_all(&self) {
        let ids = self.surfaces.surface_ids();
        log::info!("Re-showing {} surfaces after wake", ids.len());
        for id in ids {
            if let Err(error) = self.backend.show(id) {
                log::warn!("Re-show failed for surface {id}: {error}");
            }
        }
        self.emit_status(Some("surfaces re-shown"));
    }

    /// Inbound system notification entry point. The host's event layer
    /// calls this; the debouncer decides whether anything happens.
    pub fn handle_system_event(self: &Arc<Self>, kind: SystemEventKind) {
        match kind {
            SystemEventKind::TopologyChanged => {
                let weak = Arc::downgrade(self);
                self.debouncer.notify(
                    DebounceKind::Topology,
                    Box::new(move || {
                        if let Some(manager) = weak.upgrade() {
                            tokio::spawn(async move {
                                manager.recreate_all().await;
                            });
                        }
                    }),
                );
            }
            SystemEventKind::Wake => {
                let weak = Arc::downgrade(self);
                self.debouncer.notify(
                    DebounceKind::Wake,
                    Box::new(move || {
                        if let Some(manager) = weak.upgrade() {
                            manager.reshow_all();
                        }
                    }),
                );
            }
        }
    }

    /// Cancel all pending work, detach observers, and close every
    /// surface. Idempotent; must be the last call before process exit.
    pub fn close_all(&self) {
        let cancelled = self.registry.cancel_all();
        self.debouncer.reset();
        self.detach_observers();
        let closed = self.close_surfaces();
        log::info!("Shutdown: cancelled {cancelled} tasks, closed {closed} surfaces");
        self.emit_status(Some("overlays closed"));
    }

    fn close_surfaces(&self) -> usize {
        let drained = self.surfaces.drain();
        let count = drained.len();
        for surface in drained {
            if let Err(error) = self.backend.close(surface.id) {
                log::warn!("Close failed for surface on {}: {error}", surface.display);
            }
        }
        count
    }

    /// Attach exactly one observer per event kind. Always detaches
    /// first, so repeated cycles can never accumulate registrations.
    fn attach_observers(self: &Arc<Self>) {
        self.detach_observers();

        let mut observers = self.observers.lock().expect("observer lock poisoned");
        for kind in [SystemEventKind::TopologyChanged, SystemEventKind::Wake] {
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = self.event_source.attach(
                kind,
                Arc::new(move || {
                    if let Some(manager) = weak.upgrade() {
                        manager.handle_system_event(kind);
                    }
                }),
            );
            observers.push(id);
        }
    }

    fn detach_observers(&self) {
        let ids: Vec<ObserverId> = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .drain(..)
            .collect();
        for id in ids {
            self.event_source.detach(id);
        }
    }

    fn emit_status(&self, message: Option<&str>) {
        let mut payload = json!({
            "surfaces": self.surfaces.len(),
            "pending_tasks": self.registry.pending_count(),
        });

        if let Some(message) = message.map(str::trim).filter(|value| !value.is_empty()) {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("message".to_string(), json!(message));
            }
        }

        let payload = payload_with_next_seq(payload);
        let sink = self.sink.lock().expect("sink lock poisoned").clone();
        if let Some(sink) = sink {
            sink.emit(EVENT_OVERLAY_STATUS, payload);
        }
    }
}

impl Drop for OverlayLifecycleManager {
    fn drop(&mut self) {
        // Outstanding deferred work must not outlive the manager.
        self.registry.cancel_all();
    }
}
