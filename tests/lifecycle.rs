//! End-to-end overlay lifecycle scenarios against mock host seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use desktally::{
    ContentProvider, ContentProviderFactory, CounterStore, DepthLevel, DisplayEnumerator,
    DisplayHandle, DisplayInfo, ObserverId, OverlayConfig, OverlayLifecycleManager,
    PermissionState, RecreateOutcome, Region, SurfaceBackend, SurfaceId, SurfaceSpec,
    SystemEventKind, SystemEventSource, ThemeConfig, WatchdogEvent,
};

struct NullProvider;
impl ContentProvider for NullProvider {}

struct NullFactory;
impl ContentProviderFactory for NullFactory {
    fn build(
        &self,
        _counter: Arc<CounterStore>,
        _theme: &ThemeConfig,
        _permission: PermissionState,
    ) -> Arc<dyn ContentProvider> {
        Arc::new(NullProvider)
    }
}

/// Scriptable windowing backend recording every operation.
#[derive(Default)]
struct ScriptedBackend {
    /// Per-display: failed visibility checks before reporting visible.
    fail_checks: Mutex<HashMap<DisplayHandle, u32>>,
    remaining: Mutex<HashMap<SurfaceId, u32>>,
    depths: Mutex<HashMap<SurfaceId, DepthLevel>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn fail_visibility_checks(&self, display: DisplayHandle, checks: u32) {
        self.fail_checks
            .lock()
            .expect("fail checks lock")
            .insert(display, checks);
    }

    fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|entry| entry.as_str() == operation)
            .count()
    }

    fn record(&self, operation: &str) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(operation.to_string());
    }

    fn depth_of(&self, id: SurfaceId) -> Option<DepthLevel> {
        self.depths.lock().expect("depths lock").get(&id).copied()
    }
}

impl SurfaceBackend for ScriptedBackend {
    fn create(&self, spec: &SurfaceSpec, _provider: Arc<dyn ContentProvider>) -> Result<(), String> {
        self.record("create");
        let budget = self
            .fail_checks
            .lock()
            .expect("fail checks lock")
            .get(&spec.display)
            .copied()
            .unwrap_or(0);
        self.remaining
            .lock()
            .expect("remaining lock")
            .insert(spec.id, budget);
        self.depths
            .lock()
            .expect("depths lock")
            .insert(spec.id, spec.depth);
        Ok(())
    }

    fn show(&self, _id: SurfaceId) -> Result<(), String> {
        self.record("show");
        Ok(())
    }

    fn set_depth(&self, id: SurfaceId, depth: DepthLevel) -> Result<(), String> {
        self.record("set_depth");
        self.depths.lock().expect("depths lock").insert(id, depth);
        Ok(())
    }

    fn is_visible(&self, id: SurfaceId) -> bool {
        self.record("is_visible");
        let mut remaining = self.remaining.lock().expect("remaining lock");
        match remaining.get_mut(&id) {
            None => true,
            Some(budget) if *budget == 0 => true,
            Some(budget) => {
                *budget = budget.saturating_sub(1);
                false
            }
        }
    }

    fn close(&self, _id: SurfaceId) -> Result<(), String> {
        self.record("close");
        Ok(())
    }
}

struct StaticEnumerator {
    displays: Vec<DisplayInfo>,
}

impl DisplayEnumerator for StaticEnumerator {
    fn list_displays(&self) -> Vec<DisplayInfo> {
        self.displays.clone()
    }
}

#[derive(Default)]
struct RecordingSource {
    next_id: AtomicU64,
    active: Mutex<HashMap<ObserverId, SystemEventKind>>,
}

impl SystemEventSource for RecordingSource {
    fn attach(&self, kind: SystemEventKind, _handler: Arc<dyn Fn() + Send + Sync>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().expect("active lock").insert(id, kind);
        id
    }

    fn detach(&self, id: ObserverId) {
        self.active.lock().expect("active lock").remove(&id);
    }
}

fn displays(handles: &[u64]) -> Vec<DisplayInfo> {
    handles
        .iter()
        .map(|handle| DisplayInfo {
            handle: DisplayHandle(*handle),
            usable_region: Region::new(0, 25, 1920, 1055),
        })
        .collect()
}

fn fast_config() -> OverlayConfig {
    let mut config = OverlayConfig::default();
    config.watchdog.check_delay_ms = 50;
    config.debounce.topology_cooldown_ms = 200;
    config.debounce.topology_delay_ms = 50;
    config.debounce.wake_cooldown_ms = 200;
    config.debounce.wake_delay_ms = 50;
    config
}

struct Harness {
    manager: Arc<OverlayLifecycleManager>,
    backend: Arc<ScriptedBackend>,
    _counter_dir: TempDir,
}

fn harness(backend: ScriptedBackend, display_handles: &[u64]) -> Harness {
    let counter_dir = TempDir::new().expect("tempdir");
    let backend = Arc::new(backend);
    let manager = OverlayLifecycleManager::new(
        Arc::clone(&backend) as Arc<dyn SurfaceBackend>,
        Arc::new(StaticEnumerator {
            displays: displays(display_handles),
        }),
        Arc::new(RecordingSource::default()),
        Arc::new(NullFactory),
        Arc::new(CounterStore::open(counter_dir.path())),
        &fast_config(),
    );
    Harness {
        manager,
        backend,
        _counter_dir: counter_dir,
    }
}

#[tokio::test]
async fn two_displays_visible_on_first_check_need_no_retries() {
    let harness = harness(ScriptedBackend::default(), &[1, 2]);
    let mut events = harness.manager.subscribe_watchdog();

    let outcome = harness.manager.recreate_all().await;
    assert_eq!(outcome, RecreateOutcome::Completed { surfaces: 2 });
    assert_eq!(harness.manager.surface_count(), 2);

    // Let both visibility checks fire.
    tokio::time::sleep(Duration::from_millis(120)).await;

    let mut visible = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            WatchdogEvent::SurfaceVisible { attempts, .. } => {
                assert_eq!(attempts, 0);
                visible += 1;
            }
            other => panic!("No retries expected, got {other:?}"),
        }
    }
    assert_eq!(visible, 2);
    assert_eq!(harness.backend.call_count("set_depth"), 0);
    assert_eq!(harness.manager.surface_count(), 2);
}

#[tokio::test]
async fn surface_stabilizes_at_fallback_depth_after_two_failed_checks() {
    let backend = ScriptedBackend::default();
    backend.fail_visibility_checks(DisplayHandle(1), 2);
    let harness = harness(backend, &[1]);
    let mut events = harness.manager.subscribe_watchdog();

    harness.manager.recreate_all().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut retries = Vec::new();
    let mut visible_at = None;
    while let Ok(event) = events.try_recv() {
        match event {
            WatchdogEvent::SurfaceRetry { depth, attempt, .. } => retries.push((depth, attempt)),
            WatchdogEvent::SurfaceVisible { attempts, .. } => visible_at = Some(attempts),
            WatchdogEvent::SurfaceFailed { .. } => panic!("Surface should stabilize, not fail"),
        }
    }

    assert_eq!(
        retries,
        vec![(DepthLevel::Desktop, 1), (DepthLevel::Desktop, 2)]
    );
    assert_eq!(visible_at, Some(2));

    let tracked = harness.manager.tracked_displays();
    assert_eq!(tracked, vec![DisplayHandle(1)]);

    // No further checks after stabilization: call counts stay put.
    let checks = harness.backend.call_count("is_visible");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.backend.call_count("is_visible"), checks);
}

#[tokio::test]
async fn never_visible_surface_is_abandoned_after_bounded_retries() {
    let backend = ScriptedBackend::default();
    backend.fail_visibility_checks(DisplayHandle(1), u32::MAX);
    let harness = harness(backend, &[1]);
    let mut events = harness.manager.subscribe_watchdog();

    harness.manager.recreate_all().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut failed_at = None;
    while let Ok(event) = events.try_recv() {
        if let WatchdogEvent::SurfaceFailed { attempts, .. } = event {
            failed_at = Some(attempts);
        }
    }
    assert_eq!(failed_at, Some(3));

    // Degraded but still tracked, process still running.
    assert_eq!(harness.manager.surface_count(), 1);
    assert_eq!(harness.backend.call_count("is_visible"), 3);
}

#[tokio::test]
async fn rapid_wake_burst_reshows_at_most_once() {
    let harness = harness(ScriptedBackend::default(), &[1, 2, 3]);
    harness.manager.recreate_all().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let shows_before = harness.backend.call_count("show");

    for _ in 0..3 {
        harness.manager.handle_system_event(SystemEventKind::Wake);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    // One debounced re-show pass over three surfaces, no teardown.
    assert_eq!(harness.backend.call_count("show"), shows_before + 3);
    assert_eq!(harness.backend.call_count("close"), 0);
    assert_eq!(harness.manager.surface_count(), 3);
}

#[tokio::test]
async fn close_all_cancels_outstanding_visibility_checks() {
    let backend = ScriptedBackend::default();
    for handle in 1..=5 {
        backend.fail_visibility_checks(DisplayHandle(handle), u32::MAX);
    }
    let harness = harness(backend, &[1, 2, 3, 4, 5]);

    harness.manager.recreate_all().await;
    // Five checks pending; none has fired yet.
    harness.manager.close_all();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.backend.call_count("is_visible"), 0);
    assert_eq!(harness.backend.call_count("close"), 5);
    assert_eq!(harness.manager.surface_count(), 0);
}

#[tokio::test]
async fn topology_burst_then_wake_keeps_kinds_independent() {
    let harness = harness(ScriptedBackend::default(), &[1]);
    harness.manager.recreate_all().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let creates_before = harness.backend.call_count("create");
    let shows_before = harness.backend.call_count("show");

    harness.manager.handle_system_event(SystemEventKind::Wake);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(harness.backend.call_count("show"), shows_before + 1);

    harness
        .manager
        .handle_system_event(SystemEventKind::TopologyChanged);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Both debounced actions ran: one re-show pass, then one recreation.
    assert_eq!(harness.backend.call_count("create"), creates_before + 1);
    assert_eq!(harness.manager.surface_count(), 1);
}
