//! Desktally - desktop overlay lifecycle library
//!
//! Maintains one borderless, non-activating overlay surface per connected
//! display, pinned at desktop-icon depth, all rendering the same
//! persisted tally counter. The host shell supplies the windowing
//! backend, display enumeration, content rendering, and system
//! notification delivery through the trait seams in this crate; the
//! crate owns the lifecycle policy: debounced reaction to topology and
//! wake events, serialized teardown/recreate cycles, visibility
//! verification with bounded depth fallback, and cancellation of stale
//! deferred work.

pub mod config;
pub mod counter;
pub mod debounce;
pub mod display;
pub mod events;
pub mod manager;
pub mod surface;
pub mod tasks;
pub mod watchdog;

pub use config::{load_config, save_config, OverlayConfig, ThemeConfig};
pub use counter::{CounterError, CounterEvent, CounterStore};
pub use debounce::{DebounceConfig, DebounceKind, EventDebouncer};
pub use display::{DisplayEnumerator, DisplayHandle, DisplayInfo, Region};
pub use events::EventSink;
pub use manager::{
    ObserverId, OverlayLifecycleManager, RecreateOutcome, SystemEventKind, SystemEventSource,
};
pub use surface::{
    ContentProvider, ContentProviderFactory, DepthLevel, OverlaySurface, PermissionState,
    SurfaceBackend, SurfaceId, SurfaceSpec,
};
pub use tasks::{TaskId, TaskKind, TaskRegistry};
pub use watchdog::{VisibilityWatchdog, WatchdogConfig, WatchdogEvent};

/// Initialize logging for hosts that have no logger of their own.
///
/// Respects `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
