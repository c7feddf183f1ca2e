//! Overlay surface model and the host windowing seam.
//!
//! This module provides:
//! - The ordered depth ladder used for visibility fallback.
//! - Per-creation surface identity so stale deferred work can be detected.
//! - The mutex-guarded display-to-surface table shared by the lifecycle
//!   manager and the visibility watchdog.
//! - The [`SurfaceBackend`] trait the host windowing layer implements.
//! - Content provider seams binding shared counter/theme state to surfaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::counter::CounterStore;
use crate::display::{DisplayHandle, Region};

/// Stacking level of an overlay surface, most-preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthLevel {
    /// Just above wallpaper icons; receives pointer input.
    DesktopIcon,
    /// Wallpaper level; no pointer input, but guaranteed to render.
    Desktop,
}

impl DepthLevel {
    /// Whether a surface at this depth can receive clicks.
    pub fn accepts_pointer_input(self) -> bool {
        matches!(self, Self::DesktopIcon)
    }
}

/// Escalation order for visibility retries. Indexed by attempt count,
/// clamped to the last entry.
pub const DEPTH_LADDER: [DepthLevel; 2] = [DepthLevel::DesktopIcon, DepthLevel::Desktop];

/// Depth to assign for a given retry attempt.
pub fn depth_for_attempt(attempt: u32) -> DepthLevel {
    let index = (attempt as usize).min(DEPTH_LADDER.len() - 1);
    DEPTH_LADDER[index]
}

/// Identity of one surface *creation*. A recreated surface on the same
/// display gets a fresh id, so deferred checks aimed at the old surface
/// can never touch its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tracked overlay surface. At most one exists per display handle;
/// the mapping is owned exclusively by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    pub id: SurfaceId,
    pub display: DisplayHandle,
    pub region: Region,
    pub depth: DepthLevel,
    /// Failed visibility checks so far (0..=max_retries).
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl OverlaySurface {
    pub fn new(display: DisplayHandle, region: Region) -> Self {
        Self {
            id: SurfaceId::new(),
            display,
            region,
            depth: DEPTH_LADDER[0],
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Creation request handed to the backend. The backend must produce a
/// borderless, non-activating surface that never becomes the foreground
/// window even when clicked, stays visible across workspace switches,
/// renders with a transparent backdrop, and sits below normal application
/// windows but above the wallpaper. Geometry is the display's usable
/// region exactly, never the full display bounds.
#[derive(Debug, Clone)]
pub struct SurfaceSpec {
    pub id: SurfaceId,
    pub display: DisplayHandle,
    pub region: Region,
    pub depth: DepthLevel,
}

impl SurfaceSpec {
    pub fn for_surface(surface: &OverlaySurface) -> Self {
        Self {
            id: surface.id,
            display: surface.display,
            region: surface.region,
            depth: surface.depth,
        }
    }
}

/// Window operations required by the lifecycle manager and watchdog.
///
/// `create` must request an immediate, non-blocking show; whether the
/// surface actually became visible is verified asynchronously by the
/// watchdog via `is_visible`.
pub trait SurfaceBackend: Send + Sync {
    fn create(&self, spec: &SurfaceSpec, provider: Arc<dyn ContentProvider>)
        -> Result<(), String>;
    fn show(&self, id: SurfaceId) -> Result<(), String>;
    fn set_depth(&self, id: SurfaceId, depth: DepthLevel) -> Result<(), String>;
    fn is_visible(&self, id: SurfaceId) -> bool;
    fn close(&self, id: SurfaceId) -> Result<(), String>;
}

/// Opaque renderer bound to a surface. The lifecycle manager owns the
/// binding but never looks inside.
pub trait ContentProvider: Send + Sync {}

/// Builds one content provider per surface per cycle. Every call receives
/// the same shared counter store and theme so all surfaces render
/// identical state.
pub trait ContentProviderFactory: Send + Sync {
    fn build(
        &self,
        counter: Arc<CounterStore>,
        theme: &crate::config::ThemeConfig,
        permission: PermissionState,
    ) -> Arc<dyn ContentProvider>;
}

/// Host permission status passed through to content providers. The
/// prompting flow itself lives outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    NotDetermined,
}

/// Mutex-guarded display-to-surface map shared between the lifecycle
/// manager (sole writer of membership) and the watchdog (updates depth
/// and attempt counts in place).
#[derive(Default)]
pub struct SurfaceTable {
    inner: Mutex<HashMap<DisplayHandle, OverlaySurface>>,
}

impl SurfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, surface: OverlaySurface) {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .insert(surface.display, surface);
    }

    /// Remove and return every tracked surface (teardown).
    pub fn drain(&self) -> Vec<OverlaySurface> {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .drain()
            .map(|(_, surface)| surface)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("surface table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, display: DisplayHandle) -> Option<OverlaySurface> {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .get(&display)
            .cloned()
    }

    pub fn handles(&self) -> Vec<DisplayHandle> {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Snapshot of surface ids for cheap re-show passes.
    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .values()
            .map(|surface| surface.id)
            .collect()
    }

    /// Run `mutate` against the tracked surface for `display`, if any.
    /// Returns the closure's result, or `None` when the display is no
    /// longer tracked.
    pub fn with_surface<T>(
        &self,
        display: DisplayHandle,
        mutate: impl FnOnce(&mut OverlaySurface) -> T,
    ) -> Option<T> {
        self.inner
            .lock()
            .expect("surface table lock poisoned")
            .get_mut(&display)
            .map(mutate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_ladder_starts_at_desktop_icon_and_clamps() {
        assert_eq!(depth_for_attempt(0), DepthLevel::DesktopIcon);
        assert_eq!(depth_for_attempt(1), DepthLevel::Desktop);
        assert_eq!(depth_for_attempt(2), DepthLevel::Desktop);
        assert_eq!(depth_for_attempt(99), DepthLevel::Desktop);
    }

    #[test]
    fn pointer_input_only_at_desktop_icon_depth() {
        assert!(DepthLevel::DesktopIcon.accepts_pointer_input());
        assert!(!DepthLevel::Desktop.accepts_pointer_input());
    }

    #[test]
    fn new_surface_starts_at_preferred_depth_with_zero_attempts() {
        let surface = OverlaySurface::new(DisplayHandle(1), Region::new(0, 25, 1920, 1055));
        assert_eq!(surface.depth, DepthLevel::DesktopIcon);
        assert_eq!(surface.attempts, 0);
    }

    #[test]
    fn recreated_surface_gets_a_fresh_id() {
        let region = Region::new(0, 0, 800, 600);
        let first = OverlaySurface::new(DisplayHandle(1), region);
        let second = OverlaySurface::new(DisplayHandle(1), region);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn table_keeps_one_surface_per_display() {
        let table = SurfaceTable::new();
        let region = Region::new(0, 0, 800, 600);

        table.insert(OverlaySurface::new(DisplayHandle(1), region));
        table.insert(OverlaySurface::new(DisplayHandle(2), region));
        // Re-inserting for a display replaces the previous surface.
        let replacement = OverlaySurface::new(DisplayHandle(1), region);
        let replacement_id = replacement.id;
        table.insert(replacement);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(DisplayHandle(1)).map(|s| s.id), Some(replacement_id));
    }

    #[test]
    fn with_surface_mutates_in_place_and_reports_missing_displays() {
        let table = SurfaceTable::new();
        table.insert(OverlaySurface::new(
            DisplayHandle(1),
            Region::new(0, 0, 800, 600),
        ));

        let attempts = table.with_surface(DisplayHandle(1), |surface| {
            surface.attempts += 1;
            surface.attempts
        });
        assert_eq!(attempts, Some(1));
        assert_eq!(table.get(DisplayHandle(1)).map(|s| s.attempts), Some(1));

        assert!(table
            .with_surface(DisplayHandle(9), |surface| surface.attempts)
            .is_none());
    }

    #[test]
    fn drain_empties_the_table() {
        let table = SurfaceTable::new();
        table.insert(OverlaySurface::new(
            DisplayHandle(1),
            Region::new(0, 0, 800, 600),
        ));
        table.insert(OverlaySurface::new(
            DisplayHandle(2),
            Region::new(800, 0, 800, 600),
        ));

        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
