//! Display model and enumeration seam.
//!
//! Displays are owned by the host windowing system; this crate only reads
//! their geometry. The attached set can change at any time (hot-plug), so
//! every recreation cycle re-enumerates from scratch instead of caching.

use serde::{Deserialize, Serialize};

/// Stable platform handle identifying a connected display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayHandle(pub u64);

impl std::fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// A display's usable region in physical pixels: origin plus size,
/// excluding system-reserved chrome such as menu bars and taskbars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the region has any renderable area at all.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A currently attached display as reported by the enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub handle: DisplayHandle,
    pub usable_region: Region,
}

/// Host-side display enumeration.
///
/// Called at the start of every recreation cycle. An empty result is a
/// valid (if degenerate) answer during topology transitions.
pub trait DisplayEnumerator: Send + Sync {
    fn list_displays(&self) -> Vec<DisplayInfo>;
}
