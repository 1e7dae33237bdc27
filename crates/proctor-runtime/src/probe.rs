//! Window geometry source for the devtools heuristic.

use std::sync::Mutex;

use proctor_core::security::WindowDimensions;

/// Reports the current outer and inner window size.
pub trait WindowProbe: Send + Sync {
    /// `None` when the host cannot measure the window right now.
    fn dimensions(&self) -> Option<WindowDimensions>;
}

/// A probe whose reading is set by hand (tests, scripted replays).
#[derive(Debug, Default)]
pub struct FixedProbe {
    current: Mutex<Option<WindowDimensions>>,
}

impl FixedProbe {
    pub fn new(dimensions: WindowDimensions) -> Self {
        Self {
            current: Mutex::new(Some(dimensions)),
        }
    }

    pub fn set(&self, dimensions: WindowDimensions) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(dimensions);
    }
}

impl WindowProbe for FixedProbe {
    fn dimensions(&self) -> Option<WindowDimensions> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
