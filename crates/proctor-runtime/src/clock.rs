//! Wall clock derived from the tokio timer.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use proctor_core::clock::Clock;

/// A [`Clock`] that advances with `tokio::time`, so a paused test runtime
/// moves session timestamps and timer deadlines together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_wall: DateTime<Utc>,
    base_instant: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(base_wall: DateTime<Utc>) -> Self {
        Self {
            base_wall,
            base_instant: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.base_instant.elapsed();
        self.base_wall
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
