//! Proctoring snapshots: what triggers them and how captured media is
//! folded into a session entry.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::{SecurityLevel, ViolationKind};

/// Default interval between periodic captures.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Stand-in for screen data at maximum level; the recording pipeline itself
/// lives outside the engine.
pub const SCREEN_PLACEHOLDER: &str = "screen-capture:pending-upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Interval,
    TabSwitch,
    DevTools,
    Manual,
}

impl SnapshotTrigger {
    /// Trigger corresponding to a violation that requested a capture.
    pub fn for_violation(kind: ViolationKind) -> Self {
        match kind {
            ViolationKind::TabSwitch => SnapshotTrigger::TabSwitch,
            ViolationKind::DevTools => SnapshotTrigger::DevTools,
            _ => SnapshotTrigger::Manual,
        }
    }
}

impl fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotTrigger::Interval => write!(f, "interval"),
            SnapshotTrigger::TabSwitch => write!(f, "tab_switch"),
            SnapshotTrigger::DevTools => write!(f, "dev_tools"),
            SnapshotTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// A point-in-time proctoring artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub trigger: SnapshotTrigger,
    /// Encoded webcam frame; absent when the camera is inactive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    /// Whether screen sharing was active (standard and high levels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_flag: Option<bool>,
    /// Screen artifact reference (maximum level).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_data: Option<String>,
}

/// Raw output from the media-capture collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOutput {
    pub frame: Option<String>,
    pub screen_active: bool,
    pub screen_data: Option<String>,
}

/// Interval bookkeeping for periodic captures.
///
/// The runtime asks for [`interval`](Self::interval) each time it arms the
/// next capture, so a changed interval applies from the next cycle on.
#[derive(Debug, Clone)]
pub struct SnapshotScheduler {
    interval: Duration,
    level: SecurityLevel,
}

impl SnapshotScheduler {
    pub fn new(interval: Duration, level: SecurityLevel) -> Self {
        Self { interval, level }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `false` when the interval is unchanged.
    pub fn set_interval(&mut self, interval: Duration) -> bool {
        if interval == self.interval || interval.is_zero() {
            return false;
        }
        self.interval = interval;
        true
    }

    /// Build the session entry for a finished capture.
    pub fn compose(
        &self,
        timestamp: DateTime<Utc>,
        trigger: SnapshotTrigger,
        output: CaptureOutput,
    ) -> Snapshot {
        let (screen_flag, screen_data) = match self.level {
            SecurityLevel::Standard | SecurityLevel::High => (Some(output.screen_active), None),
            SecurityLevel::Maximum => {
                let data = if output.screen_active {
                    Some(
                        output
                            .screen_data
                            .unwrap_or_else(|| SCREEN_PLACEHOLDER.to_string()),
                    )
                } else {
                    None
                };
                (None, data)
            }
        };

        Snapshot {
            timestamp,
            trigger,
            image_data: output.frame,
            screen_flag,
            screen_data,
        }
    }
}

impl Default for SnapshotScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_INTERVAL, SecurityLevel::Standard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_change_is_reported_once() {
        let mut scheduler = SnapshotScheduler::default();
        assert!(scheduler.set_interval(Duration::from_secs(15)));
        assert!(!scheduler.set_interval(Duration::from_secs(15)));
        assert!(!scheduler.set_interval(Duration::ZERO));
        assert_eq!(scheduler.interval(), Duration::from_secs(15));
    }

    #[test]
    fn standard_level_records_screen_flag() {
        let scheduler = SnapshotScheduler::new(DEFAULT_SNAPSHOT_INTERVAL, SecurityLevel::High);
        let snap = scheduler.compose(
            Utc::now(),
            SnapshotTrigger::Interval,
            CaptureOutput {
                frame: None,
                screen_active: true,
                screen_data: Some("ignored".into()),
            },
        );
        assert_eq!(snap.image_data, None);
        assert_eq!(snap.screen_flag, Some(true));
        assert_eq!(snap.screen_data, None);
    }

    #[test]
    fn maximum_level_records_placeholder() {
        let scheduler = SnapshotScheduler::new(DEFAULT_SNAPSHOT_INTERVAL, SecurityLevel::Maximum);
        let snap = scheduler.compose(
            Utc::now(),
            SnapshotTrigger::TabSwitch,
            CaptureOutput {
                frame: Some("data:image/jpeg;base64,AAAA".into()),
                screen_active: true,
                screen_data: None,
            },
        );
        assert!(snap.image_data.is_some());
        assert_eq!(snap.screen_flag, None);
        assert_eq!(snap.screen_data.as_deref(), Some(SCREEN_PLACEHOLDER));
    }

    #[test]
    fn trigger_for_violation() {
        assert_eq!(
            SnapshotTrigger::for_violation(ViolationKind::DevTools),
            SnapshotTrigger::DevTools
        );
        assert_eq!(
            SnapshotTrigger::for_violation(ViolationKind::RightClick),
            SnapshotTrigger::Manual
        );
    }
}
