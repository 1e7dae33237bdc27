//! Integrity-violation detection and escalation policy.
//!
//! The host forwards raw environment signals (visibility changes, clipboard
//! and key events, window geometry) to [`SecurityMonitor::observe`], which
//! classifies them. The [`EscalationPolicy`] then decides, from the counts
//! already appended to the event log, whether a snapshot or a forced
//! submission follows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{ActivityAction, EventLog, FocusState, SecurityEvent};

/// Configured proctoring strictness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    #[default]
    Standard,
    High,
    Maximum,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Standard => write!(f, "standard"),
            SecurityLevel::High => write!(f, "high"),
            SecurityLevel::Maximum => write!(f, "maximum"),
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(SecurityLevel::Standard),
            "high" => Ok(SecurityLevel::High),
            "maximum" | "max" => Ok(SecurityLevel::Maximum),
            other => Err(format!("unknown security level: {other}")),
        }
    }
}

/// Kinds of integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    ClipboardViolation,
    RightClick,
    KeyboardShortcut,
    AltTab,
    DevTools,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::ClipboardViolation => "clipboard_violation",
            ViolationKind::RightClick => "right_click",
            ViolationKind::KeyboardShortcut => "keyboard_shortcut",
            ViolationKind::AltTab => "alt_tab",
            ViolationKind::DevTools => "dev_tools",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
}

/// A key press with its modifier state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyCombo {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.meta {
            f.write_str("Meta+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        if self.key.chars().count() == 1 {
            write!(f, "{}", self.key.to_uppercase())
        } else {
            f.write_str(&self.key)
        }
    }
}

/// Outer vs. inner window size, sampled by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDimensions {
    pub outer_width: u32,
    pub inner_width: u32,
    pub outer_height: u32,
    pub inner_height: u32,
}

impl WindowDimensions {
    /// Largest outer-minus-inner gap across both axes.
    pub fn max_delta(&self) -> u32 {
        let w = self.outer_width.saturating_sub(self.inner_width);
        let h = self.outer_height.saturating_sub(self.inner_height);
        w.max(h)
    }
}

/// Raw signals delivered by the host environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum EnvironmentSignal {
    VisibilityHidden,
    VisibilityVisible,
    WindowBlur,
    WindowFocus,
    Clipboard { action: ClipboardAction },
    ContextMenu,
    Key(KeyCombo),
    WindowDimensions(WindowDimensions),
    NetworkOffline,
    NetworkOnline,
}

/// A classified violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: ViolationKind,
    pub detail: String,
}

/// What a signal means for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Violation(Detection),
    Focus {
        state: FocusState,
        away_secs: Option<f64>,
    },
    Activity(ActivityAction),
    Ignored,
}

/// Result of classifying one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub observation: Observation,
    /// Whether the host must suppress the default action (copy, menu, key).
    pub prevent_default: bool,
}

impl Classified {
    fn violation(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            observation: Observation::Violation(Detection {
                kind,
                detail: detail.into(),
            }),
            prevent_default: true,
        }
    }

    fn passive(observation: Observation) -> Self {
        Self {
            observation,
            prevent_default: false,
        }
    }
}

/// Default outer/inner gap, in pixels, above which docked devtools are assumed.
pub const DEFAULT_DEVTOOLS_THRESHOLD_PX: u32 = 160;

const SHORTCUT_KEYS: &[&str] = &["c", "v", "x", "p", "a", "s", "f"];
const DEVTOOLS_SHIFT_KEYS: &[&str] = &["i", "j", "c"];

/// Stateful classifier for environment signals.
///
/// Holds only detector state (is the page hidden, are devtools believed
/// open); violation counts live in the session's event log.
#[derive(Debug, Clone)]
pub struct SecurityMonitor {
    devtools_threshold_px: u32,
    devtools_open: bool,
    hidden_since: Option<DateTime<Utc>>,
    blurred_since: Option<DateTime<Utc>>,
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_DEVTOOLS_THRESHOLD_PX)
    }
}

impl SecurityMonitor {
    pub fn new(devtools_threshold_px: u32) -> Self {
        Self {
            devtools_threshold_px,
            devtools_open: false,
            hidden_since: None,
            blurred_since: None,
        }
    }

    pub fn devtools_open(&self) -> bool {
        self.devtools_open
    }

    /// Classify a signal observed at `now`.
    pub fn observe(&mut self, signal: &EnvironmentSignal, now: DateTime<Utc>) -> Classified {
        match signal {
            EnvironmentSignal::VisibilityHidden => {
                if self.hidden_since.is_some() {
                    return Classified::passive(Observation::Ignored);
                }
                self.hidden_since = Some(now);
                Classified::violation(ViolationKind::TabSwitch, "exam page hidden")
            }
            EnvironmentSignal::VisibilityVisible => {
                let away_secs = self.hidden_since.take().map(|t| seconds_between(t, now));
                Classified::passive(Observation::Focus {
                    state: FocusState::Returned,
                    away_secs,
                })
            }
            EnvironmentSignal::WindowBlur => {
                if self.blurred_since.is_some() {
                    return Classified::passive(Observation::Ignored);
                }
                self.blurred_since = Some(now);
                Classified::passive(Observation::Focus {
                    state: FocusState::Lost,
                    away_secs: None,
                })
            }
            EnvironmentSignal::WindowFocus => {
                let away_secs = self.blurred_since.take().map(|t| seconds_between(t, now));
                Classified::passive(Observation::Focus {
                    state: FocusState::Returned,
                    away_secs,
                })
            }
            EnvironmentSignal::Clipboard { action } => Classified::violation(
                ViolationKind::ClipboardViolation,
                format!("{action:?} attempt blocked").to_lowercase(),
            ),
            EnvironmentSignal::ContextMenu => {
                Classified::violation(ViolationKind::RightClick, "context menu blocked")
            }
            EnvironmentSignal::Key(combo) => match classify_key(combo) {
                Some(kind) => Classified::violation(kind, format!("{combo} blocked")),
                None => Classified::passive(Observation::Ignored),
            },
            EnvironmentSignal::WindowDimensions(dims) => {
                let delta = dims.max_delta();
                let open = delta > self.devtools_threshold_px;
                let rising = open && !self.devtools_open;
                self.devtools_open = open;
                if rising {
                    Classified {
                        prevent_default: false,
                        ..Classified::violation(
                            ViolationKind::DevTools,
                            format!("window size gap of {delta}px"),
                        )
                    }
                } else {
                    Classified::passive(Observation::Ignored)
                }
            }
            EnvironmentSignal::NetworkOffline => {
                Classified::passive(Observation::Activity(ActivityAction::NetworkOffline))
            }
            EnvironmentSignal::NetworkOnline => {
                Classified::passive(Observation::Activity(ActivityAction::NetworkOnline))
            }
        }
    }
}

/// Match a key combination against the denylist.
pub fn classify_key(combo: &KeyCombo) -> Option<ViolationKind> {
    let key = combo.key.to_lowercase();
    let command = combo.ctrl || combo.meta;

    if key == "f12" {
        return Some(ViolationKind::DevTools);
    }
    if command && combo.shift && DEVTOOLS_SHIFT_KEYS.contains(&key.as_str()) {
        return Some(ViolationKind::DevTools);
    }
    if combo.alt && key == "tab" {
        return Some(ViolationKind::AltTab);
    }
    if command && SHORTCUT_KEYS.contains(&key.as_str()) {
        return Some(ViolationKind::KeyboardShortcut);
    }
    None
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

/// Follow-up actions decided after a violation has been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Escalation {
    pub capture_snapshot: bool,
    pub force_submit: bool,
}

/// Per-level escalation rules.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub level: SecurityLevel,
    /// Cumulative tab switches that trigger escalation.
    pub tab_switch_threshold: usize,
    /// Delay between scheduling and firing a forced submission.
    pub grace: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            level: SecurityLevel::Standard,
            tab_switch_threshold: 3,
            grace: Duration::from_secs(5),
        }
    }
}

impl EscalationPolicy {
    /// Decide what follows a violation of `kind`. `log` must already contain
    /// the violation being evaluated.
    pub fn evaluate(&self, kind: ViolationKind, log: &EventLog) -> Escalation {
        let tab_switches = log.violations(ViolationKind::TabSwitch);
        let over_threshold =
            kind == ViolationKind::TabSwitch && tab_switches >= self.tab_switch_threshold;

        match self.level {
            SecurityLevel::Standard => Escalation::default(),
            SecurityLevel::High => Escalation {
                capture_snapshot: over_threshold || kind == ViolationKind::DevTools,
                force_submit: false,
            },
            SecurityLevel::Maximum => Escalation {
                capture_snapshot: matches!(
                    kind,
                    ViolationKind::TabSwitch | ViolationKind::DevTools
                ),
                force_submit: over_threshold || kind == ViolationKind::DevTools,
            },
        }
    }

    /// Replay a restored log: when a forced submission was due. Lets a
    /// resumed session pick up an escalation scheduled before it closed.
    pub fn forced_submit_due(&self, log: &EventLog) -> Option<DateTime<Utc>> {
        if self.level != SecurityLevel::Maximum {
            return None;
        }
        let grace = chrono::Duration::from_std(self.grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let mut tab_switches = 0;
        log.security_events()
            .iter()
            .find(|event| match event.kind {
                ViolationKind::DevTools => true,
                ViolationKind::TabSwitch => {
                    tab_switches += 1;
                    tab_switches >= self.tab_switch_threshold
                }
                _ => false,
            })
            .map(|event| event.timestamp + grace)
    }
}

/// Violation counts attached to the submission payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub total: usize,
    pub by_kind: BTreeMap<ViolationKind, usize>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

impl SecuritySummary {
    pub fn from_events(events: &[SecurityEvent]) -> Self {
        let mut by_kind = BTreeMap::new();
        for e in events {
            *by_kind.entry(e.kind).or_insert(0) += 1;
        }
        Self {
            total: events.len(),
            by_kind,
            first_at: events.first().map(|e| e.timestamp),
            last_at: events.last().map(|e| e.timestamp),
        }
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}
