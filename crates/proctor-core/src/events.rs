//! Append-only event log.
//!
//! Every state change in a session lands here. Other components communicate
//! through the log: the security monitor appends violations and the
//! escalation policy reads the accumulated counts back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{QuestionId, SubmitReason};
use crate::security::ViolationKind;
use crate::snapshot::SnapshotTrigger;

/// Coarse event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Navigation,
    Answer,
    Focus,
    Activity,
    Security,
    Snapshot,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Navigation => "navigation",
            EventKind::Answer => "answer",
            EventKind::Focus => "focus",
            EventKind::Activity => "activity",
            EventKind::Security => "security",
            EventKind::Snapshot => "snapshot",
        };
        f.write_str(s)
    }
}

/// A single log entry: `{timestamp, kind, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Typed event payload; the serde tag doubles as the event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum EventPayload {
    Navigation {
        from: Option<QuestionId>,
        to: QuestionId,
    },
    Answer {
        question_id: QuestionId,
        revision: u32,
    },
    Focus {
        state: FocusState,
        #[serde(default)]
        away_secs: Option<f64>,
    },
    Activity(ActivityAction),
    Security {
        violation: ViolationKind,
        detail: String,
    },
    Snapshot {
        trigger: SnapshotTrigger,
        has_image: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Navigation { .. } => EventKind::Navigation,
            EventPayload::Answer { .. } => EventKind::Answer,
            EventPayload::Focus { .. } => EventKind::Focus,
            EventPayload::Activity(_) => EventKind::Activity,
            EventPayload::Security { .. } => EventKind::Security,
            EventPayload::Snapshot { .. } => EventKind::Snapshot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusState {
    Lost,
    Returned,
}

/// Lifecycle and bookkeeping actions recorded as `activity` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActivityAction {
    SessionStarted,
    SessionResumed,
    FlagToggled { question_id: QuestionId, flagged: bool },
    Submitted { reason: SubmitReason },
    TimeWarning { remaining_secs: u64 },
    NetworkOffline,
    NetworkOnline,
    MediaUnavailable { device: String, reason: String },
    SnapshotIntervalChanged { secs: u64 },
}

/// A violation entry in the security view of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ViolationKind,
    pub detail: String,
}

/// The event sequence and its security subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
    security_events: Vec<SecurityEvent>,
}

impl EventLog {
    /// Timestamp to use for the next append: never earlier than the last
    /// entry, so insertion order stays chronological even if the wall clock
    /// steps backwards.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.events.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }

    pub(crate) fn append(&mut self, timestamp: DateTime<Utc>, payload: EventPayload) {
        debug_assert!(self.events.last().map_or(true, |e| e.timestamp <= timestamp));
        self.events.push(Event { timestamp, payload });
    }

    /// Append a violation to both the event sequence and the security view.
    pub(crate) fn append_security(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: ViolationKind,
        detail: String,
    ) {
        self.append(
            timestamp,
            EventPayload::Security {
                violation: kind,
                detail: detail.clone(),
            },
        );
        self.security_events.push(SecurityEvent {
            timestamp,
            kind,
            detail,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn security_events(&self) -> &[SecurityEvent] {
        &self.security_events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    /// Cumulative number of violations of one kind.
    pub fn violations(&self, kind: ViolationKind) -> usize {
        self.security_events.iter().filter(|e| e.kind == kind).count()
    }

    /// True when every sequence is non-decreasing in timestamp.
    pub fn is_chronological(&self) -> bool {
        self.events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
            && self
                .security_events
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}
