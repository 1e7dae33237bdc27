//! The session aggregate: everything recorded for one exam attempt.
//!
//! Fields are private. Reads go through accessors; writes are crate-private
//! and only the [`SessionController`](crate::controller::SessionController)
//! calls them, so no caller can replace or reorder a recorded sequence.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answers::{AnswerRecord, AnswerStore};
use crate::events::{ActivityAction, Event, EventLog, EventPayload, SecurityEvent};
use crate::model::{AnswerValue, QuestionId, SubmitReason};
use crate::snapshot::Snapshot;

/// Terminal marker set on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub reason: SubmitReason,
    pub submitted_at: DateTime<Utc>,
}

/// One exam attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: Uuid,
    exam_target: String,
    started_at: DateTime<Utc>,
    #[serde(default)]
    last_saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_secs: u64,
    #[serde(default)]
    elapsed_secs: u64,
    #[serde(flatten)]
    answers: AnswerStore,
    #[serde(flatten)]
    log: EventLog,
    #[serde(default)]
    snapshots: Vec<Snapshot>,
    #[serde(default)]
    time_spent_per_question: BTreeMap<QuestionId, f64>,
    #[serde(default)]
    flagged: BTreeSet<QuestionId>,
    #[serde(default)]
    current_question: Option<QuestionId>,
    #[serde(default)]
    submission: Option<Submission>,
}

impl Session {
    pub(crate) fn new(exam_target: &str, duration_secs: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_target: exam_target.to_string(),
            started_at,
            last_saved_at: None,
            duration_secs,
            elapsed_secs: 0,
            answers: AnswerStore::default(),
            log: EventLog::default(),
            snapshots: Vec::new(),
            time_spent_per_question: BTreeMap::new(),
            flagged: BTreeSet::new(),
            current_question: None,
            submission: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn exam_target(&self) -> &str {
        &self.exam_target
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    /// Seconds left on the countdown; `None` for untimed sessions.
    pub fn remaining_secs(&self) -> Option<u64> {
        (self.duration_secs > 0).then(|| self.duration_secs.saturating_sub(self.elapsed_secs))
    }

    pub fn answers(&self) -> &BTreeMap<QuestionId, AnswerValue> {
        self.answers.current()
    }

    pub fn answer_store(&self) -> &AnswerStore {
        &self.answers
    }

    pub fn answer_history(&self) -> &[AnswerRecord] {
        self.answers.history()
    }

    pub fn events(&self) -> &[Event] {
        self.log.events()
    }

    pub fn security_events(&self) -> &[SecurityEvent] {
        self.log.security_events()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn time_spent_per_question(&self) -> &BTreeMap<QuestionId, f64> {
        &self.time_spent_per_question
    }

    pub fn flagged(&self) -> &BTreeSet<QuestionId> {
        &self.flagged
    }

    pub fn is_flagged(&self, question_id: &str) -> bool {
        self.flagged.contains(question_id)
    }

    pub fn current_question(&self) -> Option<&str> {
        self.current_question.as_deref()
    }

    pub fn submission(&self) -> Option<&Submission> {
        self.submission.as_ref()
    }

    pub fn is_submitted(&self) -> bool {
        self.submission.is_some()
    }

    /// Serialize to the persisted JSON layout.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    // --- crate-private mutation, driven by the controller ---

    /// Timestamp for the next mutation (never earlier than the last event).
    pub(crate) fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.log.next_timestamp(now)
    }

    pub(crate) fn append(&mut self, at: DateTime<Utc>, payload: EventPayload) {
        self.log.append(at, payload);
    }

    pub(crate) fn log_mut(&mut self) -> &mut EventLog {
        &mut self.log
    }

    pub(crate) fn record_answer(
        &mut self,
        question_id: &str,
        value: AnswerValue,
        at: DateTime<Utc>,
    ) -> u32 {
        let revision = self.answers.record(question_id, value, at);
        self.log.append(
            at,
            EventPayload::Answer {
                question_id: question_id.to_string(),
                revision,
            },
        );
        revision
    }

    pub(crate) fn add_time(&mut self, question_id: &str, secs: f64) {
        if secs <= 0.0 {
            return;
        }
        *self
            .time_spent_per_question
            .entry(question_id.to_string())
            .or_insert(0.0) += secs;
    }

    pub(crate) fn set_current_question(&mut self, question_id: Option<QuestionId>) {
        self.current_question = question_id;
    }

    /// Flip membership; returns the new state.
    pub(crate) fn toggle_flag(&mut self, question_id: &str, at: DateTime<Utc>) -> bool {
        let flagged = if self.flagged.remove(question_id) {
            false
        } else {
            self.flagged.insert(question_id.to_string());
            true
        };
        self.log.append(
            at,
            EventPayload::Activity(ActivityAction::FlagToggled {
                question_id: question_id.to_string(),
                flagged,
            }),
        );
        flagged
    }

    pub(crate) fn push_snapshot(&mut self, snapshot: Snapshot) {
        self.log.append(
            snapshot.timestamp,
            EventPayload::Snapshot {
                trigger: snapshot.trigger,
                has_image: snapshot.image_data.is_some(),
            },
        );
        self.snapshots.push(snapshot);
    }

    /// Advance the countdown by one second; returns the new elapsed total.
    pub(crate) fn tick(&mut self) -> u64 {
        self.elapsed_secs = self.elapsed_secs.saturating_add(1);
        self.elapsed_secs
    }

    pub(crate) fn set_last_saved_at(&mut self, at: Option<DateTime<Utc>>) {
        self.last_saved_at = at;
    }

    pub(crate) fn mark_submitted(&mut self, reason: SubmitReason, at: DateTime<Utc>) {
        self.log.append(
            at,
            EventPayload::Activity(ActivityAction::Submitted { reason }),
        );
        self.submission = Some(Submission {
            reason,
            submitted_at: at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::snapshot::SnapshotTrigger;

    #[test]
    fn new_session_is_empty() {
        let session = Session::new("exam-1", 600, Utc::now());
        assert!(session.answers().is_empty());
        assert!(session.events().is_empty());
        assert_eq!(session.remaining_secs(), Some(600));
        assert!(!session.is_submitted());
    }

    #[test]
    fn untimed_session_has_no_remaining() {
        let session = Session::new("exam-1", 0, Utc::now());
        assert_eq!(session.remaining_secs(), None);
    }

    #[test]
    fn flag_toggle_and_snapshot_append_events() {
        let now = Utc::now();
        let mut session = Session::new("exam-1", 0, now);
        assert!(session.toggle_flag("q1", now));
        assert!(!session.toggle_flag("q1", now));
        session.push_snapshot(Snapshot {
            timestamp: now,
            trigger: SnapshotTrigger::Interval,
            image_data: None,
            screen_flag: Some(false),
            screen_data: None,
        });

        assert!(!session.is_flagged("q1"));
        assert_eq!(session.log().count_kind(EventKind::Activity), 2);
        assert_eq!(session.log().count_kind(EventKind::Snapshot), 1);
        assert_eq!(session.snapshots().len(), 1);
    }

    #[test]
    fn json_layout_has_flat_collections() {
        let now = Utc::now();
        let mut session = Session::new("exam-1", 60, now);
        session.record_answer("q1", "A".into(), now);
        let json: serde_json::Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();
        for field in [
            "id",
            "started_at",
            "answers",
            "answer_history",
            "events",
            "security_events",
            "snapshots",
            "time_spent_per_question",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }

        let back = Session::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn json_roundtrip_preserves_floats_exactly() {
        let now = Utc::now();
        let mut session = Session::new("exam-1", 600, now);
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for i in 0..500 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let x = (seed >> 11) as f64 / (1u64 << 53) as f64 * 1920.0;
            let y = 1.0 / (i as f64 + 3.0);
            session.record_answer(&format!("q{}", i % 7), AnswerValue::Point { x, y }, now);
            session.add_time(&format!("q{}", i % 7), y * 10.0);
        }

        let back = Session::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(back.answer_history(), session.answer_history());
        assert_eq!(back.time_spent_per_question(), session.time_spent_per_question());
        assert_eq!(back, session);
    }
}
