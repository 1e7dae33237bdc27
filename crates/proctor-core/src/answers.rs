//! Current answers plus their append-only version history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AnswerValue, QuestionId};

/// One entry in the answer history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub timestamp: DateTime<Utc>,
    pub value: AnswerValue,
}

/// Current value per question, backed by a history that is never rewritten.
///
/// `answers[q]` is always the value of the last history entry for `q`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredAnswers")]
pub struct AnswerStore {
    answers: BTreeMap<QuestionId, AnswerValue>,
    answer_history: Vec<AnswerRecord>,
    /// History length per question, rebuilt on load.
    #[serde(skip)]
    revisions: BTreeMap<QuestionId, u32>,
}

/// Persisted shape of [`AnswerStore`].
#[derive(Deserialize)]
struct StoredAnswers {
    answers: BTreeMap<QuestionId, AnswerValue>,
    answer_history: Vec<AnswerRecord>,
}

impl From<StoredAnswers> for AnswerStore {
    fn from(stored: StoredAnswers) -> Self {
        let mut revisions: BTreeMap<QuestionId, u32> = BTreeMap::new();
        for record in &stored.answer_history {
            let count = revisions.entry(record.question_id.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }
        Self {
            answers: stored.answers,
            answer_history: stored.answer_history,
            revisions,
        }
    }
}

impl AnswerStore {
    /// Record a new value; returns the revision number for that question
    /// (1 for the first answer).
    pub(crate) fn record(
        &mut self,
        question_id: &str,
        value: AnswerValue,
        timestamp: DateTime<Utc>,
    ) -> u32 {
        self.answer_history.push(AnswerRecord {
            question_id: question_id.to_string(),
            timestamp,
            value: value.clone(),
        });
        self.answers.insert(question_id.to_string(), value);
        let count = self.revisions.entry(question_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerValue> {
        self.answers.get(question_id)
    }

    pub fn current(&self) -> &BTreeMap<QuestionId, AnswerValue> {
        &self.answers
    }

    pub fn history(&self) -> &[AnswerRecord] {
        &self.answer_history
    }

    /// All recorded versions for one question, oldest first.
    pub fn history_for<'a>(&'a self, question_id: &'a str) -> impl Iterator<Item = &'a AnswerRecord> {
        self.answer_history
            .iter()
            .filter(move |r| r.question_id == question_id)
    }

    /// Number of times a question has been answered.
    pub fn revisions(&self, question_id: &str) -> u32 {
        self.revisions.get(question_id).copied().unwrap_or(0)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Check that every current value matches the latest history entry.
    pub fn is_consistent(&self) -> bool {
        let mut latest: BTreeMap<&str, &AnswerValue> = BTreeMap::new();
        for record in &self.answer_history {
            latest.insert(record.question_id.as_str(), &record.value);
        }
        latest.len() == self.answers.len()
            && latest
                .iter()
                .all(|(q, v)| self.answers.get(*q) == Some(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_value_tracks_latest_record() {
        let mut store = AnswerStore::default();
        let t0 = Utc::now();
        assert_eq!(store.record("q1", "A".into(), t0), 1);
        assert_eq!(store.record("q2", true.into(), t0), 1);
        assert_eq!(store.record("q1", "B".into(), t0), 2);

        assert_eq!(store.get("q1"), Some(&AnswerValue::Text("B".into())));
        assert_eq!(store.history().len(), 3);
        assert_eq!(store.history_for("q1").count(), 2);
        assert_eq!(store.answered_count(), 2);
        assert!(store.is_consistent());
    }

    #[test]
    fn history_is_never_rewritten() {
        let mut store = AnswerStore::default();
        let t0 = Utc::now();
        store.record("q1", "A".into(), t0);
        let first = store.history()[0].clone();
        store.record("q1", "A".into(), t0);
        assert_eq!(store.history()[0], first);
        assert_eq!(store.revisions("q1"), 2);
    }

    #[test]
    fn serialized_field_names() {
        let mut store = AnswerStore::default();
        store.record("q1", "A".into(), Utc::now());
        let json = serde_json::to_value(&store).unwrap();
        assert!(json.get("answers").is_some());
        assert!(json.get("answer_history").is_some());
        assert!(json.get("revisions").is_none());
    }

    #[test]
    fn revision_counts_are_rebuilt_after_load() {
        let mut store = AnswerStore::default();
        let t0 = Utc::now();
        store.record("q1", "A".into(), t0);
        store.record("q1", "B".into(), t0);
        store.record("q2", true.into(), t0);

        let mut back: AnswerStore =
            serde_json::from_str(&serde_json::to_string(&store).unwrap()).unwrap();
        assert_eq!(back, store);
        assert_eq!(back.revisions("q1"), 2);
        assert_eq!(back.revisions("q3"), 0);
        assert_eq!(back.record("q1", "C".into(), t0), 3);
    }
}
