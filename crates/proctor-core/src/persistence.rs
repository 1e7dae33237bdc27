//! Durable session snapshots and crash/close recovery.
//!
//! Layout in keyed storage:
//! - `exam-sessions-<examTarget>` → JSON list of [`IndexEntry`]
//! - `exam-session-<sessionId>` → the full serialized [`Session`]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::Session;

/// Key prefix of the per-exam recovery index.
pub const INDEX_PREFIX: &str = "exam-sessions-";
const SESSION_PREFIX: &str = "exam-session-";

/// Default number of index entries kept per exam target.
pub const DEFAULT_MAX_SESSIONS_PER_TARGET: usize = 5;

/// Keyed string storage (the browser's local storage, a directory, ...).
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub fn index_key(exam_target: &str) -> String {
    format!("{INDEX_PREFIX}{exam_target}")
}

pub fn session_key(session_id: Uuid) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

/// One row of the per-exam recovery index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: Uuid,
    /// Session start time.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

/// A persisted, not yet submitted session that can be resumed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCandidate {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Writes sessions and maintains the recovery index.
#[derive(Clone)]
pub struct RecoveryManager {
    store: Arc<dyn KeyValueStore>,
    max_per_target: usize,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            max_per_target: DEFAULT_MAX_SESSIONS_PER_TARGET,
        }
    }

    /// Cap the number of index entries kept per exam target (minimum 1).
    pub fn with_retention(mut self, max_per_target: usize) -> Self {
        self.max_per_target = max_per_target.max(1);
        self
    }

    /// Write the full session and upsert its index entry.
    pub fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let key = session_key(session.id());
        let json = session
            .to_json()
            .map_err(|e| StoreError::serialization(&key, e))?;
        self.store.set(&key, &json)?;
        self.update_index(session)
    }

    fn update_index(&self, session: &Session) -> Result<(), StoreError> {
        let target = session.exam_target();
        let mut entries = self.read_index_or_rebuild(target)?;
        let completed = session.is_submitted();

        match entries.iter_mut().find(|e| e.id == session.id()) {
            Some(entry) => entry.completed = completed,
            None => entries.push(IndexEntry {
                id: session.id(),
                timestamp: session.started_at(),
                completed,
            }),
        }

        // Newest first; the session being written is always retained.
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let (mut kept, others): (Vec<IndexEntry>, Vec<IndexEntry>) =
            entries.into_iter().partition(|e| e.id == session.id());
        let mut others = others.into_iter();
        kept.extend(others.by_ref().take(self.max_per_target - 1));
        let evicted: Vec<IndexEntry> = others.collect();
        kept.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let key = index_key(target);
        let json = serde_json::to_string(&kept).map_err(|e| StoreError::serialization(&key, e))?;
        self.store.set(&key, &json)?;

        for entry in evicted {
            tracing::info!(session_id = %entry.id, exam = target, "evicting stale session from recovery index");
            if let Err(e) = self.store.remove(&session_key(entry.id)) {
                tracing::warn!(session_id = %entry.id, "failed to remove evicted session: {e}");
            }
        }
        Ok(())
    }

    /// Read the index for an exam target; a missing index is empty.
    pub fn read_index(&self, exam_target: &str) -> Result<Vec<IndexEntry>, StoreError> {
        let key = index_key(exam_target);
        match self.store.get(&key)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::serialization(&key, e)),
            None => Ok(Vec::new()),
        }
    }

    /// Like [`read_index`](Self::read_index), but an index that no longer
    /// parses is treated as empty so the next write replaces it.
    fn read_index_or_rebuild(&self, exam_target: &str) -> Result<Vec<IndexEntry>, StoreError> {
        match self.read_index(exam_target) {
            Err(e @ StoreError::Serialization { .. }) => {
                tracing::warn!(exam = exam_target, "recovery index unreadable, rebuilding: {e}");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Incomplete sessions for an exam target, newest first.
    pub fn candidates(&self, exam_target: &str) -> Result<Vec<RecoveryCandidate>, StoreError> {
        let mut entries = self.read_index_or_rebuild(exam_target)?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries
            .into_iter()
            .filter(|e| !e.completed)
            .map(|e| RecoveryCandidate {
                session_id: e.id,
                started_at: e.timestamp,
            })
            .collect())
    }

    /// Load a persisted session verbatim.
    pub fn load(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let key = session_key(session_id);
        let json = self
            .store
            .get(&key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Session::from_json(&json).map_err(|e| StoreError::serialization(&key, e))
    }
}

/// In-memory store with switchable failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
    write_count: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail until switched back.
    pub fn fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    /// Make every subsequent `get` fail until switched back.
    pub fn fail_reads(&self, fail: bool) {
        *lock(&self.fail_reads) = fail;
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        *lock(&self.write_count)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite a raw value, bypassing failure injection.
    pub fn insert_raw(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if *lock(&self.fail_reads) {
            return Err(StoreError::Unavailable(format!("read of {key} rejected")));
        }
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if *lock(&self.fail_writes) {
            return Err(StoreError::Unavailable(format!("write of {key} rejected")));
        }
        lock(&self.entries).insert(key.to_string(), value.to_string());
        *lock(&self.write_count) += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}
