//! In-memory store.
//!
//! Cloning shares the underlying maps, so a test can hand one clone to an
//! engine, drop the engine and build a fresh one from another clone to
//! simulate a process restart.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::store::{ArchivedDuel, DuelStore, QueueRecord, SessionRecord, StoreError, StoredState};

/// In-memory [`DuelStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, SessionRecord>,
    queue: BTreeMap<String, QueueRecord>,
    archive: VecDeque<ArchivedDuel>,
    /// Successful writes so far (upserts, deletes, archive appends).
    writes: u64,
    /// When set, every write fails.
    failing: bool,
    /// When set, only archive appends fail.
    archive_failing: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Make archive appends fail (or succeed again), leaving other writes alone.
    pub fn set_archive_failing(&self, failing: bool) {
        self.inner.lock().archive_failing = failing;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Stored record for a session, if any.
    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.lock().sessions.get(session_id).cloned()
    }

    /// Number of stored queue entries.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn write<R>(&self, op: impl FnOnce(&mut Inner) -> R) -> Result<R, StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        inner.writes += 1;
        Ok(op(&mut inner))
    }
}

impl DuelStore for MemoryStore {
    fn upsert_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.write(|inner| {
            inner.sessions.insert(record.state.id.clone(), record.clone());
        })
    }

    fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.write(|inner| {
            inner.sessions.remove(session_id);
        })
    }

    fn upsert_queue_entry(&self, token: &str, record: &QueueRecord) -> Result<(), StoreError> {
        self.write(|inner| {
            inner.queue.insert(token.to_string(), record.clone());
        })
    }

    fn delete_queue_entry(&self, token: &str) -> Result<(), StoreError> {
        self.write(|inner| {
            inner.queue.remove(token);
        })
    }

    fn append_archive(&self, summary: &ArchivedDuel, limit: usize) -> Result<(), StoreError> {
        if self.inner.lock().archive_failing {
            return Err(StoreError::Unavailable("memory archive set to fail".to_string()));
        }
        self.write(|inner| {
            inner.archive.push_back(summary.clone());
            while inner.archive.len() > limit {
                inner.archive.pop_front();
            }
        })
    }

    fn load_all(&self) -> Result<StoredState, StoreError> {
        let inner = self.inner.lock();
        Ok(StoredState {
            sessions: inner.sessions.values().cloned().collect(),
            queue: inner.queue.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            archive: inner.archive.iter().cloned().collect(),
            unreadable_sessions: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::moves::PerSide;
    use crate::game::state::{session_id_for, DuelState, Participant, Winner};
    use chrono::Utc;

    fn record(n: u64) -> SessionRecord {
        SessionRecord {
            state: DuelState::new(
                session_id_for(n),
                PerSide::new(Participant::new("a", "o1"), Participant::new("b", "o2")),
                10,
                None,
                DeterministicRng::new(n),
            ),
            tokens: PerSide::new(Some("ta".into()), Some("tb".into())),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        store.upsert_session(&record(1)).unwrap();
        let once = store.load_all().unwrap();
        store.upsert_session(&record(1)).unwrap();
        let twice = store.load_all().unwrap();
        assert_eq!(once.sessions, twice.sessions);
        assert_eq!(twice.sessions.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.upsert_session(&record(3)).unwrap();
        assert!(other.session("duel-3").is_some());
        other.delete_session("duel-3").unwrap();
        assert!(store.session("duel-3").is_none());
    }

    #[test]
    fn test_archive_is_bounded() {
        let store = MemoryStore::new();
        for n in 0..5 {
            let mut state = record(n).state;
            state.winner = Some(Winner::A);
            let summary = ArchivedDuel::from_state(&state, Utc::now()).unwrap();
            store.append_archive(&summary, 3).unwrap();
        }
        let archive = store.load_all().unwrap().archive;
        let ids: Vec<_> = archive.iter().map(|a| a.session_id.as_str()).collect();
        assert_eq!(ids, vec!["duel-2", "duel-3", "duel-4"]);
    }

    #[test]
    fn test_failing_store() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(matches!(store.upsert_session(&record(1)), Err(StoreError::Unavailable(_))));
        assert_eq!(store.write_count(), 0);
        store.set_failing(false);
        store.upsert_session(&record(1)).unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
