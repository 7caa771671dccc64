//! Store Interface
//!
//! Records the engine persists and the trait a durable backend implements.
//! Every write is a point upsert or point delete keyed by session id or
//! queue token, so replaying the same write is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::moves::PerSide;
use crate::game::state::{DuelState, SessionId, Winner};

/// Persisted duel: the full snapshot plus both participant tokens.
///
/// The bot side of a practice duel has no token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Full duel snapshot.
    pub state: DuelState,
    /// Participant tokens.
    pub tokens: PerSide<Option<String>>,
}

/// Persisted queue entry, keyed by its token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Requested display name.
    pub display_name: String,
    /// Network origin of the request.
    pub origin_key: String,
    /// When the entry joined the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// Summary of a finished duel, kept for reporting only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedDuel {
    /// Session id of the finished duel.
    pub session_id: SessionId,
    /// Display names.
    pub names: PerSide<String>,
    /// Final touches.
    pub scores: PerSide<u32>,
    /// Result.
    pub winner: Winner,
    /// Turns fenced.
    pub turns: u32,
    /// Whether one side was the practice bot.
    pub practice: bool,
    /// When the duel ended.
    pub finished_at: DateTime<Utc>,
}

impl ArchivedDuel {
    /// Summarize a finished duel.
    ///
    /// Returns `None` while the duel is still running.
    pub fn from_state(state: &DuelState, finished_at: DateTime<Utc>) -> Option<Self> {
        let winner = state.winner?;
        Some(Self {
            session_id: state.id.clone(),
            names: PerSide::new(
                state.participants.a.display_name.clone(),
                state.participants.b.display_name.clone(),
            ),
            scores: state.scores,
            winner,
            turns: state.turn_number,
            practice: state.bot.is_some(),
            finished_at,
        })
    }
}

/// Everything a store holds, as returned by [`DuelStore::load_all`].
#[derive(Clone, Debug, Default)]
pub struct StoredState {
    /// Duel records (live ones; finished ones are archived instead).
    pub sessions: Vec<SessionRecord>,
    /// Queue entries with their tokens.
    pub queue: Vec<(String, QueueRecord)>,
    /// Archived summaries, oldest first.
    pub archive: Vec<ArchivedDuel>,
    /// Ids of duel records that exist but could not be decoded. They are
    /// not restored, but their ids stay taken.
    pub unreadable_sessions: Vec<SessionId>,
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable backend for duels, queue entries and the archive.
pub trait DuelStore: Send + Sync {
    /// Insert or replace a duel record.
    fn upsert_session(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove a duel record. Removing a missing record is not an error.
    fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Insert or replace a queue entry.
    fn upsert_queue_entry(&self, token: &str, record: &QueueRecord) -> Result<(), StoreError>;

    /// Remove a queue entry. Removing a missing entry is not an error.
    fn delete_queue_entry(&self, token: &str) -> Result<(), StoreError>;

    /// Append a finished duel, keeping at most `limit` summaries (oldest dropped first).
    fn append_archive(&self, summary: &ArchivedDuel, limit: usize) -> Result<(), StoreError>;

    /// Load everything.
    fn load_all(&self) -> Result<StoredState, StoreError>;
}
