//! Duel Session Management
//!
//! A live duel together with everything that hangs off it: participant
//! tokens, the turn timer, the notification hub and the digest of the last
//! snapshot written to the store. The [`SessionManager`] owns every duel and
//! the token index that points into them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use crate::core::hash::{short_hex, snapshot_hash, StateHash};
use crate::game::moves::{PerSide, Side};
use crate::game::state::{session_id_for, DuelState, SessionId};
use crate::network::hub::{Audience, DuelUpdate, NotificationHub, Subscription};
use crate::network::protocol::{MatchView, SpectatorView};
use crate::network::timer::TurnTimer;
use crate::persist::{DuelStore, SessionRecord};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time a side has to commit a move before `advance` is played for it.
    pub turn_timeout: Duration,
    /// Age at which a queue entry is evicted.
    pub queue_timeout: Duration,
    /// Turn limit per duel.
    pub max_turns: u32,
    /// Finished duels kept for reporting.
    pub history_limit: usize,
    /// Longest a blocking call waits before answering anyway.
    pub long_poll_timeout: Duration,
    /// Updates a streaming subscriber may fall behind by.
    pub broadcast_capacity: usize,
    /// Salt mixed into every duel's RNG seed.
    pub seed_salt: u64,
    /// Longest accepted display name, in characters.
    pub max_name_len: usize,
    /// Period of the queue maintenance sweep.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(30),
            queue_timeout: Duration::from_secs(120),
            max_turns: 20,
            history_limit: 50,
            long_poll_timeout: Duration::from_secs(25),
            broadcast_capacity: 64,
            seed_salt: 0,
            max_name_len: 24,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Load from `RIPOSTE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            turn_timeout: env_secs("RIPOSTE_TURN_TIMEOUT_SECS").unwrap_or(defaults.turn_timeout),
            queue_timeout: env_secs("RIPOSTE_QUEUE_TIMEOUT_SECS").unwrap_or(defaults.queue_timeout),
            max_turns: env_parse("RIPOSTE_MAX_TURNS").unwrap_or(defaults.max_turns),
            history_limit: env_parse("RIPOSTE_HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            long_poll_timeout: env_secs("RIPOSTE_LONG_POLL_SECS")
                .unwrap_or(defaults.long_poll_timeout),
            broadcast_capacity: env_parse("RIPOSTE_BROADCAST_CAPACITY")
                .unwrap_or(defaults.broadcast_capacity),
            seed_salt: env_parse("RIPOSTE_SEED_SALT").unwrap_or(defaults.seed_salt),
            max_name_len: env_parse("RIPOSTE_MAX_NAME_LEN").unwrap_or(defaults.max_name_len),
            sweep_interval: env_secs("RIPOSTE_SWEEP_SECS").unwrap_or(defaults.sweep_interval),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

// =============================================================================
// DUEL SESSION
// =============================================================================

/// A live duel and its attachments.
pub struct DuelSession {
    /// Duel state.
    pub state: DuelState,
    /// Participant tokens; the bot side has none.
    pub tokens: PerSide<Option<String>>,
    timer: TurnTimer,
    hub: NotificationHub,
    last_saved: Option<StateHash>,
    faulted: bool,
}

impl DuelSession {
    /// Wrap a duel state.
    pub fn new(state: DuelState, tokens: PerSide<Option<String>>, config: &EngineConfig) -> Self {
        Self {
            state,
            tokens,
            timer: TurnTimer::new(config.turn_timeout),
            hub: NotificationHub::new(config.broadcast_capacity),
            last_saved: None,
            faulted: false,
        }
    }

    /// Rebuild from a persisted record.
    ///
    /// The record is known to be in the store, so the first save of an
    /// unchanged snapshot is skipped.
    pub fn from_record(record: SessionRecord, config: &EngineConfig) -> Self {
        let last_saved = snapshot_hash(&record).ok();
        let mut session = Self::new(record.state, record.tokens, config);
        session.last_saved = last_saved;
        session
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.state.id
    }

    /// Record to persist.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            state: self.state.clone(),
            tokens: self.tokens.clone(),
        }
    }

    /// Participant view.
    pub fn view(&self, side: Side) -> MatchView {
        MatchView::for_side(&self.state, side, self.timer.deadline_ms())
    }

    /// Spectator view.
    pub fn spectator_view(&self) -> SpectatorView {
        SpectatorView::from_state(&self.state, self.timer.deadline_ms())
    }

    /// All views at once, for the hub.
    pub fn update(&self) -> DuelUpdate {
        DuelUpdate {
            a: self.view(Side::A),
            b: self.view(Side::B),
            spectator: self.spectator_view(),
        }
    }

    /// Turn timer.
    pub fn timer(&mut self) -> &mut TurnTimer {
        &mut self.timer
    }

    /// Notification hub.
    pub fn hub(&mut self) -> &mut NotificationHub {
        &mut self.hub
    }

    /// Subscribe to updates.
    pub fn subscribe(&self, audience: Audience) -> Subscription {
        self.hub.subscribe(audience)
    }

    /// Was this duel torn down after an invariant violation?
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Stop the timer and drop every waiter.
    pub fn mark_faulted(&mut self) {
        self.faulted = true;
        self.timer.disarm();
        self.hub.drop_waiters();
    }

    /// Write the snapshot unless it matches the last one written.
    ///
    /// A failing store is logged and play continues in memory. Returns
    /// whether a write reached the store.
    pub fn persist(&mut self, store: &dyn DuelStore) -> bool {
        let record = self.record();
        let digest = match snapshot_hash(&record) {
            Ok(digest) => digest,
            Err(e) => {
                error!("Session {}: cannot hash snapshot: {}", self.state.id, e);
                return false;
            }
        };
        if self.last_saved == Some(digest) {
            return false;
        }

        match store.upsert_session(&record) {
            Ok(()) => {
                debug!("Session {} saved ({})", self.state.id, short_hex(&digest));
                #[cfg(feature = "debug-tracing")]
                debug!(
                    "Session {} turn {} digest {}",
                    self.state.id,
                    self.state.turn_number,
                    hex::encode(digest)
                );
                self.last_saved = Some(digest);
                true
            }
            Err(e) => {
                error!("Session {}: save failed, continuing in memory: {}", self.state.id, e);
                false
            }
        }
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Where a participant token points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Duel the token belongs to.
    pub session_id: SessionId,
    /// Side the token fences on.
    pub side: Side,
    /// Display name at binding time.
    pub display_name: String,
}

/// Owns every duel and the token index.
pub struct SessionManager {
    /// Duels by id, live and recently finished.
    sessions: RwLock<BTreeMap<SessionId, Arc<Mutex<DuelSession>>>>,
    /// Token to duel mapping.
    identities: RwLock<BTreeMap<String, Identity>>,
    /// Next session number.
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            identities: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next session id.
    pub fn next_session_id(&self) -> SessionId {
        session_id_for(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Make sure future ids start at `n` or later.
    pub fn bump_counter(&self, n: u64) {
        self.next_id.fetch_max(n, Ordering::SeqCst);
    }

    /// Current counter value.
    pub fn counter(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Register a duel and bind its tokens.
    pub async fn insert(&self, session: DuelSession) -> Arc<Mutex<DuelSession>> {
        let id = session.id().clone();
        let bindings: Vec<(String, Identity)> = Side::BOTH
            .into_iter()
            .filter_map(|side| {
                session.tokens.get(side).clone().map(|token| {
                    (token, Identity {
                        session_id: id.clone(),
                        side,
                        display_name: session.state.participants.get(side).display_name.clone(),
                    })
                })
            })
            .collect();

        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id.clone(), handle.clone());

        let mut identities = self.identities.write().await;
        for (token, identity) in bindings {
            identities.insert(token, identity);
        }
        debug!("Registered session {}", id);

        handle
    }

    /// Get a duel by id.
    pub async fn get_session(&self, id: &str) -> Option<Arc<Mutex<DuelSession>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Resolve a token.
    pub async fn identity(&self, token: &str) -> Option<Identity> {
        self.identities.read().await.get(token).cloned()
    }

    /// Resolve a token to its duel.
    pub async fn get_token_session(
        &self,
        token: &str,
    ) -> Option<(Identity, Arc<Mutex<DuelSession>>)> {
        let identity = self.identity(token).await?;
        let session = self.get_session(&identity.session_id).await?;
        Some((identity, session))
    }

    /// Remove a duel and every token bound to it.
    pub async fn remove_session(&self, id: &str) -> Option<Arc<Mutex<DuelSession>>> {
        let removed = self.sessions.write().await.remove(id);
        self.identities.write().await.retain(|_, identity| identity.session_id != id);
        removed
    }

    /// Number of registered duels.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Every registered duel.
    pub async fn all_sessions(&self) -> Vec<Arc<Mutex<DuelSession>>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::moves::Move;
    use crate::game::state::Participant;
    use crate::persist::MemoryStore;

    fn duel(n: u64) -> DuelSession {
        let state = DuelState::new(
            session_id_for(n),
            PerSide::new(Participant::new("ada", "o1"), Participant::new("bo", "o2")),
            20,
            None,
            DeterministicRng::new(n),
        );
        DuelSession::new(
            state,
            PerSide::new(Some(format!("ta{}", n)), Some(format!("tb{}", n))),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.turn_timeout, Duration::from_secs(30));
        assert_eq!(config.max_turns, 20);
        assert!(config.long_poll_timeout < config.queue_timeout);
    }

    #[test]
    fn test_persist_skips_unchanged_snapshot() {
        let store = MemoryStore::new();
        let mut session = duel(1);

        assert!(session.persist(&store));
        assert!(!session.persist(&store));
        assert_eq!(store.write_count(), 1);

        session.state.submit(Side::A, Move::Lunge).unwrap();
        assert!(session.persist(&store));
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.session("duel-1").unwrap().state.pending.a, Some(Move::Lunge));
    }

    #[test]
    fn test_persist_failure_is_retried_next_time() {
        let store = MemoryStore::new();
        let mut session = duel(1);
        store.set_failing(true);
        assert!(!session.persist(&store));
        store.set_failing(false);
        assert!(session.persist(&store));
    }

    #[test]
    fn test_restored_session_skips_identical_save() {
        let store = MemoryStore::new();
        let mut restored = DuelSession::from_record(duel(2).record(), &EngineConfig::default());
        assert!(!restored.persist(&store));
        restored.state.submit(Side::A, Move::Lunge).unwrap();
        assert!(restored.persist(&store));
    }

    #[tokio::test]
    async fn test_session_manager() {
        let manager = SessionManager::new();
        let id = manager.next_session_id();
        assert_eq!(id, "duel-1");
        assert_eq!(manager.next_session_id(), "duel-2");

        manager.insert(duel(1)).await;
        assert_eq!(manager.session_count().await, 1);
        assert!(manager.get_session("duel-1").await.is_some());

        let (identity, _) = manager.get_token_session("tb1").await.unwrap();
        assert_eq!(identity.side, Side::B);
        assert_eq!(identity.display_name, "bo");

        manager.remove_session("duel-1").await;
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.identity("ta1").await.is_none());
    }

    #[test]
    fn test_counter_only_moves_forward() {
        let manager = SessionManager::new();
        manager.bump_counter(10);
        manager.bump_counter(4);
        assert_eq!(manager.next_session_id(), "duel-10");
    }

    #[tokio::test]
    async fn test_fault_drops_waiters() {
        let mut session = duel(1);
        let rx = session.hub().register_waiter(Side::A);
        session.mark_faulted();
        assert!(session.is_faulted());
        assert!(rx.await.is_err());
    }
}
