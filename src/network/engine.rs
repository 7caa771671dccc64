//! Duel Engine
//!
//! The coordinating service behind every transport. It owns the queue, the
//! duel registry, the finished-duel history and the store handle, and is the
//! only thing that mutates a duel.
//!
//! ## Locking
//!
//! - One async lock per duel serializes submissions, timer expiry and the
//!   resolution that follows. A turn's side effects (save, timer, wake-ups)
//!   all happen before the lock is released.
//! - One async lock for the queue. Pairing registers the new duel while it
//!   is held, so a queued token is always either in the queue or bound.
//! - Blocking callers await their one-shot receiver only after every guard
//!   has been dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::core::rng::DeterministicRng;
use crate::game::bot::{BotControl, Difficulty};
use crate::game::moves::{Move, ParseMoveError, PerSide, Side};
use crate::game::state::{
    session_id_number, DuelState, Participant, SessionFault, SessionId, SubmitError, TurnReport,
};
use crate::network::hub::{Audience, DuelUpdate, Subscription};
use crate::network::protocol::{ErrorCode, MatchView, ServerError, SpectatorView};
use crate::network::queue::{is_stale, MatchQueue, QueueEntry, QueueNotice};
use crate::network::session::{DuelSession, EngineConfig, SessionManager};
use crate::persist::{ArchivedDuel, DuelStore, StoreError, StoredState};

// =============================================================================
// RESULTS AND ERRORS
// =============================================================================

/// Answer to a queue join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Waiting for an opponent.
    Queued {
        /// Queue token.
        token: String,
        /// 1-based position.
        position: usize,
    },
    /// Paired.
    Matched {
        /// Participant token.
        token: String,
        /// The caller's view of the new duel.
        view: MatchView,
    },
    /// The entry went stale while the caller waited.
    Expired {
        /// The expired token.
        token: String,
    },
}

/// Answer to a queue poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    /// Still waiting.
    Queued {
        /// 1-based position.
        position: usize,
    },
    /// Paired; here is the duel.
    Matched(MatchView),
    /// Evicted as stale by this poll.
    Expired,
    /// Not queued and not bound to a duel.
    Unknown,
}

/// Answer to a move submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Move recorded; the opponent has not moved yet.
    Accepted(MatchView),
    /// The turn resolved.
    Resolved(MatchView),
}

/// Engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Duels still being fenced.
    pub live_sessions: usize,
    /// Finished duels still held for `get_state`.
    pub finished_sessions: usize,
    /// Queue entries waiting.
    pub queued: usize,
    /// Finished duels in the report history.
    pub archived: usize,
}

/// Rejected request. Never changes any duel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Token not bound to a duel.
    #[error("Unknown token")]
    UnknownToken,

    /// No such session.
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// The duel is over; carries the final view.
    #[error("Duel is over")]
    GameOver(Box<MatchView>),

    /// Move already committed this turn.
    #[error("Move already submitted this turn")]
    AlreadySubmitted,

    /// Not one of the four moves.
    #[error("Invalid move: {0}")]
    InvalidMove(#[from] ParseMoveError),

    /// Display name rejected.
    #[error("Invalid display name: {0}")]
    InvalidName(String),

    /// The duel was shut down after an internal fault.
    #[error("Session {0} was shut down after an internal fault")]
    SessionFaulted(SessionId),
}

impl ClientError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::UnknownToken => ErrorCode::UnknownToken,
            ClientError::UnknownSession(_) => ErrorCode::UnknownSession,
            ClientError::GameOver(_) => ErrorCode::GameOver,
            ClientError::AlreadySubmitted => ErrorCode::AlreadySubmitted,
            ClientError::InvalidMove(_) => ErrorCode::InvalidMove,
            ClientError::InvalidName(_) => ErrorCode::InvalidName,
            ClientError::SessionFaulted(_) => ErrorCode::InternalError,
        }
    }

    /// Wire rejection.
    pub fn to_server_error(&self) -> ServerError {
        ServerError {
            code: self.code(),
            message: self.to_string(),
            view: match self {
                ClientError::GameOver(view) => Some((**view).clone()),
                _ => None,
            },
        }
    }
}

/// Fresh participant token.
fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn bot_name(difficulty: Difficulty) -> String {
    match difficulty {
        Difficulty::Easy => "Practice Bot (easy)",
        Difficulty::Normal => "Practice Bot",
        Difficulty::Hard => "Practice Bot (hard)",
    }
    .to_string()
}

#[derive(Default)]
struct History {
    /// Finished duels, oldest first.
    archived: VecDeque<ArchivedDuel>,
    /// Duels pushed out of the history, to drop from the registry.
    retire: Vec<SessionId>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// The session and matchmaking engine.
pub struct DuelEngine {
    config: EngineConfig,
    store: Arc<dyn DuelStore>,
    sessions: SessionManager,
    queue: Mutex<MatchQueue>,
    history: parking_lot::Mutex<History>,
    /// Handle given to timer tasks.
    this: Weak<DuelEngine>,
}

impl DuelEngine {
    /// Create an empty engine.
    pub fn new(config: EngineConfig, store: Arc<dyn DuelStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue: Mutex::new(MatchQueue::new(config.queue_timeout)),
            config,
            store,
            sessions: SessionManager::new(),
            history: parking_lot::Mutex::new(History::default()),
            this: this.clone(),
        })
    }

    /// Create an engine and load everything the store holds.
    pub async fn recover(
        config: EngineConfig,
        store: Arc<dyn DuelStore>,
    ) -> Result<Arc<Self>, StoreError> {
        let stored = store.load_all()?;
        let engine = Self::new(config, store);
        engine.restore(stored).await;
        Ok(engine)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(skip(self, stored))]
    async fn restore(&self, stored: StoredState) {
        let StoredState { sessions, queue, archive, unreadable_sessions } = stored;

        let mut highest = archive
            .iter()
            .map(|a| &a.session_id)
            .chain(unreadable_sessions.iter())
            .filter_map(|id| session_id_number(id))
            .max()
            .unwrap_or(0);
        if !unreadable_sessions.is_empty() {
            warn!(
                "{} stored sessions could not be read: {:?}",
                unreadable_sessions.len(),
                unreadable_sessions
            );
        }

        {
            let mut history = self.history.lock();
            let skip = archive.len().saturating_sub(self.config.history_limit);
            history.archived = archive.into_iter().skip(skip).collect();
        }

        let mut restored = 0;
        for record in sessions {
            if let Some(n) = session_id_number(&record.state.id) {
                highest = highest.max(n);
            }

            let mut session = DuelSession::from_record(record, &self.config);
            if session.state.is_over() {
                // Finished but never archived
                warn!("Session {} was stored after it ended; archiving", session.id());
                self.archive_finished(&mut session);
                continue;
            }

            match self.settle_locked(&mut session) {
                Ok(Some(_)) => {}
                Ok(None) => self.arm_timer(&mut session),
                Err(fault) => {
                    error!("Dropping unrecoverable session: {}", fault);
                    if let Err(e) = self.store.delete_session(session.id()) {
                        error!("Failed to delete session {}: {}", session.id(), e);
                    }
                    continue;
                }
            }
            self.sessions.insert(session).await;
            restored += 1;
        }

        let now = Utc::now();
        let mut fresh = Vec::new();
        let mut dropped = 0;
        for (token, record) in queue {
            if is_stale(record.enqueued_at, now, self.config.queue_timeout) {
                if let Err(e) = self.store.delete_queue_entry(&token) {
                    error!("Failed to delete stale queue entry: {}", e);
                }
                dropped += 1;
            } else {
                fresh.push(QueueEntry::from_record(token, record));
            }
        }
        let requeued = fresh.len();
        self.queue.lock().await.restore(fresh);

        self.sessions.bump_counter(highest + 1);
        self.retire_evicted().await;

        info!(
            "Recovered {} sessions, {} queue entries ({} stale dropped), next id duel-{}",
            restored, requeued, dropped, self.sessions.counter()
        );
    }

    // =========================================================================
    // MATCHMAKING
    // =========================================================================

    /// Join the matchmaking queue.
    ///
    /// Pairs with the oldest entry that is not the same caller, or queues.
    /// A blocking join waits for its own pairing or eviction, up to the
    /// long-poll timeout.
    pub async fn join_queue(
        &self,
        display_name: &str,
        origin_key: &str,
        blocking: bool,
    ) -> Result<JoinOutcome, ClientError> {
        let name = self.validate_name(display_name)?;
        let token = new_token();

        let (position, waiter) = {
            let mut queue = self.queue.lock().await;
            self.purge_locked(&mut queue);

            if let Some(mut partner) = queue.take_partner(&name, origin_key) {
                if let Err(e) = self.store.delete_queue_entry(&partner.token) {
                    error!("Failed to delete queue entry: {}", e);
                }
                let participants = PerSide::new(
                    Participant::new(partner.display_name.clone(), partner.origin_key.clone()),
                    Participant::new(name, origin_key),
                );
                let tokens = PerSide::new(Some(partner.token.clone()), Some(token.clone()));
                let update = self.create_duel(participants, tokens, None).await;

                if !partner.notify(QueueNotice::Matched(update.a)) {
                    debug!("Paired entry has no waiter; it will find the duel by polling");
                }
                return Ok(JoinOutcome::Matched { token, view: update.b });
            }

            let mut entry = QueueEntry::new(token.clone(), name, origin_key.to_string());
            let waiter = if blocking {
                let (tx, rx) = oneshot::channel();
                entry.waiter = Some(tx);
                Some(rx)
            } else {
                None
            };
            if let Err(e) = self.store.upsert_queue_entry(&token, &entry.record()) {
                error!("Failed to persist queue entry, keeping it in memory: {}", e);
            }
            debug!("{} joined the queue", entry.display_name);
            queue.push(entry);
            (queue.len(), waiter)
        };

        let Some(rx) = waiter else {
            return Ok(JoinOutcome::Queued { token, position });
        };

        match timeout(self.config.long_poll_timeout, rx).await {
            Ok(Ok(QueueNotice::Matched(view))) => Ok(JoinOutcome::Matched { token, view }),
            Ok(Ok(QueueNotice::Expired)) => Ok(JoinOutcome::Expired { token }),
            // Waiter dropped (left the queue) or long-poll cap reached
            Ok(Err(_)) | Err(_) => Ok(match self.poll_queue(&token).await {
                QueueStatus::Queued { position } => JoinOutcome::Queued { token, position },
                QueueStatus::Matched(view) => JoinOutcome::Matched { token, view },
                QueueStatus::Expired | QueueStatus::Unknown => JoinOutcome::Expired { token },
            }),
        }
    }

    /// Where a queue token stands.
    pub async fn poll_queue(&self, token: &str) -> QueueStatus {
        {
            let mut queue = self.queue.lock().await;
            let evicted = self.purge_locked(&mut queue);
            if evicted.iter().any(|t| t == token) {
                return QueueStatus::Expired;
            }
            if let Some(position) = queue.position(token) {
                return QueueStatus::Queued { position };
            }
        }

        match self.sessions.get_token_session(token).await {
            Some((identity, handle)) => {
                QueueStatus::Matched(handle.lock().await.view(identity.side))
            }
            None => QueueStatus::Unknown,
        }
    }

    /// Leave the queue. Returns whether the token was queued.
    pub async fn leave_queue(&self, token: &str) -> bool {
        let removed = self.queue.lock().await.remove(token);
        match removed {
            Some(entry) => {
                if let Err(e) = self.store.delete_queue_entry(token) {
                    error!("Failed to delete queue entry: {}", e);
                }
                debug!("{} left the queue", entry.display_name);
                true
            }
            None => false,
        }
    }

    /// Start a duel against the practice bot, which fences on side B.
    pub async fn start_practice(
        &self,
        display_name: &str,
        origin_key: &str,
        difficulty: Difficulty,
    ) -> Result<(String, MatchView), ClientError> {
        let name = self.validate_name(display_name)?;
        let token = new_token();
        let participants = PerSide::new(
            Participant::new(name, origin_key),
            Participant::new(bot_name(difficulty), "bot"),
        );
        let bot = BotControl { side: Side::B, difficulty };
        let tokens = PerSide::new(Some(token.clone()), None);
        let update = self.create_duel(participants, tokens, Some(bot)).await;
        Ok((token, update.a))
    }

    /// Evict stale queue entries now.
    pub async fn sweep_queue(&self) -> usize {
        let mut queue = self.queue.lock().await;
        self.purge_locked(&mut queue).len()
    }

    fn purge_locked(&self, queue: &mut MatchQueue) -> Vec<String> {
        let evicted = queue.purge_stale(Utc::now());
        let mut tokens = Vec::with_capacity(evicted.len());
        for mut entry in evicted {
            if let Err(e) = self.store.delete_queue_entry(&entry.token) {
                error!("Failed to delete stale queue entry: {}", e);
            }
            let woke = entry.notify(QueueNotice::Expired);
            warn!("Queue entry for {} expired (waiter notified: {})", entry.display_name, woke);
            tokens.push(entry.token);
        }
        tokens
    }

    fn validate_name(&self, display_name: &str) -> Result<String, ClientError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidName("display name is empty".to_string()));
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(ClientError::InvalidName(format!(
                "display name is longer than {} characters",
                self.config.max_name_len
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(ClientError::InvalidName(
                "display name contains control characters".to_string(),
            ));
        }
        Ok(name.to_string())
    }

    async fn create_duel(
        &self,
        participants: PerSide<Participant>,
        tokens: PerSide<Option<String>>,
        bot: Option<BotControl>,
    ) -> DuelUpdate {
        let id = self.sessions.next_session_id();
        let rng = DeterministicRng::for_session(&id, self.config.seed_salt);
        let state = DuelState::new(id, participants, self.config.max_turns, bot, rng);

        let mut session = DuelSession::new(state, tokens, &self.config);
        session.persist(self.store.as_ref());
        self.arm_timer(&mut session);
        let update = session.update();

        info!(
            "Session {} created: {} vs {}{}",
            session.id(),
            session.state.participants.a.display_name,
            session.state.participants.b.display_name,
            if bot.is_some() { " (practice)" } else { "" }
        );
        self.sessions.insert(session).await;
        update
    }

    // =========================================================================
    // PLAY
    // =========================================================================

    /// Commit a move for the caller's side.
    ///
    /// Resolves the turn when both moves are in (a practice bot answers in
    /// the same call). A blocking call whose turn is still open waits for
    /// the resolution, up to the long-poll timeout.
    pub async fn submit_move(
        &self,
        token: &str,
        move_token: &str,
        blocking: bool,
    ) -> Result<SubmitOutcome, ClientError> {
        let (identity, handle) = self
            .sessions
            .get_token_session(token)
            .await
            .ok_or(ClientError::UnknownToken)?;
        let mv: Move = move_token.parse()?;
        let side = identity.side;

        enum Step {
            Done(SubmitOutcome),
            Wait(oneshot::Receiver<MatchView>, MatchView),
            Faulted,
        }

        let step = {
            let mut session = handle.lock().await;
            if session.is_faulted() {
                return Err(ClientError::SessionFaulted(identity.session_id));
            }
            match session.state.submit(side, mv) {
                Ok(()) => {}
                Err(SubmitError::GameOver) => {
                    return Err(ClientError::GameOver(Box::new(session.view(side))));
                }
                Err(SubmitError::AlreadySubmitted) => return Err(ClientError::AlreadySubmitted),
            }
            debug!("Session {}: side {} committed a move", session.id(), side);

            match self.settle_locked(&mut session) {
                Ok(Some(_)) => Step::Done(SubmitOutcome::Resolved(session.view(side))),
                Ok(None) => {
                    session.persist(self.store.as_ref());
                    let view = session.view(side);
                    if blocking {
                        Step::Wait(session.hub().register_waiter(side), view)
                    } else {
                        Step::Done(SubmitOutcome::Accepted(view))
                    }
                }
                Err(fault) => {
                    self.fault_locked(&mut session, &fault);
                    Step::Faulted
                }
            }
        };

        match step {
            Step::Done(outcome) => {
                self.retire_evicted().await;
                Ok(outcome)
            }
            Step::Faulted => {
                self.sessions.remove_session(&identity.session_id).await;
                Err(ClientError::SessionFaulted(identity.session_id))
            }
            Step::Wait(rx, accepted) => match timeout(self.config.long_poll_timeout, rx).await {
                Ok(Ok(view)) => Ok(SubmitOutcome::Resolved(view)),
                Ok(Err(_)) => {
                    // Waiter replaced or dropped; report what the duel looks like now
                    let view = self.get_state(token).await?;
                    if view.turn_number > accepted.turn_number {
                        Ok(SubmitOutcome::Resolved(view))
                    } else {
                        Ok(SubmitOutcome::Accepted(view))
                    }
                }
                Err(_) => Ok(SubmitOutcome::Accepted(accepted)),
            },
        }
    }

    /// Turn-timer expiry for `turn` of a duel.
    ///
    /// Plays `advance` for every side still missing a move and resolves.
    /// Ignored when the turn already resolved or the duel is over, so an
    /// expiry racing a submission resolves the turn at most once. Returns
    /// whether a resolution happened.
    pub async fn expire_turn(&self, session_id: &str, turn: u32) -> bool {
        let Some(handle) = self.sessions.get_session(session_id).await else {
            return false;
        };

        let outcome = {
            let mut session = handle.lock().await;
            let current = session.state.turn_number;
            if session.is_faulted() || session.state.is_over() || current != turn {
                debug!("Session {}: stale expiry for turn {}", session_id, turn);
                return false;
            }

            session.state.play_bot_move();
            let timed_out = session.state.inject_default_moves();
            info!(
                "Session {}: turn {} timed out, advance played for {:?}",
                session_id,
                turn + 1,
                timed_out
            );

            match self.resolve_locked(&mut session, timed_out) {
                Ok(_) => true,
                Err(fault) => {
                    self.fault_locked(&mut session, &fault);
                    false
                }
            }
        };

        if outcome {
            self.retire_evicted().await;
        } else {
            self.sessions.remove_session(session_id).await;
        }
        outcome
    }

    /// Let the bot answer, then resolve if both moves are in.
    fn settle_locked(&self, session: &mut DuelSession) -> Result<Option<TurnReport>, SessionFault> {
        if let Some(bot) = session.state.bot {
            if session.state.has_pending(bot.side.opponent()) {
                session.state.play_bot_move();
            }
        }
        if session.state.ready_to_resolve() {
            self.resolve_locked(session, Vec::new()).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Resolve the current turn and run every side effect of it.
    fn resolve_locked(
        &self,
        session: &mut DuelSession,
        timed_out: Vec<Side>,
    ) -> Result<TurnReport, SessionFault> {
        let report = session.state.resolve_turn(timed_out)?;
        debug!(
            "Session {}: turn {} {:?} ({} vs {}), distance {}",
            session.id(),
            report.record.turn,
            report.record.kind,
            report.record.moves.a,
            report.record.moves.b,
            report.record.distance_after
        );

        if report.ended {
            session.timer().disarm();
            self.archive_finished(session);
        } else {
            session.persist(self.store.as_ref());
            self.arm_timer(session);
        }

        let update = session.update();
        let woken = session.hub().publish(update);
        debug!("Session {}: woke {} waiters", session.id(), woken);

        Ok(report)
    }

    fn arm_timer(&self, session: &mut DuelSession) {
        if session.state.is_over() || session.is_faulted() {
            session.timer().disarm();
            return;
        }
        let id = session.id().clone();
        let turn = session.state.turn_number;
        let engine = self.this.clone();
        session.timer().arm(turn, move |turn| async move {
            if let Some(engine) = engine.upgrade() {
                engine.expire_turn(&id, turn).await;
            }
        });
    }

    /// Move a finished duel from the live records to the archive.
    ///
    /// The summary is appended before the live record is deleted, so the
    /// duel's id is always held by one of them. When the append fails the
    /// final snapshot is saved instead and the next restart archives it.
    fn archive_finished(&self, session: &mut DuelSession) {
        let Some(summary) = ArchivedDuel::from_state(&session.state, Utc::now()) else {
            return;
        };
        info!(
            "Session {} over after {} turns: {:?} ({}-{})",
            summary.session_id, summary.turns, summary.winner, summary.scores.a, summary.scores.b
        );

        match self.store.append_archive(&summary, self.config.history_limit) {
            Ok(()) => {
                if let Err(e) = self.store.delete_session(&summary.session_id) {
                    error!("Failed to delete finished session {}: {}", summary.session_id, e);
                }
            }
            Err(e) => {
                error!(
                    "Failed to archive session {}, keeping its record: {}",
                    summary.session_id, e
                );
                session.persist(self.store.as_ref());
            }
        }

        let mut history = self.history.lock();
        history.archived.push_back(summary);
        while history.archived.len() > self.config.history_limit {
            if let Some(old) = history.archived.pop_front() {
                history.retire.push(old.session_id);
            }
        }
    }

    fn fault_locked(&self, session: &mut DuelSession, fault: &SessionFault) {
        error!("Tearing down session: {}", fault);
        session.mark_faulted();
        if let Err(e) = self.store.delete_session(session.id()) {
            error!("Failed to delete faulted session {}: {}", session.id(), e);
        }
    }

    async fn retire_evicted(&self) {
        let ids = std::mem::take(&mut self.history.lock().retire);
        for id in ids {
            if self.sessions.remove_session(&id).await.is_some() {
                debug!("Session {} left the history", id);
            }
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Current view of the caller's duel.
    pub async fn get_state(&self, token: &str) -> Result<MatchView, ClientError> {
        let (identity, handle) = self
            .sessions
            .get_token_session(token)
            .await
            .ok_or(ClientError::UnknownToken)?;
        let session = handle.lock().await;
        if session.is_faulted() {
            return Err(ClientError::SessionFaulted(identity.session_id));
        }
        Ok(session.view(identity.side))
    }

    /// Current view plus a stream of updates for the caller's duel.
    pub async fn subscribe(&self, token: &str) -> Result<(MatchView, Subscription), ClientError> {
        let (identity, handle) = self
            .sessions
            .get_token_session(token)
            .await
            .ok_or(ClientError::UnknownToken)?;
        let session = handle.lock().await;
        Ok((session.view(identity.side), session.subscribe(Audience::Participant(identity.side))))
    }

    /// Neutral view plus a stream of updates for any duel.
    pub async fn spectate(
        &self,
        session_id: &str,
    ) -> Result<(SpectatorView, Subscription), ClientError> {
        let handle = self
            .sessions
            .get_session(session_id)
            .await
            .ok_or_else(|| ClientError::UnknownSession(session_id.to_string()))?;
        let session = handle.lock().await;
        Ok((session.spectator_view(), session.subscribe(Audience::Spectator)))
    }

    /// Most recent finished duels, newest first.
    pub fn recent_results(&self, limit: usize) -> Vec<ArchivedDuel> {
        self.history.lock().archived.iter().rev().take(limit).cloned().collect()
    }

    /// Engine counters.
    pub async fn stats(&self) -> EngineStats {
        let queued = self.queue.lock().await.len();
        let archived = self.history.lock().archived.len();
        let mut stats = EngineStats { queued, archived, ..Default::default() };
        for handle in self.sessions.all_sessions().await {
            if handle.lock().await.state.is_over() {
                stats.finished_sessions += 1;
            } else {
                stats.live_sessions += 1;
            }
        }
        stats
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// One maintenance pass: queue sweep plus history trimming.
    #[instrument(skip(self))]
    pub async fn run_maintenance(&self) -> usize {
        let evicted = self.sweep_queue().await;
        self.retire_evicted().await;
        if evicted > 0 {
            debug!("Maintenance evicted {} queue entries", evicted);
        }
        evicted
    }

    /// Run [`run_maintenance`](Self::run_maintenance) periodically until
    /// the engine is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_maintenance().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{DuelPhase, Winner};
    use crate::persist::MemoryStore;

    fn engine_with(config: EngineConfig) -> (Arc<DuelEngine>, MemoryStore) {
        let store = MemoryStore::new();
        (DuelEngine::new(config, Arc::new(store.clone())), store)
    }

    fn engine() -> (Arc<DuelEngine>, MemoryStore) {
        engine_with(EngineConfig::default())
    }

    async fn pair(engine: &DuelEngine) -> (String, String, SessionId) {
        let a = match engine.join_queue("ada", "10.0.0.1", false).await.unwrap() {
            JoinOutcome::Queued { token, .. } => token,
            other => panic!("Expected queued, got {:?}", other),
        };
        match engine.join_queue("bo", "10.0.0.2", false).await.unwrap() {
            JoinOutcome::Matched { token, view } => (a, token, view.session_id),
            other => panic!("Expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_pairs_fifo() {
        let (engine, store) = engine();
        let (a, b, id) = pair(&engine).await;
        assert_eq!(id, "duel-1");
        assert_eq!(store.queue_len(), 0);
        assert!(store.session("duel-1").is_some());

        let view_a = engine.get_state(&a).await.unwrap();
        let view_b = engine.get_state(&b).await.unwrap();
        assert_eq!(view_a.side, Side::A);
        assert_eq!(view_a.you, "ada");
        assert_eq!(view_b.opponent, "ada");
        assert_eq!(view_a.distance, 4);
        assert!(view_a.deadline_ms.is_some());
    }

    #[tokio::test]
    async fn test_no_self_match() {
        let (engine, _) = engine();
        engine.join_queue("ada", "10.0.0.1", false).await.unwrap();
        let second = engine.join_queue("ada", "10.0.0.1", false).await.unwrap();
        assert!(matches!(second, JoinOutcome::Queued { position: 2, .. }));
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let (engine, _) = engine();
        assert!(matches!(engine.join_queue("   ", "o", false).await, Err(ClientError::InvalidName(_))));
        let long = "x".repeat(100);
        assert!(matches!(engine.join_queue(&long, "o", false).await, Err(ClientError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_submit_and_resolve() {
        let (engine, _) = engine();
        let (a, b, _) = pair(&engine).await;

        let first = engine.submit_move(&a, "advance", false).await.unwrap();
        match first {
            SubmitOutcome::Accepted(view) => {
                assert!(view.your_move_in);
                assert_eq!(view.turn_number, 0);
            }
            other => panic!("Expected accepted, got {:?}", other),
        }

        let second = engine.submit_move(&b, "advance", false).await.unwrap();
        match second {
            SubmitOutcome::Resolved(view) => {
                assert_eq!(view.turn_number, 1);
                assert_eq!(view.distance, 2);
                assert!(!view.your_move_in);
            }
            other => panic!("Expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_errors() {
        let (engine, _) = engine();
        let (a, _, _) = pair(&engine).await;

        assert!(matches!(engine.submit_move("nope", "lunge", false).await, Err(ClientError::UnknownToken)));
        assert!(matches!(engine.submit_move(&a, "feint", false).await, Err(ClientError::InvalidMove(_))));

        engine.submit_move(&a, "parry", false).await.unwrap();
        let again = engine.submit_move(&a, "lunge", false).await;
        assert!(matches!(again, Err(ClientError::AlreadySubmitted)));
        assert_eq!(again.unwrap_err().code(), ErrorCode::AlreadySubmitted);

        // Rejections leave the duel untouched
        let view = engine.get_state(&a).await.unwrap();
        assert!(view.your_move_in);
        assert_eq!(view.turn_number, 0);
    }

    #[tokio::test]
    async fn test_blocking_submit_waits_for_opponent() {
        let (engine, _) = engine();
        let (a, b, _) = pair(&engine).await;

        let waiter = {
            let engine = engine.clone();
            let a = a.clone();
            tokio::spawn(async move { engine.submit_move(&a, "retreat", true).await })
        };
        // Let the blocking call park its waiter
        tokio::task::yield_now().await;
        while !engine.get_state(&a).await.unwrap().your_move_in {
            tokio::task::yield_now().await;
        }

        engine.submit_move(&b, "retreat", false).await.unwrap();
        match waiter.await.unwrap().unwrap() {
            SubmitOutcome::Resolved(view) => {
                assert_eq!(view.turn_number, 1);
                assert_eq!(view.distance, 6);
            }
            other => panic!("Expected resolved, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_submit_long_poll_cap() {
        let config = EngineConfig {
            long_poll_timeout: Duration::from_secs(5),
            turn_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let (engine, _) = engine_with(config);
        let (a, _, _) = pair(&engine).await;

        let outcome = engine.submit_move(&a, "parry", true).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_game_over_carries_final_view() {
        let config = EngineConfig { max_turns: 1, ..Default::default() };
        let (engine, store) = engine_with(config);
        let (a, b, id) = pair(&engine).await;

        engine.submit_move(&a, "parry", false).await.unwrap();
        let resolved = engine.submit_move(&b, "parry", false).await.unwrap();
        match resolved {
            SubmitOutcome::Resolved(view) => {
                assert_eq!(view.phase, DuelPhase::Over);
                assert_eq!(view.winner, Some(Winner::SuddenDeath));
                assert_eq!(view.deadline_ms, None);
            }
            other => panic!("Expected resolved, got {:?}", other),
        }

        match engine.submit_move(&a, "lunge", false).await {
            Err(ClientError::GameOver(view)) => assert_eq!(view.phase, DuelPhase::Over),
            other => panic!("Expected game over, got {:?}", other),
        }

        // Finished duels leave the live store and enter the archive
        assert!(store.session(&id).is_none());
        let results = engine.recent_results(10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_turn_auto_advances() {
        let config = EngineConfig { turn_timeout: Duration::from_secs(30), ..Default::default() };
        let (engine, _) = engine_with(config);
        let (a, _, _) = pair(&engine).await;

        engine.submit_move(&a, "retreat", false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let view = engine.get_state(&a).await.unwrap();
        assert_eq!(view.turn_number, 1);
        // retreat + advance nets zero
        assert_eq!(view.distance, 4);
    }

    #[tokio::test]
    async fn test_stale_expiry_is_ignored() {
        let (engine, _) = engine();
        let (a, b, id) = pair(&engine).await;
        engine.submit_move(&a, "parry", false).await.unwrap();
        engine.submit_move(&b, "parry", false).await.unwrap();

        assert!(!engine.expire_turn(&id, 0).await);
        assert_eq!(engine.get_state(&a).await.unwrap().turn_number, 1);
        assert!(engine.expire_turn(&id, 1).await);
        assert_eq!(engine.get_state(&a).await.unwrap().turn_number, 2);
    }

    #[tokio::test]
    async fn test_practice_bot_answers_immediately() {
        let (engine, _) = engine();
        let (token, view) = engine.start_practice("ada", "10.0.0.1", Difficulty::Hard).await.unwrap();
        assert_eq!(view.opponent, "Practice Bot (hard)");

        match engine.submit_move(&token, "parry", false).await.unwrap() {
            SubmitOutcome::Resolved(view) => assert_eq!(view.turn_number, 1),
            other => panic!("Expected resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_and_poll_queue() {
        let (engine, store) = engine();
        let token = match engine.join_queue("ada", "o1", false).await.unwrap() {
            JoinOutcome::Queued { token, .. } => token,
            other => panic!("Expected queued, got {:?}", other),
        };
        assert_eq!(engine.poll_queue(&token).await, QueueStatus::Queued { position: 1 });
        assert_eq!(store.queue_len(), 1);

        assert!(engine.leave_queue(&token).await);
        assert!(!engine.leave_queue(&token).await);
        assert_eq!(store.queue_len(), 0);
        assert_eq!(engine.poll_queue(&token).await, QueueStatus::Unknown);
    }

    #[tokio::test]
    async fn test_blocking_join_woken_by_pairing() {
        let (engine, _) = engine();
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.join_queue("ada", "o1", true).await })
        };
        while engine.stats().await.queued == 0 {
            tokio::task::yield_now().await;
        }

        let second = engine.join_queue("bo", "o2", false).await.unwrap();
        let (first_view, second_view) = match (first.await.unwrap().unwrap(), second) {
            (JoinOutcome::Matched { view: a, .. }, JoinOutcome::Matched { view: b, .. }) => (a, b),
            other => panic!("Expected two matches, got {:?}", other),
        };
        assert_eq!(first_view.session_id, second_view.session_id);
        assert_eq!(first_view.side, Side::A);
        assert_eq!(second_view.side, Side::B);
    }

    #[tokio::test]
    async fn test_blocking_join_woken_by_expiry() {
        let config = EngineConfig { queue_timeout: Duration::ZERO, ..Default::default() };
        let (engine, store) = engine_with(config);
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.join_queue("ada", "o1", true).await })
        };
        while engine.stats().await.queued == 0 {
            tokio::task::yield_now().await;
        }

        // The next join purges the stale entry before scanning
        let second = engine.join_queue("bo", "o2", false).await.unwrap();
        assert!(matches!(second, JoinOutcome::Queued { position: 1, .. }));
        assert!(matches!(first.await.unwrap().unwrap(), JoinOutcome::Expired { .. }));
        assert_eq!(store.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_spectator_stream() {
        let (engine, _) = engine();
        let (a, b, id) = pair(&engine).await;
        let (initial, mut sub) = engine.spectate(&id).await.unwrap();
        assert_eq!(initial.turn_number, 0);

        engine.submit_move(&a, "lunge", false).await.unwrap();
        engine.submit_move(&b, "parry", false).await.unwrap();

        match sub.next().await {
            Some(crate::network::hub::ScopedView::Spectator(view)) => {
                assert_eq!(view.turn_number, 1);
                assert_eq!((view.score_a, view.score_b), (0, 1));
            }
            other => panic!("Unexpected: {:?}", other),
        }
        assert!(matches!(engine.spectate("duel-99").await, Err(ClientError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_stop_play() {
        let (engine, store) = engine();
        let (a, b, _) = pair(&engine).await;
        store.set_failing(true);

        engine.submit_move(&a, "advance", false).await.unwrap();
        let outcome = engine.submit_move(&b, "advance", false).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Resolved(_)));
    }

    #[tokio::test]
    async fn test_failed_archive_keeps_final_record() {
        let config = EngineConfig { max_turns: 1, ..Default::default() };
        let (engine, store) = engine_with(config.clone());
        let (a, b, id) = pair(&engine).await;
        store.set_archive_failing(true);

        engine.submit_move(&a, "advance", false).await.unwrap();
        engine.submit_move(&b, "advance", false).await.unwrap();
        let kept = store.session(&id).unwrap();
        assert!(kept.state.is_over());
        drop(engine);

        store.set_archive_failing(false);
        let engine = DuelEngine::recover(config, Arc::new(store.clone())).await.unwrap();
        assert!(store.session(&id).is_none());
        assert_eq!(engine.recent_results(5)[0].session_id, id);
        let (_, view) = engine.start_practice("cy", "o3", Difficulty::Easy).await.unwrap();
        assert_eq!(view.session_id, "duel-2");
    }

    #[tokio::test]
    async fn test_history_eviction_releases_tokens() {
        let config = EngineConfig { max_turns: 1, history_limit: 1, ..Default::default() };
        let (engine, _) = engine_with(config);

        let (a1, b1, _) = pair(&engine).await;
        engine.submit_move(&a1, "parry", false).await.unwrap();
        engine.submit_move(&b1, "parry", false).await.unwrap();
        assert!(matches!(engine.get_state(&a1).await, Ok(_)));

        let (a2, b2, _) = pair(&engine).await;
        engine.submit_move(&a2, "parry", false).await.unwrap();
        engine.submit_move(&b2, "parry", false).await.unwrap();

        assert!(matches!(engine.get_state(&a1).await, Err(ClientError::UnknownToken)));
        assert!(engine.get_state(&a2).await.is_ok());
        let stats = engine.stats().await;
        assert_eq!(stats.finished_sessions, 1);
        assert_eq!(stats.archived, 1);
    }

    #[tokio::test]
    async fn test_maintenance_loop_wakes_expired_joiner() {
        let config = EngineConfig {
            queue_timeout: Duration::ZERO,
            sweep_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let (engine, store) = engine_with(config);
        let sweeper = engine.spawn_maintenance();

        let outcome = timeout(Duration::from_secs(5), engine.join_queue("ada", "o1", true))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Expired { .. }));
        assert_eq!(store.queue_len(), 0);
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_faulted_session_is_torn_down_alone() {
        let (engine, store) = engine();
        let (a, _, id) = pair(&engine).await;
        let (c, _, other) = {
            let c = match engine.join_queue("cy", "o3", false).await.unwrap() {
                JoinOutcome::Queued { token, .. } => token,
                other => panic!("Expected queued, got {:?}", other),
            };
            match engine.join_queue("di", "o4", false).await.unwrap() {
                JoinOutcome::Matched { token, view } => (c, token, view.session_id),
                other => panic!("Expected match, got {:?}", other),
            }
        };

        // Resolving with both moves missing breaks the duel's invariants
        {
            let handle = engine.sessions.get_session(&other).await.unwrap();
            let mut session = handle.lock().await;
            let fault = session.state.resolve_turn(Vec::new()).unwrap_err();
            engine.fault_locked(&mut session, &fault);
        }
        engine.sessions.remove_session(&other).await;

        assert!(matches!(engine.get_state(&c).await, Err(ClientError::UnknownToken)));
        assert!(store.session(&other).is_none());
        assert!(engine.get_state(&a).await.is_ok());
    }
}
