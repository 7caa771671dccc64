//! Protocol Messages
//!
//! Views handed to callers and the JSON wire format used by the WebSocket
//! adapter. Participants get a view scoped to their own side; spectators
//! get a neutral one.

use serde::{Deserialize, Serialize};

use crate::game::bot::Difficulty;
use crate::game::moves::{Move, Side, LEGAL_MOVES};
use crate::game::state::{DuelPhase, DuelState, SessionId, Winner};
use crate::persist::ArchivedDuel;

// =============================================================================
// VIEWS
// =============================================================================

/// Result of a finished duel from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelResult {
    /// You won.
    Won,
    /// Your opponent won.
    Lost,
    /// Nobody won outright.
    SuddenDeath,
}

/// A participant's view of their duel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchView {
    /// Session id.
    pub session_id: SessionId,
    /// Which side you fence on.
    pub side: Side,
    /// Your display name.
    pub you: String,
    /// Opponent's display name.
    pub opponent: String,
    /// Resolved turns so far.
    pub turn_number: u32,
    /// Current distance.
    pub distance: u8,
    /// Your touches.
    pub your_score: u32,
    /// Opponent's touches.
    pub opponent_score: u32,
    /// Narrative of the last resolution.
    pub last_narrative: String,
    /// Always the four legal moves.
    pub legal_moves: Vec<Move>,
    /// Current phase.
    pub phase: DuelPhase,
    /// Winner once the duel is over.
    pub winner: Option<Winner>,
    /// The winner, from your side.
    pub result: Option<DuelResult>,
    /// Your move for this turn is in.
    pub your_move_in: bool,
    /// Opponent's move for this turn is in.
    pub opponent_move_in: bool,
    /// When the turn timer fires (unix millis), if armed.
    pub deadline_ms: Option<i64>,
}

impl MatchView {
    /// Build the view for one side.
    pub fn for_side(state: &DuelState, side: Side, deadline_ms: Option<i64>) -> Self {
        let opp = side.opponent();
        let result = state.winner.map(|w| match (w, side) {
            (Winner::SuddenDeath, _) => DuelResult::SuddenDeath,
            (Winner::A, Side::A) | (Winner::B, Side::B) => DuelResult::Won,
            _ => DuelResult::Lost,
        });

        Self {
            session_id: state.id.clone(),
            side,
            you: state.participants.get(side).display_name.clone(),
            opponent: state.participants.get(opp).display_name.clone(),
            turn_number: state.turn_number,
            distance: state.distance,
            your_score: *state.scores.get(side),
            opponent_score: *state.scores.get(opp),
            last_narrative: state.last_narrative.clone(),
            legal_moves: LEGAL_MOVES.to_vec(),
            phase: state.phase,
            winner: state.winner,
            result,
            your_move_in: state.has_pending(side),
            opponent_move_in: state.has_pending(opp),
            deadline_ms,
        }
    }
}

/// Neutral view of a duel for spectators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectatorView {
    /// Session id.
    pub session_id: SessionId,
    /// Side A's display name.
    pub name_a: String,
    /// Side B's display name.
    pub name_b: String,
    /// Side A's touches.
    pub score_a: u32,
    /// Side B's touches.
    pub score_b: u32,
    /// Resolved turns so far.
    pub turn_number: u32,
    /// Current distance.
    pub distance: u8,
    /// Narrative of the last resolution.
    pub last_narrative: String,
    /// Current phase.
    pub phase: DuelPhase,
    /// Winner once the duel is over.
    pub winner: Option<Winner>,
    /// When the turn timer fires (unix millis), if armed.
    pub deadline_ms: Option<i64>,
}

impl SpectatorView {
    /// Build the neutral view.
    pub fn from_state(state: &DuelState, deadline_ms: Option<i64>) -> Self {
        Self {
            session_id: state.id.clone(),
            name_a: state.participants.a.display_name.clone(),
            name_b: state.participants.b.display_name.clone(),
            score_a: state.scores.a,
            score_b: state.scores.b,
            turn_number: state.turn_number,
            distance: state.distance,
            last_narrative: state.last_narrative.clone(),
            phase: state.phase,
            winner: state.winner,
            deadline_ms,
        }
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the matchmaking queue.
    JoinQueue {
        /// Name to fence under.
        display_name: String,
        /// Wait for an opponent before answering.
        #[serde(default)]
        blocking: bool,
    },

    /// Check on a queued token.
    PollQueue {
        /// Queue token.
        token: String,
    },

    /// Leave the queue.
    LeaveQueue {
        /// Queue token.
        token: String,
    },

    /// Commit a move for the current turn.
    SubmitMove {
        /// Participant token.
        token: String,
        /// One of `advance`, `retreat`, `lunge`, `parry`.
        #[serde(rename = "move")]
        move_token: String,
        /// Wait for the turn to resolve before answering.
        #[serde(default)]
        blocking: bool,
    },

    /// Read the current state of your duel.
    GetState {
        /// Participant token.
        token: String,
    },

    /// Stream updates for your duel.
    Subscribe {
        /// Participant token.
        token: String,
    },

    /// Start a practice duel against the bot.
    Practice {
        /// Name to fence under.
        display_name: String,
        /// Bot strength.
        #[serde(default)]
        difficulty: Difficulty,
    },

    /// Watch a duel.
    Spectate {
        /// Session to watch.
        session_id: SessionId,
    },

    /// Most recent finished duels.
    RecentResults {
        /// How many to return.
        #[serde(default = "default_results_limit")]
        limit: usize,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

fn default_results_limit() -> usize {
    10
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Waiting in the queue.
    Queued {
        /// Queue token; becomes the participant token once matched.
        token: String,
        /// 1-based position in the queue.
        position: usize,
    },

    /// Paired with an opponent (or a practice bot).
    Matched {
        /// Participant token.
        token: String,
        /// Your view of the new duel.
        view: MatchView,
    },

    /// The queue entry went stale; rejoin to keep waiting.
    QueueExpired {
        /// The expired token.
        token: String,
    },

    /// The queue entry was removed at the caller's request.
    QueueLeft {
        /// The removed token.
        token: String,
    },

    /// Move recorded; the turn is still waiting on the opponent.
    Accepted {
        /// Current view.
        view: MatchView,
    },

    /// The turn resolved.
    Resolved {
        /// Post-resolution view.
        view: MatchView,
    },

    /// Current state, on request or streamed.
    State {
        /// Current view.
        view: MatchView,
    },

    /// Neutral state for spectators, on request or streamed.
    Spectator {
        /// Current view.
        view: SpectatorView,
    },

    /// Most recent finished duels, newest first.
    Results {
        /// Summaries.
        duels: Vec<ArchivedDuel>,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (unix millis).
        server_time: u64,
    },

    /// Request rejected.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Structured rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Terminal view, when the duel is already over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<MatchView>,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Token is not bound to any duel or queue entry.
    UnknownToken,
    /// No such session.
    UnknownSession,
    /// The duel is over.
    GameOver,
    /// Move already committed this turn.
    AlreadySubmitted,
    /// Not one of the four moves.
    InvalidMove,
    /// Display name rejected.
    InvalidName,
    /// Message could not be parsed.
    InvalidMessage,
    /// Server-side failure.
    InternalError,
}

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
