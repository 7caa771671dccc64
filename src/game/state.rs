//! Duel State
//!
//! One duel's state machine: turns, scores, distance and phase, plus the
//! step that merges both committed moves and runs the resolution rules.
//! Everything here is plain data and serializes as the persisted snapshot.

use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;
use crate::game::bot::{BotControl, choose_move};
use crate::game::moves::{Move, PerSide, Side};
use crate::game::rules::{resolve, ExchangeKind, TurnOutcome, RESET_DISTANCE};

/// Touches needed to win.
pub const TOUCHES_TO_WIN: u32 = 3;

/// Session identifier, `duel-<n>`.
pub type SessionId = String;

/// Prefix of every session id.
pub const SESSION_ID_PREFIX: &str = "duel-";

/// Format a session id from its counter value.
pub fn session_id_for(n: u64) -> SessionId {
    format!("{}{}", SESSION_ID_PREFIX, n)
}

/// Numeric suffix of a session id, if it has one.
pub fn session_id_number(id: &str) -> Option<u64> {
    id.strip_prefix(SESSION_ID_PREFIX)?.parse().ok()
}

// =============================================================================
// PHASE / WINNER
// =============================================================================

/// Duel phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelPhase {
    /// Accepting moves for the current turn.
    Input,
    /// Finished. Terminal.
    Over,
}

/// How a duel ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// Side A won.
    A,
    /// Side B won.
    B,
    /// Both reached the touch limit together, or tied at the turn limit.
    SuddenDeath,
}

impl From<Side> for Winner {
    fn from(side: Side) -> Self {
        match side {
            Side::A => Winner::A,
            Side::B => Winner::B,
        }
    }
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// Who is fencing on one side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Name shown to the opponent and spectators.
    pub display_name: String,
    /// Network origin the participant joined from.
    pub origin_key: String,
}

impl Participant {
    /// Create a participant.
    pub fn new(display_name: impl Into<String>, origin_key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            origin_key: origin_key.into(),
        }
    }
}

/// One resolved turn, kept for the duel's transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Turn number after resolution (1-based).
    pub turn: u32,
    /// Moves that were resolved.
    pub moves: PerSide<Move>,
    /// Sides whose move was injected by the turn timer.
    pub timed_out: Vec<Side>,
    /// What happened.
    pub kind: ExchangeKind,
    /// Distance after the exchange.
    pub distance_after: u8,
}

/// Report of one resolution, handed to the notification path.
#[derive(Clone, Debug)]
pub struct TurnReport {
    /// The transcript entry that was appended.
    pub record: TurnRecord,
    /// Resolution details.
    pub outcome: TurnOutcome,
    /// The duel ended with this turn.
    pub ended: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Rejected move submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The duel is over.
    #[error("Duel is over")]
    GameOver,
    /// This side already committed a move this turn.
    #[error("Move already submitted this turn")]
    AlreadySubmitted,
}

/// Broken invariant inside one duel.
///
/// Fatal to that duel only; the engine tears the duel down and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFault {
    /// Resolution was attempted with a move missing.
    #[error("Session {session_id}: resolving turn {turn} without a move from side {side}")]
    MissingMove {
        /// Faulted session.
        session_id: SessionId,
        /// Turn being resolved.
        turn: u32,
        /// Side without a move.
        side: Side,
    },
    /// Resolution was attempted on a finished duel.
    #[error("Session {session_id}: resolving a turn after the duel ended")]
    AlreadyOver {
        /// Faulted session.
        session_id: SessionId,
    },
}

// =============================================================================
// DUEL STATE
// =============================================================================

/// Full state of one duel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelState {
    /// Unique session id.
    pub id: SessionId,
    /// Current phase.
    pub phase: DuelPhase,
    /// Resolved turns so far.
    pub turn_number: u32,
    /// Current distance, always in `[1, 6]`.
    pub distance: u8,
    /// Touches per side.
    pub scores: PerSide<u32>,
    /// Moves committed for the current turn.
    pub pending: PerSide<Option<Move>>,
    /// Narrative of the last resolution.
    pub last_narrative: String,
    /// Set once the duel is over.
    pub winner: Option<Winner>,
    /// Turn limit.
    pub max_turns: u32,
    /// Who is fencing.
    pub participants: PerSide<Participant>,
    /// Bot-controlled side, for practice duels.
    pub bot: Option<BotControl>,
    /// RNG for the lunge coin and bot choices.
    pub rng: DeterministicRng,
    /// Resolved turns.
    pub transcript: Vec<TurnRecord>,
}

impl DuelState {
    /// Create a new duel waiting for the first turn's moves.
    pub fn new(
        id: SessionId,
        participants: PerSide<Participant>,
        max_turns: u32,
        bot: Option<BotControl>,
        rng: DeterministicRng,
    ) -> Self {
        Self {
            id,
            phase: DuelPhase::Input,
            turn_number: 0,
            distance: RESET_DISTANCE,
            scores: PerSide::new(0, 0),
            pending: PerSide::new(None, None),
            last_narrative: "En garde!".to_string(),
            winner: None,
            max_turns: max_turns.max(1),
            participants,
            bot,
            rng,
            transcript: Vec::new(),
        }
    }

    /// Is the duel over?
    #[inline]
    pub fn is_over(&self) -> bool {
        self.phase == DuelPhase::Over
    }

    /// Has this side committed a move this turn?
    #[inline]
    pub fn has_pending(&self, side: Side) -> bool {
        self.pending.get(side).is_some()
    }

    /// Are both moves in?
    pub fn ready_to_resolve(&self) -> bool {
        self.phase == DuelPhase::Input && self.pending.a.is_some() && self.pending.b.is_some()
    }

    /// Sides still owing a move this turn.
    pub fn missing_sides(&self) -> Vec<Side> {
        if self.is_over() {
            return Vec::new();
        }
        Side::BOTH
            .into_iter()
            .filter(|side| !self.has_pending(*side))
            .collect()
    }

    /// Commit a move for one side.
    pub fn submit(&mut self, side: Side, mv: Move) -> Result<(), SubmitError> {
        if self.is_over() {
            return Err(SubmitError::GameOver);
        }
        if self.has_pending(side) {
            return Err(SubmitError::AlreadySubmitted);
        }
        *self.pending.get_mut(side) = Some(mv);
        Ok(())
    }

    /// Commit the bot's move if the bot side still owes one.
    ///
    /// Returns the move that was chosen.
    pub fn play_bot_move(&mut self) -> Option<Move> {
        let bot = self.bot?;
        if self.is_over() || self.has_pending(bot.side) {
            return None;
        }

        let opponent_last = self.transcript.last().map(|t| *t.moves.get(bot.side.opponent()));
        let mv = choose_move(
            bot.difficulty,
            self.distance,
            *self.scores.get(bot.side),
            *self.scores.get(bot.side.opponent()),
            opponent_last,
            &mut self.rng,
        );
        *self.pending.get_mut(bot.side) = Some(mv);
        Some(mv)
    }

    /// Fill every missing move with `advance`.
    ///
    /// Returns the sides that were filled in.
    pub fn inject_default_moves(&mut self) -> Vec<Side> {
        let missing = self.missing_sides();
        for side in &missing {
            *self.pending.get_mut(*side) = Some(Move::Advance);
        }
        missing
    }

    /// Resolve the current turn.
    ///
    /// Applies scores and distance, advances the turn counter, clears the
    /// pending moves and runs the win check, all in one step.
    pub fn resolve_turn(&mut self, timed_out: Vec<Side>) -> Result<TurnReport, SessionFault> {
        if self.is_over() {
            return Err(SessionFault::AlreadyOver { session_id: self.id.clone() });
        }

        let (move_a, move_b) = match (self.pending.a, self.pending.b) {
            (Some(a), Some(b)) => (a, b),
            (a, _) => {
                let side = if a.is_none() { Side::A } else { Side::B };
                return Err(SessionFault::MissingMove {
                    session_id: self.id.clone(),
                    turn: self.turn_number + 1,
                    side,
                });
            }
        };

        let outcome = resolve(move_a, move_b, self.distance, &mut self.rng);

        if outcome.score_a {
            self.scores.a += 1;
        }
        if outcome.score_b {
            self.scores.b += 1;
        }
        self.distance = outcome.new_distance;
        self.turn_number += 1;
        self.pending = PerSide::new(None, None);
        self.last_narrative = outcome.narrative.clone();

        let record = TurnRecord {
            turn: self.turn_number,
            moves: PerSide::new(move_a, move_b),
            timed_out,
            kind: outcome.kind,
            distance_after: self.distance,
        };
        self.transcript.push(record.clone());

        if let Some(winner) = self.check_winner() {
            self.winner = Some(winner);
            self.phase = DuelPhase::Over;
            self.last_narrative = format!("{} {}", self.last_narrative, self.final_call(winner));
        }

        Ok(TurnReport {
            record,
            outcome,
            ended: self.is_over(),
        })
    }

    fn check_winner(&self) -> Option<Winner> {
        let a = self.scores.a;
        let b = self.scores.b;

        if a >= TOUCHES_TO_WIN && b >= TOUCHES_TO_WIN {
            return Some(Winner::SuddenDeath);
        }
        if a >= TOUCHES_TO_WIN {
            return Some(Winner::A);
        }
        if b >= TOUCHES_TO_WIN {
            return Some(Winner::B);
        }
        if self.turn_number >= self.max_turns {
            return Some(match a.cmp(&b) {
                std::cmp::Ordering::Greater => Winner::A,
                std::cmp::Ordering::Less => Winner::B,
                std::cmp::Ordering::Equal => Winner::SuddenDeath,
            });
        }
        None
    }

    fn final_call(&self, winner: Winner) -> String {
        match winner {
            Winner::A => format!("{} wins the bout!", self.participants.a.display_name),
            Winner::B => format!("{} wins the bout!", self.participants.b.display_name),
            Winner::SuddenDeath => "The bout ends level: sudden death!".to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
