//! Game Logic Module
//!
//! Duel rules and state. Deterministic given the duel's RNG state.
//!
//! ## Module Structure
//!
//! - `moves`: Move tokens, sides, per-side values
//! - `rules`: Pure resolution of one exchange
//! - `state`: Per-duel state machine and win checks
//! - `bot`: Practice bot move selection

pub mod moves;
pub mod rules;
pub mod state;
pub mod bot;

// Re-export key types
pub use moves::{Move, Side, PerSide, LEGAL_MOVES};
pub use rules::{resolve, TurnOutcome, ExchangeKind};
pub use state::{DuelState, DuelPhase, Winner, Participant, SessionId, SessionFault};
pub use bot::{BotControl, Difficulty};
