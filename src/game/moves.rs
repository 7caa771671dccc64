//! Moves and Sides
//!
//! The four legal move tokens and the two sides of a duel.
//! Parsing is strict: anything other than the four lowercase tokens
//! (surrounding whitespace and case are ignored) is rejected.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// A committed move for one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    /// Step toward the opponent (distance -1).
    Advance,
    /// Step away from the opponent (distance +1).
    Retreat,
    /// Attack; scores at distance 1, sometimes at 2, whiffs beyond.
    Lunge,
    /// Hold ground and counter any lunge.
    Parry,
}

/// Every legal move, in the order clients are shown them.
pub const LEGAL_MOVES: [Move; 4] = [Move::Advance, Move::Retreat, Move::Lunge, Move::Parry];

impl Move {
    /// Distance change contributed by this move when it is applied as movement.
    #[inline]
    pub fn delta(self) -> i32 {
        match self {
            Move::Advance => -1,
            Move::Retreat => 1,
            Move::Lunge | Move::Parry => 0,
        }
    }

    /// Wire token for this move.
    pub fn as_str(self) -> &'static str {
        match self {
            Move::Advance => "advance",
            Move::Retreat => "retreat",
            Move::Lunge => "lunge",
            Move::Parry => "parry",
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected move token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a legal move (expected advance, retreat, lunge or parry)")]
pub struct ParseMoveError(pub String);

impl FromStr for Move {
    type Err = ParseMoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance" => Ok(Move::Advance),
            "retreat" => Ok(Move::Retreat),
            "lunge" => Ok(Move::Lunge),
            "parry" => Ok(Move::Parry),
            _ => Err(ParseMoveError(s.to_string())),
        }
    }
}

/// One of the two fencers in a duel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The first participant (the earlier queue entry).
    A,
    /// The second participant.
    B,
}

impl Side {
    /// The other side.
    #[inline]
    pub fn opponent(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Both sides, A first.
    pub const BOTH: [Side; 2] = [Side::A, Side::B];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// A value held per side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    /// Side A's value.
    pub a: T,
    /// Side B's value.
    pub b: T,
}

impl<T> PerSide<T> {
    /// Build from both values.
    pub const fn new(a: T, b: T) -> Self {
        Self { a, b }
    }

    /// Borrow the value for a side.
    #[inline]
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    /// Mutably borrow the value for a side.
    #[inline]
    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }
}
