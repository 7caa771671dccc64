//! Practice Bot
//!
//! Move selection for the bot side of a practice duel. Choices are weighted
//! tables keyed on distance, drawn from the duel's own RNG so a restored
//! duel keeps making the same choices.

use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;
use crate::game::moves::{Move, Side};

/// Bot strength.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Near-random footwork.
    Easy,
    /// Sensible distance play.
    #[default]
    Normal,
    /// Reads the opponent's last move and the scoreboard.
    Hard,
}

/// Which side the bot plays and how well.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotControl {
    /// Bot side.
    pub side: Side,
    /// Bot strength.
    pub difficulty: Difficulty,
}

// Weight order: advance, retreat, lunge, parry
const ORDER: [Move; 4] = [Move::Advance, Move::Retreat, Move::Lunge, Move::Parry];

/// Pick the bot's move for this turn.
pub fn choose_move(
    difficulty: Difficulty,
    distance: u8,
    own_score: u32,
    opponent_score: u32,
    opponent_last: Option<Move>,
    rng: &mut DeterministicRng,
) -> Move {
    let weights = match difficulty {
        Difficulty::Easy => easy_weights(distance),
        Difficulty::Normal => normal_weights(distance),
        Difficulty::Hard => hard_weights(distance, own_score, opponent_score, opponent_last),
    };

    rng.weighted_index(&weights)
        .map(|idx| ORDER[idx])
        .unwrap_or(Move::Advance)
}

fn easy_weights(distance: u8) -> [u32; 4] {
    match distance {
        1 => [2, 3, 3, 2],
        _ => [4, 2, 2, 2],
    }
}

fn normal_weights(distance: u8) -> [u32; 4] {
    match distance {
        1 => [0, 2, 5, 3],
        2 => [3, 1, 4, 2],
        3 => [6, 1, 0, 3],
        _ => [8, 1, 0, 1],
    }
}

fn hard_weights(
    distance: u8,
    own_score: u32,
    opponent_score: u32,
    opponent_last: Option<Move>,
) -> [u32; 4] {
    let mut w: [u32; 4] = match distance {
        1 => [0, 2, 5, 4],
        2 => [2, 2, 4, 4],
        3 => [5, 1, 0, 4],
        _ => [8, 1, 0, 1],
    };

    // Someone who just lunged tends to lunge again
    if opponent_last == Some(Move::Lunge) && distance <= 2 {
        w[3] += 4;
    }
    // Someone who just parried gets walked into, not lunged at
    if opponent_last == Some(Move::Parry) {
        w[2] = w[2].saturating_sub(2);
        w[0] += 1;
    }
    // Protect a lead by keeping distance
    if own_score > opponent_score && distance <= 2 {
        w[1] += 3;
    }

    w
}
