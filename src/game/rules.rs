//! Move Resolution
//!
//! Pure resolution of one simultaneous exchange. Given both committed
//! moves, the current distance and a coin, produces the new distance,
//! who scored and a one-line narrative. No I/O, no shared state; the only
//! randomness is the injected coin used by a lunge at distance 2.
//!
//! Rules are checked in priority order and the first match wins:
//!
//! 1. Both lunge at distance 1: double hit, both score.
//! 2. Lunge against parry: riposte, the parrying side scores.
//! 3. Lunge against a step: hits at 1, coin flip at 2, whiffs from 3
//!    (the attacker loses a step and the other side's step still applies).
//! 4. Parry against a step: the parry is wasted, the step applies.
//! 5. Nobody lunges: both steps apply; two advances meeting at 1 are a clash.
//!
//! A single touch resets the fencers to [`RESET_DISTANCE`]. A double hit
//! leaves the distance where it was.

use serde::{Deserialize, Serialize};

use crate::core::rng::CoinFlip;
use crate::game::moves::{Move, Side};

/// Closest the fencers can be.
pub const MIN_DISTANCE: u8 = 1;

/// Farthest the fencers can be.
pub const MAX_DISTANCE: u8 = 6;

/// Distance after a single touch (and at the start of a duel).
pub const RESET_DISTANCE: u8 = 4;

/// What kind of exchange happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Both lunged at distance 1 and both scored.
    DoubleHit,
    /// Both lunged out of range and both fell short.
    CrossedLunges,
    /// The parrying side countered a lunge.
    Riposte {
        /// Side that parried and scored.
        by: Side,
    },
    /// A lunge landed.
    Touch {
        /// Side that lunged and scored.
        by: Side,
    },
    /// A lunge at distance 2 lost the coin flip.
    ShortLunge {
        /// Side that lunged.
        by: Side,
    },
    /// A lunge from distance 3 or more missed and exposed the attacker.
    Whiff {
        /// Side that lunged.
        by: Side,
    },
    /// A parry met no attack.
    WastedParry {
        /// Side that parried.
        by: Side,
    },
    /// Both advanced into each other at the closest distance.
    Clash,
    /// Plain footwork.
    Footwork,
}

/// Result of resolving one exchange.
///
/// Scores are flags for this exchange only; the session applies them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Distance after the exchange, always in `[MIN_DISTANCE, MAX_DISTANCE]`.
    pub new_distance: u8,
    /// Side A scored a touch.
    pub score_a: bool,
    /// Side B scored a touch.
    pub score_b: bool,
    /// What happened.
    pub kind: ExchangeKind,
    /// Human-readable description.
    pub narrative: String,
}

impl TurnOutcome {
    fn new(
        new_distance: i32,
        score_a: bool,
        score_b: bool,
        kind: ExchangeKind,
        narrative: String,
    ) -> Self {
        Self {
            new_distance: clamp_distance(new_distance),
            score_a,
            score_b,
            kind,
            narrative,
        }
    }

    fn touch(by: Side, distance: u8, kind: ExchangeKind, narrative: String) -> Self {
        Self::new(distance as i32, by == Side::A, by == Side::B, kind, narrative)
    }

    /// Did exactly one side score?
    #[inline]
    pub fn single_scorer(&self) -> Option<Side> {
        match (self.score_a, self.score_b) {
            (true, false) => Some(Side::A),
            (false, true) => Some(Side::B),
            _ => None,
        }
    }
}

/// Clamp any distance into the legal range.
#[inline]
pub fn clamp_distance(distance: i32) -> u8 {
    distance.clamp(MIN_DISTANCE as i32, MAX_DISTANCE as i32) as u8
}

/// Resolve one exchange.
///
/// Total over every move pair and every distance; distances outside the
/// legal range are clamped before the rules run.
pub fn resolve<C: CoinFlip + ?Sized>(
    move_a: Move,
    move_b: Move,
    distance: u8,
    coin: &mut C,
) -> TurnOutcome {
    let distance = clamp_distance(distance as i32);
    let mut outcome = resolve_exchange(move_a, move_b, distance, coin);

    if outcome.single_scorer().is_some() {
        outcome.new_distance = RESET_DISTANCE;
    }

    outcome
}

fn resolve_exchange<C: CoinFlip + ?Sized>(
    move_a: Move,
    move_b: Move,
    distance: u8,
    coin: &mut C,
) -> TurnOutcome {
    let d = distance as i32;

    match (move_a, move_b) {
        (Move::Lunge, Move::Lunge) if distance == MIN_DISTANCE => TurnOutcome::new(
            d,
            true,
            true,
            ExchangeKind::DoubleHit,
            "Both fencers lunge at once: double hit, a touch each!".to_string(),
        ),
        (Move::Lunge, Move::Lunge) => TurnOutcome::new(
            d - 2,
            false,
            false,
            ExchangeKind::CrossedLunges,
            "Both fencers lunge from too far out and fall short, ending up closer.".to_string(),
        ),
        (Move::Lunge, Move::Parry) => riposte(Side::B, distance),
        (Move::Parry, Move::Lunge) => riposte(Side::A, distance),
        (Move::Lunge, other) => lunge_against(Side::A, other, distance, coin),
        (other, Move::Lunge) => lunge_against(Side::B, other, distance, coin),
        (Move::Parry, other) if other != Move::Parry => wasted_parry(Side::A, other, distance),
        (other, Move::Parry) if other != Move::Parry => wasted_parry(Side::B, other, distance),
        _ => footwork(move_a, move_b, distance),
    }
}

fn riposte(by: Side, distance: u8) -> TurnOutcome {
    TurnOutcome::touch(
        by,
        distance,
        ExchangeKind::Riposte { by },
        format!("Fencer {} parries the lunge and ripostes for a touch!", by),
    )
}

fn lunge_against<C: CoinFlip + ?Sized>(
    attacker: Side,
    other: Move,
    distance: u8,
    coin: &mut C,
) -> TurnOutcome {
    let defender = attacker.opponent();
    let d = distance as i32;

    match distance {
        1 => TurnOutcome::touch(
            attacker,
            distance,
            ExchangeKind::Touch { by: attacker },
            format!("Fencer {} lunges at close range and lands a touch!", attacker),
        ),
        2 => {
            if coin.flip() {
                TurnOutcome::touch(
                    attacker,
                    distance,
                    ExchangeKind::Touch { by: attacker },
                    format!(
                        "Fencer {} stretches into a long lunge and just reaches: touch!",
                        attacker
                    ),
                )
            } else {
                TurnOutcome::new(
                    d + other.delta(),
                    false,
                    false,
                    ExchangeKind::ShortLunge { by: attacker },
                    format!(
                        "Fencer {} lunges but comes up short as fencer {} {}s.",
                        attacker, defender, other
                    ),
                )
            }
        }
        _ => TurnOutcome::new(
            d - 1 + other.delta(),
            false,
            false,
            ExchangeKind::Whiff { by: attacker },
            format!(
                "Fencer {} lunges from far out and whiffs, left exposed as fencer {} {}s.",
                attacker, defender, other
            ),
        ),
    }
}

fn wasted_parry(by: Side, other: Move, distance: u8) -> TurnOutcome {
    TurnOutcome::new(
        distance as i32 + other.delta(),
        false,
        false,
        ExchangeKind::WastedParry { by },
        format!(
            "Fencer {} parries at nothing while fencer {} {}s.",
            by,
            by.opponent(),
            other
        ),
    )
}

fn footwork(move_a: Move, move_b: Move, distance: u8) -> TurnOutcome {
    let raw = distance as i32 + move_a.delta() + move_b.delta();

    if move_a == Move::Advance && move_b == Move::Advance && raw <= MIN_DISTANCE as i32 {
        return TurnOutcome::new(
            MIN_DISTANCE as i32,
            false,
            false,
            ExchangeKind::Clash,
            "Both fencers advance into each other: blades clash at close quarters!".to_string(),
        );
    }

    let narrative = match (move_a, move_b) {
        (Move::Parry, Move::Parry) => "Both fencers hold their guard.".to_string(),
        (Move::Advance, Move::Advance) => "Both fencers advance, closing the gap.".to_string(),
        (Move::Retreat, Move::Retreat) => "Both fencers retreat, opening the gap.".to_string(),
        _ => format!("Fencer A {}s, fencer B {}s.", move_a, move_b),
    };

    TurnOutcome::new(raw, false, false, ExchangeKind::Footwork, narrative)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::{DeterministicRng, FixedCoin};
    use crate::game::moves::LEGAL_MOVES;
    use proptest::prelude::*;

    fn heads() -> FixedCoin {
        FixedCoin(true)
    }

    fn tails() -> FixedCoin {
        FixedCoin(false)
    }

    #[test]
    fn test_double_hit_keeps_distance() {
        let out = resolve(Move::Lunge, Move::Lunge, 1, &mut heads());
        assert!(out.score_a && out.score_b);
        assert_eq!(out.kind, ExchangeKind::DoubleHit);
        assert!(out.narrative.contains("double hit"));
        assert_eq!(out.new_distance, 1);
    }

    #[test]
    fn test_crossed_lunges_out_of_range() {
        let out = resolve(Move::Lunge, Move::Lunge, 4, &mut heads());
        assert!(!out.score_a && !out.score_b);
        assert_eq!(out.kind, ExchangeKind::CrossedLunges);
        assert_eq!(out.new_distance, 2);

        let out = resolve(Move::Lunge, Move::Lunge, 2, &mut heads());
        assert_eq!(out.new_distance, 1);
    }

    #[test]
    fn test_riposte_at_any_distance() {
        for d in MIN_DISTANCE..=MAX_DISTANCE {
            let out = resolve(Move::Lunge, Move::Parry, d, &mut heads());
            assert_eq!(out.kind, ExchangeKind::Riposte { by: Side::B });
            assert!(!out.score_a && out.score_b);
            assert_eq!(out.new_distance, RESET_DISTANCE);

            let out = resolve(Move::Parry, Move::Lunge, d, &mut tails());
            assert_eq!(out.single_scorer(), Some(Side::A));
        }
    }

    #[test]
    fn test_lunge_lands_at_one() {
        let out = resolve(Move::Lunge, Move::Retreat, 1, &mut tails());
        assert_eq!(out.kind, ExchangeKind::Touch { by: Side::A });
        assert_eq!(out.new_distance, RESET_DISTANCE);

        let out = resolve(Move::Advance, Move::Lunge, 1, &mut tails());
        assert_eq!(out.single_scorer(), Some(Side::B));
    }

    #[test]
    fn test_lunge_at_two_follows_coin() {
        let hit = resolve(Move::Lunge, Move::Advance, 2, &mut heads());
        assert_eq!(hit.single_scorer(), Some(Side::A));
        assert_eq!(hit.new_distance, RESET_DISTANCE);

        let miss = resolve(Move::Lunge, Move::Retreat, 2, &mut tails());
        assert_eq!(miss.kind, ExchangeKind::ShortLunge { by: Side::A });
        assert!(!miss.score_a && !miss.score_b);
        // Only the defender's retreat applies
        assert_eq!(miss.new_distance, 3);

        let miss = resolve(Move::Advance, Move::Lunge, 2, &mut tails());
        assert_eq!(miss.new_distance, 1);
    }

    #[test]
    fn test_whiff_penalty_stacks_with_retreat() {
        let out = resolve(Move::Lunge, Move::Retreat, 3, &mut heads());
        assert_eq!(out.kind, ExchangeKind::Whiff { by: Side::A });
        assert_eq!(out.new_distance, 3);
    }

    #[test]
    fn test_whiff_penalty_stacks_with_advance() {
        let out = resolve(Move::Advance, Move::Lunge, 3, &mut heads());
        assert_eq!(out.kind, ExchangeKind::Whiff { by: Side::B });
        assert_eq!(out.new_distance, 1);

        let out = resolve(Move::Lunge, Move::Advance, 6, &mut heads());
        assert_eq!(out.new_distance, 4);
    }

    #[test]
    fn test_wasted_parry_applies_other_step() {
        let out = resolve(Move::Parry, Move::Advance, 5, &mut heads());
        assert_eq!(out.kind, ExchangeKind::WastedParry { by: Side::A });
        assert_eq!(out.new_distance, 4);

        let out = resolve(Move::Retreat, Move::Parry, 6, &mut heads());
        assert_eq!(out.kind, ExchangeKind::WastedParry { by: Side::B });
        assert_eq!(out.new_distance, 6);
    }

    #[test]
    fn test_footwork_sums_and_clamps() {
        assert_eq!(resolve(Move::Advance, Move::Retreat, 3, &mut heads()).new_distance, 3);
        assert_eq!(resolve(Move::Retreat, Move::Retreat, 5, &mut heads()).new_distance, 6);
        assert_eq!(resolve(Move::Parry, Move::Parry, 2, &mut heads()).new_distance, 2);
        assert_eq!(resolve(Move::Advance, Move::Parry, 1, &mut heads()).new_distance, 1);
    }

    #[test]
    fn test_double_advance_reaches_clash() {
        let mut distance = 4;
        let mut kinds = Vec::new();
        for _ in 0..3 {
            let out = resolve(Move::Advance, Move::Advance, distance, &mut heads());
            distance = out.new_distance;
            kinds.push(out.kind);
        }
        assert_eq!(distance, 1);
        assert_eq!(kinds, vec![ExchangeKind::Footwork, ExchangeKind::Clash, ExchangeKind::Clash]);
    }

    #[test]
    fn test_clash_only_for_double_advance() {
        let out = resolve(Move::Advance, Move::Parry, 1, &mut heads());
        assert_eq!(out.kind, ExchangeKind::WastedParry { by: Side::B });

        let out = resolve(Move::Advance, Move::Advance, 3, &mut heads());
        assert_eq!(out.kind, ExchangeKind::Clash);
        assert_eq!(out.new_distance, 1);
    }

    #[test]
    fn test_out_of_range_distance_is_clamped() {
        let out = resolve(Move::Retreat, Move::Retreat, 200, &mut heads());
        assert_eq!(out.new_distance, MAX_DISTANCE);

        let out = resolve(Move::Lunge, Move::Lunge, 0, &mut heads());
        assert_eq!(out.kind, ExchangeKind::DoubleHit);
    }

    #[test]
    fn test_resolution_is_reproducible_with_seeded_coin() {
        let mut rng1 = DeterministicRng::new(42);
        let mut rng2 = DeterministicRng::new(42);
        for _ in 0..64 {
            let a = resolve(Move::Lunge, Move::Advance, 2, &mut rng1);
            let b = resolve(Move::Lunge, Move::Advance, 2, &mut rng2);
            assert_eq!(a, b);
        }
    }

    proptest! {
        #[test]
        fn prop_resolve_is_total_and_in_range(
            a in prop::sample::select(LEGAL_MOVES.to_vec()),
            b in prop::sample::select(LEGAL_MOVES.to_vec()),
            distance in MIN_DISTANCE..=MAX_DISTANCE,
            flip in any::<bool>(),
        ) {
            let out = resolve(a, b, distance, &mut FixedCoin(flip));
            prop_assert!((MIN_DISTANCE..=MAX_DISTANCE).contains(&out.new_distance));
            prop_assert!(!out.narrative.is_empty());
            if out.single_scorer().is_some() {
                prop_assert_eq!(out.new_distance, RESET_DISTANCE);
            }
        }

        #[test]
        fn prop_sides_are_symmetric(
            a in prop::sample::select(LEGAL_MOVES.to_vec()),
            b in prop::sample::select(LEGAL_MOVES.to_vec()),
            distance in MIN_DISTANCE..=MAX_DISTANCE,
            flip in any::<bool>(),
        ) {
            let ab = resolve(a, b, distance, &mut FixedCoin(flip));
            let ba = resolve(b, a, distance, &mut FixedCoin(flip));
            prop_assert_eq!(ab.new_distance, ba.new_distance);
            prop_assert_eq!(ab.score_a, ba.score_b);
            prop_assert_eq!(ab.score_b, ba.score_a);
        }
    }
}
