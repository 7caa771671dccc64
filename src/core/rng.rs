//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ for fast, reproducible randomness.
//! Every random decision the engine makes (the 50% lunge at distance 2,
//! bot move selection) draws from one of these, so a duel replays
//! identically from its seed and its recorded RNG state.

use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};

/// Source of the fair coin used by the distance-2 lunge rule.
///
/// Implemented by [`DeterministicRng`] for live duels and by
/// [`FixedCoin`] where a test needs to pin the outcome.
pub trait CoinFlip {
    /// Returns `true` with probability exactly one half.
    fn flip(&mut self) -> bool;
}

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use riposte::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the RNG for a duel from its session id.
    pub fn for_session(session_id: &str, salt: u64) -> Self {
        Self::new(derive_session_seed(session_id, salt))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Pick an index from a table of integer weights.
    ///
    /// Returns `None` when every weight is zero.
    pub fn weighted_index(&mut self, weights: &[u32]) -> Option<usize> {
        let total: u32 = weights.iter().sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.next_int(total);
        for (idx, &w) in weights.iter().enumerate() {
            if roll < w {
                return Some(idx);
            }
            roll -= w;
        }
        None
    }

}

impl CoinFlip for DeterministicRng {
    #[inline]
    fn flip(&mut self) -> bool {
        // Top bit: the low bits of xorshift+ are the weakest
        self.next_u64() >> 63 == 1
    }
}

/// A coin that always lands the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedCoin(pub bool);

impl CoinFlip for FixedCoin {
    fn flip(&mut self) -> bool {
        self.0
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a duel seed from its session id and the server salt.
///
/// Session ids are unique for the lifetime of a deployment, so the
/// seed is too; the salt keeps seeds unguessable from the id alone.
pub fn derive_session_seed(session_id: &str, salt: u64) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"RIPOSTE_SEED_V1");
    hasher.update(salt.to_le_bytes());
    hasher.update(session_id.as_bytes());

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_coin_is_roughly_fair() {
        let mut rng = DeterministicRng::new(99);
        let heads = (0..10_000).filter(|_| rng.flip()).count();
        assert!((4_500..5_500).contains(&heads), "heads = {heads}");
    }

    #[test]
    fn test_fixed_coin() {
        assert!(FixedCoin(true).flip());
        assert!(!FixedCoin(false).flip());
    }

    #[test]
    fn test_weighted_index() {
        let mut rng = DeterministicRng::new(7);

        assert_eq!(rng.weighted_index(&[0, 0, 0]), None);
        assert_eq!(rng.weighted_index(&[]), None);

        for _ in 0..200 {
            // Zero-weight slots are never picked
            let idx = rng.weighted_index(&[0, 3, 0, 1]).unwrap();
            assert!(idx == 1 || idx == 3);
        }
    }

    #[test]
    fn test_session_seed() {
        let a = derive_session_seed("duel-1", 0);
        assert_eq!(a, derive_session_seed("duel-1", 0));
        assert_ne!(a, derive_session_seed("duel-2", 0));
        assert_ne!(a, derive_session_seed("duel-1", 1));
    }

    #[test]
    fn test_state_checkpoint() {
        let mut rng = DeterministicRng::new(5555);
        for _ in 0..50 {
            rng.next_u64();
        }

        let saved = serde_json::to_string(&rng).unwrap();
        let next_values: Vec<u64> = (0..10).map(|_| rng.next_u64()).collect();

        let mut rng: DeterministicRng = serde_json::from_str(&saved).unwrap();
        for expected in next_values {
            assert_eq!(rng.next_u64(), expected);
        }
    }
}
