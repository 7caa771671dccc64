//! # Riposte Duel Server
//!
//! Session and matchmaking engine for short simultaneous-turn fencing duels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RIPOSTE SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Xorshift128+ PRNG, injectable coin        │
//! │  └── hash.rs     - Snapshot digests                          │
//! │                                                              │
//! │  game/           - Duel rules (deterministic)                │
//! │  ├── moves.rs    - Moves, sides, per-side values             │
//! │  ├── rules.rs    - Exchange resolution                       │
//! │  ├── state.rs    - Per-duel state machine                    │
//! │  └── bot.rs      - Practice bot                              │
//! │                                                              │
//! │  network/        - Engine and transport (non-deterministic)  │
//! │  ├── engine.rs   - Queue, registry, turn flow, recovery      │
//! │  ├── session.rs  - Live duel slots and config                │
//! │  ├── queue.rs    - Matchmaking queue                         │
//! │  ├── timer.rs    - Turn timers                               │
//! │  ├── hub.rs      - Waiters and subscribers                   │
//! │  ├── protocol.rs - Views and wire messages                   │
//! │  └── server.rs   - WebSocket adapter                         │
//! │                                                              │
//! │  persist/        - Durable records                           │
//! │  ├── store.rs    - Record types and store trait              │
//! │  ├── memory.rs   - In-memory store                           │
//! │  └── file.rs     - JSON file store                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/` and `game/` never read the clock or the network. A duel's
//! randomness comes from its own seeded RNG, whose state is part of the
//! persisted snapshot, so a restored duel continues exactly where it left
//! off.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod persist;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::moves::{Move, Side};
pub use game::state::{DuelState, DuelPhase, Winner};
pub use network::engine::DuelEngine;
pub use network::session::EngineConfig;
pub use persist::{DuelStore, JsonFileStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
