//! Network Layer
//!
//! The session and matchmaking engine plus the WebSocket adapter in front
//! of it. This layer owns time, locks and I/O; every rule decision is
//! delegated to `game/`.

pub mod protocol;
pub mod hub;
pub mod timer;
pub mod queue;
pub mod session;
pub mod engine;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, MatchView, SpectatorView, ErrorCode};
pub use hub::{Audience, ScopedView, Subscription};
pub use session::{EngineConfig, SessionManager};
pub use engine::{ClientError, DuelEngine, EngineStats, JoinOutcome, QueueStatus, SubmitOutcome};
pub use server::{GameServer, ServerConfig, GameServerError};
