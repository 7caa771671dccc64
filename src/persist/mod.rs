//! Persistence
//!
//! Snapshot records and the stores that hold them. The engine writes after
//! every mutation and reads everything back once at startup.

pub mod store;
pub mod memory;
pub mod file;

pub use store::{ArchivedDuel, DuelStore, QueueRecord, SessionRecord, StoreError, StoredState};
pub use memory::MemoryStore;
pub use file::JsonFileStore;
