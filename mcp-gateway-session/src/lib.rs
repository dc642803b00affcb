//! Identity-keyed session pooling (C6, spec §4.6): LRU eviction, idle TTL,
//! and per-key factory serialization in front of a `Session` factory.

pub mod identity;
pub mod manager;

pub use identity::{derive_identity, AuthMode};
pub use manager::{ManagerConfig, ManagerStats, SessionFactory, SessionManager, SessionRequest};
