//! Session concurrency layer
//!
//! Provides `SessionBackend` for creating, messaging and ending agent
//! sessions shared by several client surfaces.
//!
//! # Module Structure
//!
//! - `backend` - `SessionBackend` with the surface-facing API
//! - `worker` - One serializing worker per resident session
//! - `reconnect` - At-most-one resume per session id
//! - `pool` - Capacity-bounded resident set with idle eviction
//! - `tombstone` - Ids of deliberately ended sessions
//! - `session` - Per-session metadata
//! - `commands` - Command protocol between callers and workers

mod backend;
mod commands;
mod pool;
mod reconnect;
mod session;
mod tombstone;
mod worker;

pub use backend::SessionBackend;
pub use pool::{OpGuard, SessionPool, SlotReservation};
pub use reconnect::ReconnectCoordinator;
pub use session::SessionMeta;
pub use tombstone::TombstoneSet;
pub use worker::{SessionWorkerPool, WorkerRef};
