//! Type definitions for the session broker
//!
//! - [`identifiers`] - Type-safe ID wrappers (`SessionId`)
//! - [`config`] - Capacity, eviction and registry settings
//! - [`session`] - Session creation requests and summaries
//! - [`mapping`] - Surface routing records

pub mod config;
pub mod identifiers;
pub mod mapping;
pub mod session;

pub use config::{BackendConfig, BackendConfigBuilder};
pub use identifiers::SessionId;
pub use mapping::{ExtraFields, MappingRequest, SurfaceSessionMapping};
pub use session::{CreateSessionRequest, SessionSummary};
