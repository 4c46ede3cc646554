//! # Session Broker
//!
//! Brokers access to long-lived agent sessions on behalf of several client
//! surfaces (chat bridges, a web UI, a CLI) that may address the same session
//! at the same time.
//!
//! The crate guarantees that:
//! - Operations against one session never interleave
//! - A session that dropped out of memory is resumed at most once, however
//!   many callers want it at the same moment
//! - The resident working set stays within capacity by paging out idle
//!   sessions
//! - A deliberately ended session can never be resumed
//! - Surface routing (which conversation maps to which session) survives
//!   process restarts
//!
//! ## Quick Start
//!
//! Implement [`AgentRuntime`] for the runtime that executes turns, then build
//! a [`SessionBackend`] around it:
//!
//! ```ignore
//! use session_broker::{BackendConfig, CreateSessionRequest, SessionBackend};
//! use std::time::Duration;
//!
//! # async fn example(runtime: impl session_broker::AgentRuntime) -> session_broker::Result<()> {
//! let config = BackendConfig::builder()
//!     .max_sessions(8)
//!     .idle_timeout(Duration::from_secs(600))
//!     .build();
//! let backend = SessionBackend::new(runtime, config)?;
//!
//! let session = backend
//!     .create_session(CreateSessionRequest::new("/work/repo", "cli"))
//!     .await?;
//! let reply = backend.send_message(&session.session_id, "Hello").await?;
//! backend.end_session(&session.session_id).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Surface Routing
//!
//! Each surface keeps a [`SurfaceSessionRegistry`] mapping its routing keys to
//! session ids:
//!
//! ```no_run
//! use session_broker::{MappingRequest, SurfaceSessionRegistry};
//!
//! let registry = SurfaceSessionRegistry::open("slack", "/var/lib/broker/slack_sessions.json", 5);
//! registry.check_limit("U123")?;
//! registry.register(
//!     "C42",
//!     "session-1",
//!     MappingRequest::new("U123").extra("channel_id", "C42"),
//! );
//! // Once the reply thread is known, narrow the key.
//! registry.rekey("C42", "C42:1712.5")?;
//! # Ok::<(), session_broker::SessionError>(())
//! ```

pub mod error;
pub mod manager;
pub mod registry;
pub mod runtime;
pub mod types;

pub use error::{Result, SessionError};
pub use manager::{
    ReconnectCoordinator, SessionBackend, SessionMeta, SessionPool, SessionWorkerPool,
    TombstoneSet, WorkerRef,
};
pub use registry::{JsonFileStore, MappingStore, SurfaceSessionRegistry};
pub use runtime::{AgentRuntime, SessionHandle};
pub use types::{
    BackendConfig, BackendConfigBuilder, CreateSessionRequest, ExtraFields, MappingRequest,
    SessionId, SessionSummary, SurfaceSessionMapping,
};
