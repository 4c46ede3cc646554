//! Error types for the session broker

use std::sync::Arc;

use thiserror::Error;

/// Main error type for the session broker
///
/// Errors are `Clone` so a single failed reconnect can be handed to every
/// caller that was waiting on it. Non-cloneable sources are kept behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Maximum resident sessions reached and nothing idle to evict
    #[error("Maximum active sessions reached: {0}")]
    MaxSessionsReached(usize),

    /// Per-user mapping quota reached
    #[error("User {user_id} has reached the limit of {limit} active sessions")]
    UserLimitReached {
        /// Account that hit the quota
        user_id: String,
        /// Configured quota
        limit: usize,
    },

    /// Session id unknown to the pool and the runtime
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Routing key unknown to the registry
    #[error("Routing key not found: {0}")]
    RoutingKeyNotFound(String),

    /// Routing key already owned by another session
    #[error("Routing key {key} already maps to session {session_id}")]
    RoutingKeyConflict {
        /// Contested routing key
        key: String,
        /// Session currently holding the key
        session_id: String,
    },

    /// Session was deliberately ended and cannot be resumed
    #[error("Session {0} was intentionally ended")]
    SessionEnded(String),

    /// Queued operation dropped because its worker was torn down
    #[error("Operation on session {0} was cancelled")]
    Cancelled(String),

    /// Failure reported by the agent runtime (create/resume/run/end)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Registry persistence failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for session broker operations
pub type Result<T> = std::result::Result<T, SessionError>;

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl SessionError {
    /// Create a max sessions error
    #[must_use]
    pub fn max_sessions_reached(max: usize) -> Self {
        Self::MaxSessionsReached(max)
    }

    /// Create a per-user limit error
    pub fn user_limit_reached(user_id: impl Into<String>, limit: usize) -> Self {
        Self::UserLimitReached {
            user_id: user_id.into(),
            limit,
        }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound(session_id.into())
    }

    /// Create a routing key not found error
    pub fn routing_key_not_found(key: impl Into<String>) -> Self {
        Self::RoutingKeyNotFound(key.into())
    }

    /// Create a routing key conflict error
    pub fn routing_key_conflict(key: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::RoutingKeyConflict {
            key: key.into(),
            session_id: session_id.into(),
        }
    }

    /// Create a session ended (tombstoned) error
    pub fn session_ended(session_id: impl Into<String>) -> Self {
        Self::SessionEnded(session_id.into())
    }

    /// Create a cancellation error
    pub fn cancelled(session_id: impl Into<String>) -> Self {
        Self::Cancelled(session_id.into())
    }

    /// Create a runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this is a capacity error (pool or per-user)
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::MaxSessionsReached(_) | Self::UserLimitReached { .. })
    }

    /// Whether this is a not-found error (session or routing key)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::RoutingKeyNotFound(_))
    }

    /// Whether the session was deliberately ended
    #[must_use]
    pub fn is_session_ended(&self) -> bool {
        matches!(self, Self::SessionEnded(_))
    }
}
