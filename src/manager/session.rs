//! Session state structures
//!
//! Defines the bookkeeping kept for every resident session, plus the
//! origin record remembered for sessions that were paged out.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::types::{CreateSessionRequest, SessionId, SessionSummary};

/// Surface recorded for sessions resumed without a known origin
pub(crate) const RESUMED_SURFACE: &str = "resumed";

/// Per-session metadata (1:1 with a resident session)
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// Surface that created the session
    pub created_by_surface: String,

    /// When the session became resident (wall-clock time)
    pub created_at: DateTime<Utc>,

    /// Last successful operation
    pub last_active: Instant,

    /// Operations submitted and not yet finished
    pub(crate) pending: usize,
}

impl SessionMeta {
    /// Fresh metadata for a session owned by `surface`
    pub fn new(surface: impl Into<String>) -> Self {
        Self {
            created_by_surface: surface.into(),
            created_at: Utc::now(),
            last_active: Instant::now(),
            pending: 0,
        }
    }

    /// Record activity
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Time since the last successful operation
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Whole seconds since the last successful operation
    #[must_use]
    pub fn idle_seconds(&self) -> u64 {
        self.idle().as_secs()
    }

    /// Evictable: nothing in flight and idle longer than `timeout`
    #[must_use]
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.pending == 0 && self.idle() > timeout
    }
}

/// Where a session came from; survives page-out so a resume can restore it
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionOrigin {
    pub project_id: Option<String>,
    pub working_dir: PathBuf,
    pub description: Option<String>,
    pub surface: String,
}

impl From<&CreateSessionRequest> for SessionOrigin {
    fn from(request: &CreateSessionRequest) -> Self {
        Self {
            project_id: request.project_id.clone(),
            working_dir: request.working_dir.clone(),
            description: request.description.clone(),
            surface: request.surface.clone(),
        }
    }
}

impl SessionOrigin {
    /// Origin used when a session is resumed with no remembered origin
    pub fn resumed() -> Self {
        Self {
            surface: RESUMED_SURFACE.to_string(),
            ..Default::default()
        }
    }
}

/// Resident session data (stored while the worker holds the handle)
#[derive(Debug, Clone)]
pub(crate) struct ResidentSession {
    pub session_id: SessionId,
    pub origin: SessionOrigin,
    pub meta: SessionMeta,
}

impl ResidentSession {
    pub fn new(session_id: SessionId, origin: SessionOrigin) -> Self {
        let meta = SessionMeta::new(origin.surface.clone());
        Self {
            session_id,
            origin,
            meta,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            project_id: self.origin.project_id.clone(),
            working_dir: self.origin.working_dir.clone(),
            surface: self.meta.created_by_surface.clone(),
            description: self.origin.description.clone(),
            created_at: self.meta.created_at,
            idle_seconds: self.meta.idle_seconds(),
        }
    }
}
