//! Session request and summary types
//!
//! Shapes exchanged between client surfaces and `SessionBackend`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::identifiers::SessionId;

/// Request parameters for creating a new session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Working directory handed to the runtime
    pub working_dir: PathBuf,
    /// Optional bundle the runtime should load
    pub bundle: Option<String>,
    /// Human-readable description
    pub description: Option<String>,
    /// Informational project identifier
    pub project_id: Option<String>,
    /// Surface creating the session (e.g. "slack", "web", "cli")
    pub surface: String,
}

impl CreateSessionRequest {
    /// Create a request for a working directory on a surface
    pub fn new(working_dir: impl Into<PathBuf>, surface: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            surface: surface.into(),
            ..Default::default()
        }
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the bundle
    #[must_use]
    pub fn bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    /// Set the project id
    #[must_use]
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Resident session info for `list_active_sessions` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique identifier for the session
    pub session_id: SessionId,

    /// Project the session was created for
    pub project_id: Option<String>,

    /// Working directory the session runs in
    pub working_dir: PathBuf,

    /// Surface that created (or resumed) the session
    pub surface: String,

    /// Description supplied at creation
    pub description: Option<String>,

    /// When the session became resident (wall-clock time)
    pub created_at: DateTime<Utc>,

    /// Seconds since the last successful operation
    pub idle_seconds: u64,
}
