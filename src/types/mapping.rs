//! Surface routing records
//!
//! A `SurfaceSessionMapping` ties an external conversation context (its
//! routing key) to a backend session id. Mappings outlive session residency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::identifiers::SessionId;

/// Surface-specific routing fields, never interpreted by the registry
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

/// Mapping from a routing key to a session
///
/// Every field is serialized; persisted files are lists of these records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSessionMapping {
    /// External conversation context, e.g. "channel:thread"
    pub routing_key: String,

    /// Backend session this key targets
    pub session_id: SessionId,

    /// Integration that created the mapping
    pub surface: String,

    /// User or account that created the mapping
    pub created_by: String,

    /// Informational project identifier
    #[serde(default)]
    pub project_id: Option<String>,

    /// Informational description
    #[serde(default)]
    pub description: Option<String>,

    /// When the mapping was registered
    pub created_at: DateTime<Utc>,

    /// Last activity seen on this routing key
    pub last_active: DateTime<Utc>,

    /// False once logically ended; kept for history
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Surface-specific routing fields (channel id, thread id, ...)
    #[serde(default)]
    pub extra: ExtraFields,
}

fn default_active() -> bool {
    true
}

impl SurfaceSessionMapping {
    /// Look up a surface-specific field as a string
    #[must_use]
    pub fn extra_str(&self, field: &str) -> Option<&str> {
        self.extra.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Fields supplied when registering a mapping
#[derive(Debug, Clone, Default)]
pub struct MappingRequest {
    /// User or account creating the mapping
    pub user_id: String,
    /// Informational project identifier
    pub project_id: Option<String>,
    /// Informational description
    pub description: Option<String>,
    /// Surface-specific routing fields
    pub extra: ExtraFields,
}

impl MappingRequest {
    /// Create a request on behalf of a user
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Set the project id
    #[must_use]
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a surface-specific routing field
    #[must_use]
    pub fn extra(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(field.into(), value.into());
        self
    }
}
