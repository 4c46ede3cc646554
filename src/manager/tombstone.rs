//! Tombstones for deliberately ended sessions

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::types::SessionId;

/// Session ids that were ended on purpose and may never be resumed
#[derive(Debug, Default)]
pub struct TombstoneSet {
    ended: RwLock<HashSet<SessionId>>,
}

impl TombstoneSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tombstone `session_id`; returns false if it already was
    pub fn insert(&self, session_id: SessionId) -> bool {
        self.ended.write().insert(session_id)
    }

    /// Whether `session_id` was ended
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.ended.read().contains(session_id)
    }

    /// Number of tombstoned ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.ended.read().len()
    }

    /// Whether nothing has been tombstoned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ended.read().is_empty()
    }
}
