//! Capacity-bounded pool of resident sessions
//!
//! Tracks which sessions are in memory and their metadata. Room for a new
//! session is claimed up front with a [`SlotReservation`]; when the pool is
//! full, idle sessions are paged out to make space.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::session::{ResidentSession, SessionOrigin};
use crate::error::{Result, SessionError};
use crate::types::{SessionId, SessionSummary};

#[derive(Debug, Default)]
struct PoolState {
    sessions: HashMap<SessionId, ResidentSession>,
    /// Origins of paged-out sessions, consumed on resume
    paged_out: HashMap<SessionId, SessionOrigin>,
    /// Slots claimed by creates/resumes still talking to the runtime
    reserved: usize,
}

impl PoolState {
    fn occupied(&self) -> usize {
        self.sessions.len() + self.reserved
    }

    fn page_out(&mut self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some(resident) => {
                self.paged_out.insert(session_id.clone(), resident.origin);
                true
            }
            None => false,
        }
    }

    fn idle_ids(&self, idle_timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.meta.is_idle(idle_timeout))
            .map(|s| s.session_id.clone())
            .collect()
    }
}

/// Resident sessions plus metadata, bounded by `max_sessions`
#[derive(Debug)]
pub struct SessionPool {
    state: Arc<Mutex<PoolState>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionPool {
    /// Create an empty pool
    #[must_use]
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            max_sessions,
            idle_timeout,
        }
    }

    /// Claim a slot for a session about to become resident
    ///
    /// At capacity, every idle session is paged out first; their ids are
    /// returned so the caller can drain their workers. If that still leaves
    /// no room, nothing is evicted and the pool is unchanged.
    ///
    /// # Errors
    /// Returns `MaxSessionsReached` if no slot can be freed
    pub fn reserve(&self) -> Result<(SlotReservation, Vec<SessionId>)> {
        let mut state = self.state.lock();
        let mut evicted = Vec::new();

        if state.occupied() >= self.max_sessions {
            let idle = state.idle_ids(self.idle_timeout);
            if state.occupied() - idle.len() >= self.max_sessions {
                return Err(SessionError::max_sessions_reached(self.max_sessions));
            }
            for session_id in idle {
                state.page_out(&session_id);
                evicted.push(session_id);
            }
        }

        state.reserved += 1;
        Ok((
            SlotReservation {
                state: Arc::clone(&self.state),
                released: false,
            },
            evicted,
        ))
    }

    /// Page out every idle session, returning their ids
    pub fn take_idle(&self) -> Vec<SessionId> {
        let mut state = self.state.lock();
        let idle = state.idle_ids(self.idle_timeout);
        for session_id in &idle {
            state.page_out(session_id);
        }
        idle
    }

    /// Page out one session; it can be resumed later
    pub fn page_out(&self, session_id: &SessionId) -> bool {
        self.state.lock().page_out(session_id)
    }

    /// Forget a session entirely (resident entry and paged-out origin)
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let mut state = self.state.lock();
        let resident = state.sessions.remove(session_id).is_some();
        let paged_out = state.paged_out.remove(session_id).is_some();
        resident || paged_out
    }

    /// Page out everything, e.g. on shutdown
    pub fn page_out_all(&self) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<SessionId> = state.sessions.keys().cloned().collect();
        for session_id in &ids {
            state.page_out(session_id);
        }
        ids.len()
    }

    /// Origin remembered for a paged-out session
    pub(crate) fn take_origin(&self, session_id: &SessionId) -> Option<SessionOrigin> {
        self.state.lock().paged_out.remove(session_id)
    }

    /// Mark the start of an operation; the session is not idle until it ends
    pub fn begin_op(&self, session_id: &SessionId) -> OpGuard {
        let counted = match self.state.lock().sessions.get_mut(session_id) {
            Some(resident) => {
                resident.meta.pending += 1;
                true
            }
            None => false,
        };
        OpGuard {
            state: Arc::clone(&self.state),
            session_id: session_id.clone(),
            counted,
            succeeded: false,
        }
    }

    /// Record activity on a resident session
    pub fn touch(&self, session_id: &SessionId) -> bool {
        match self.state.lock().sessions.get_mut(session_id) {
            Some(resident) => {
                resident.meta.touch();
                true
            }
            None => false,
        }
    }

    /// Whether `session_id` is resident
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.state.lock().sessions.contains_key(session_id)
    }

    /// Number of resident sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether no sessions are resident
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    /// Configured capacity
    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Summaries of every resident session, oldest first
    #[must_use]
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .state
            .lock()
            .sessions
            .values()
            .map(ResidentSession::summary)
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }
}

/// A claimed pool slot; released on drop unless committed
#[derive(Debug)]
pub struct SlotReservation {
    state: Arc<Mutex<PoolState>>,
    released: bool,
}

impl SlotReservation {
    /// Turn the slot into a resident session
    pub(crate) fn commit(mut self, resident: ResidentSession) {
        let mut state = self.state.lock();
        state.reserved -= 1;
        state.paged_out.remove(&resident.session_id);
        state.sessions.insert(resident.session_id.clone(), resident);
        self.released = true;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.released {
            self.state.lock().reserved -= 1;
        }
    }
}

/// Tracks one in-flight operation on a resident session
#[derive(Debug)]
pub struct OpGuard {
    state: Arc<Mutex<PoolState>>,
    session_id: SessionId,
    counted: bool,
    succeeded: bool,
}

impl OpGuard {
    /// The operation succeeded; touch the session when the guard drops
    pub fn succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if let Some(resident) = self.state.lock().sessions.get_mut(&self.session_id) {
            if self.counted {
                resident.meta.pending = resident.meta.pending.saturating_sub(1);
            }
            if self.succeeded {
                resident.meta.touch();
            }
        }
    }
}
