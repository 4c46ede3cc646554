//! Coordinated reconnects
//!
//! Collapses concurrent attempts to bring the same session back into
//! memory into a single resume. Every caller waiting on an id observes the
//! outcome of that one attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use super::tombstone::TombstoneSet;
use crate::error::{Result, SessionError};
use crate::types::SessionId;

type Attempt<T> = Shared<BoxFuture<'static, Result<T>>>;
type InFlightMap<T> = Arc<Mutex<HashMap<SessionId, Attempt<T>>>>;

/// At most one in-flight reconnect per session id
pub struct ReconnectCoordinator<T> {
    in_flight: InFlightMap<T>,
    tombstones: Arc<TombstoneSet>,
}

impl<T> ReconnectCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a coordinator that refuses ids present in `tombstones`
    pub fn new(tombstones: Arc<TombstoneSet>) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tombstones,
        }
    }

    /// Bring `session_id` back, running `resume_fn` at most once at a time
    ///
    /// The first caller for an id starts `resume_fn` on its own task; later
    /// callers for the same id join that attempt. The in-flight entry is
    /// removed when the attempt finishes, whether it succeeded, failed or
    /// panicked, so a failed reconnect can be retried straight away.
    ///
    /// # Errors
    /// Returns `SessionEnded` without calling `resume_fn` if the id is
    /// tombstoned, otherwise the attempt's own error
    pub async fn reconnect<F, Fut>(&self, session_id: &SessionId, resume_fn: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.tombstones.contains(session_id) {
            return Err(SessionError::session_ended(session_id.as_str()));
        }

        let attempt = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(session_id) {
                log::debug!("[{session_id}] Joining in-flight reconnect");
                existing.clone()
            } else {
                log::debug!("[{session_id}] Starting reconnect");
                let attempt = spawn_attempt(Arc::clone(&self.in_flight), session_id.clone(), resume_fn());
                in_flight.insert(session_id.clone(), attempt.clone());
                attempt
            }
        };

        attempt.await
    }

    /// Wait for any in-flight reconnect of `session_id` to finish
    pub async fn settle(&self, session_id: &SessionId) {
        let attempt = self.in_flight.lock().get(session_id).cloned();
        if let Some(attempt) = attempt {
            let _ = attempt.await;
        }
    }

    /// Whether a reconnect for `session_id` is in flight
    #[must_use]
    pub fn in_flight(&self, session_id: &SessionId) -> bool {
        self.in_flight.lock().contains_key(session_id)
    }

    /// Number of reconnects in flight
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Removes an id from the in-flight map on every exit path of its attempt
struct InFlightGuard<T> {
    in_flight: InFlightMap<T>,
    session_id: SessionId,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.session_id);
    }
}

fn spawn_attempt<T, Fut>(in_flight: InFlightMap<T>, session_id: SessionId, fut: Fut) -> Attempt<T>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let guard = InFlightGuard {
        in_flight,
        session_id,
    };

    // The attempt runs on its own task so it completes even if every
    // waiting caller is cancelled.
    let task = tokio::spawn(async move {
        let _guard = guard;
        fut.await
    });

    async move {
        task.await
            .unwrap_or_else(|e| Err(SessionError::runtime(format!("reconnect task failed: {e}"))))
    }
    .boxed()
    .shared()
}
