//! Session backend shared by all client surfaces
//!
//! `SessionBackend` is the explicitly constructed service object surfaces
//! talk to. It owns the pool, the per-session workers, the reconnect
//! coordinator and the tombstone set.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::pool::SessionPool;
use super::reconnect::ReconnectCoordinator;
use super::session::{ResidentSession, SessionOrigin};
use super::tombstone::TombstoneSet;
use super::worker::{SessionWorkerPool, WorkerRef};
use crate::error::{Result, SessionError};
use crate::runtime::{AgentRuntime, SessionHandle};
use crate::types::{BackendConfig, CreateSessionRequest, SessionId, SessionSummary};

// ============================================================================
// SESSION BACKEND
// ============================================================================

/// Broker for long-lived agent sessions
///
/// The `SessionBackend` coordinates resident sessions, handling:
/// - Serialized execution per session through dedicated workers
/// - Transparent, de-duplicated reconnects for paged-out sessions
/// - Capacity limits with idle eviction
/// - Irreversible end-of-life via tombstones
pub struct SessionBackend<R: AgentRuntime> {
    inner: Arc<BackendInner<R>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

struct BackendInner<R: AgentRuntime> {
    runtime: Arc<R>,
    config: BackendConfig,
    pool: SessionPool,
    workers: SessionWorkerPool<R>,
    reconnects: ReconnectCoordinator<WorkerRef>,
    tombstones: Arc<TombstoneSet>,
}

impl<R: AgentRuntime> SessionBackend<R> {
    /// Create a backend driving `runtime`
    ///
    /// Starts the idle sweep when `config.sweep_interval` is set, which
    /// requires a running tokio runtime.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration is unusable
    pub fn new(runtime: R, config: BackendConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Arc::new(runtime);
        let tombstones = Arc::new(TombstoneSet::new());
        let inner = Arc::new(BackendInner {
            pool: SessionPool::new(config.max_sessions, config.idle_timeout),
            workers: SessionWorkerPool::new(Arc::clone(&runtime)),
            reconnects: ReconnectCoordinator::new(Arc::clone(&tombstones)),
            tombstones,
            runtime,
            config,
        });

        let sweep_handle = inner
            .config
            .sweep_interval
            .map(|interval| spawn_idle_sweeper(Arc::downgrade(&inner), interval));

        Ok(Self {
            inner,
            sweep_handle: Mutex::new(sweep_handle),
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    /// The runtime sessions are created on
    #[must_use]
    pub fn runtime(&self) -> &Arc<R> {
        &self.inner.runtime
    }

    /// Create a new session and start its worker
    ///
    /// When the pool is full, idle sessions are paged out to make room.
    ///
    /// # Errors
    /// Returns `MaxSessionsReached` if no idle session can be evicted, or the
    /// runtime's error if creation fails
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionSummary> {
        let inner = &self.inner;
        let (reservation, evicted) = inner.pool.reserve()?;
        inner.release_evicted(evicted).await;

        let handle = inner.runtime.create(&request).await?;
        let session_id = handle.session_id().clone();
        let resident = ResidentSession::new(session_id.clone(), SessionOrigin::from(&request));
        let summary = resident.summary();

        // Worker first, so a send racing in never sees a resident session
        // without one.
        inner.workers.spawn(handle).await;
        reservation.commit(resident);

        log::info!(
            "[{session_id}] Session created for surface '{}' in {}",
            request.surface,
            request.working_dir.display()
        );
        Ok(summary)
    }

    /// Send a message to a session and wait for the response
    ///
    /// A session that is not resident is resumed first. Concurrent sends to
    /// the same missing session share one resume.
    ///
    /// # Errors
    /// Returns `SessionEnded` for tombstoned sessions, `SessionNotFound` if
    /// the runtime cannot resume it, `MaxSessionsReached` if there is no room
    /// to bring it back, or the runtime's error for the turn itself
    pub async fn send_message(&self, session_id: &SessionId, text: &str) -> Result<String> {
        let inner = &self.inner;
        let mut retried = false;

        loop {
            if inner.tombstones.contains(session_id) {
                return Err(SessionError::session_ended(session_id.as_str()));
            }

            let worker = match inner.workers.worker(session_id) {
                Some(worker) => worker,
                None => self.reconnect(session_id).await?,
            };

            let mut op = inner.pool.begin_op(session_id);
            let result = worker.send(text).await;
            if result.is_ok() {
                op.succeeded();
            }
            drop(op);

            match result {
                // The worker was torn down under us: ended, or paged out.
                Err(SessionError::Cancelled(_)) if inner.tombstones.contains(session_id) => {
                    return Err(SessionError::session_ended(session_id.as_str()));
                }
                Err(SessionError::Cancelled(_)) if !retried => {
                    log::debug!("[{session_id}] Worker went away mid-send, retrying once");
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// End a session for good
    ///
    /// The id is tombstoned before anything else, so no reconnect can
    /// revive it. Then the worker is drained, the runtime is told to end
    /// the session (failures are logged) and the pool entry is dropped.
    ///
    /// Returns true if a resident session was ended.
    pub async fn end_session(&self, session_id: &SessionId) -> bool {
        let inner = &self.inner;
        if !inner.tombstones.insert(session_id.clone()) {
            log::debug!("[{session_id}] Session already ended");
        }

        // A resume that started before the tombstone may still install a
        // worker; let it land so the drain below catches it.
        inner.reconnects.settle(session_id).await;

        let ended = match inner.workers.drain(session_id).await {
            Some(handle) => {
                if let Err(e) = inner.runtime.end(handle).await {
                    log::warn!("[{session_id}] Runtime failed to end session: {e}");
                }
                true
            }
            None => false,
        };

        inner.pool.remove(session_id);
        log::info!("[{session_id}] Session ended (was resident: {ended})");
        ended
    }

    /// Page a session out of memory without ending it
    ///
    /// The runtime is not told; the session can be resumed later.
    /// Returns true if the session was resident.
    pub async fn evict(&self, session_id: &SessionId) -> bool {
        let inner = &self.inner;
        let paged_out = inner.pool.page_out(session_id);
        let drained = inner.workers.drain(session_id).await.is_some();
        if paged_out || drained {
            log::info!("[{session_id}] Session paged out");
        }
        paged_out || drained
    }

    /// Page out every idle session now
    pub async fn evict_idle(&self) -> Vec<SessionId> {
        self.inner.evict_idle().await
    }

    /// Summaries of every resident session
    #[must_use]
    pub fn list_active_sessions(&self) -> Vec<SessionSummary> {
        self.inner.pool.summaries()
    }

    /// Whether `session_id` is resident
    #[must_use]
    pub fn is_resident(&self, session_id: &SessionId) -> bool {
        self.inner.pool.contains(session_id)
    }

    /// Whether `session_id` was deliberately ended
    #[must_use]
    pub fn is_tombstoned(&self, session_id: &SessionId) -> bool {
        self.inner.tombstones.contains(session_id)
    }

    /// Number of resident sessions
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.inner.pool.len()
    }

    /// Number of reconnects in flight
    #[must_use]
    pub fn reconnects_in_flight(&self) -> usize {
        self.inner.reconnects.in_flight_count()
    }

    /// Gracefully shut the backend down
    ///
    /// Stops the idle sweep and every worker, letting in-flight operations
    /// finish. Sessions are paged out rather than ended, so they can be
    /// resumed by the next process.
    pub async fn shutdown(&self) {
        log::info!("Shutting down SessionBackend...");

        if let Some(handle) = self.sweep_handle.lock().take() {
            handle.abort();
        }

        let handles = self.inner.workers.stop().await;
        let paged_out = self.inner.pool.page_out_all();
        drop(handles);

        log::info!("SessionBackend shutdown complete ({paged_out} session(s) paged out)");
    }

    async fn reconnect(&self, session_id: &SessionId) -> Result<WorkerRef> {
        let inner = Arc::clone(&self.inner);
        let id = session_id.clone();
        self.inner
            .reconnects
            .reconnect(session_id, move || async move { inner.resume_session(&id).await })
            .await
    }
}

impl<R: AgentRuntime> Drop for SessionBackend<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl<R: AgentRuntime> BackendInner<R> {
    /// Bring a paged-out session back and start its worker
    ///
    /// Capacity is claimed only once the runtime has produced a handle, so
    /// an id that cannot be resumed never costs a resident its slot.
    async fn resume_session(&self, session_id: &SessionId) -> Result<WorkerRef> {
        // A previous attempt may have finished just before this one started.
        if let Some(worker) = self.workers.worker(session_id) {
            return Ok(worker);
        }
        // Resident without a worker: its worker crashed.
        self.pool.page_out(session_id);

        log::info!("[{session_id}] Resuming session");
        let handle = self.runtime.resume(session_id).await?;

        if self.tombstones.contains(session_id) {
            log::info!("[{session_id}] Session ended while resuming, discarding handle");
            if let Err(e) = self.runtime.end(handle).await {
                log::warn!("[{session_id}] Runtime failed to end session: {e}");
            }
            return Err(SessionError::session_ended(session_id.as_str()));
        }

        // No room: the handle is dropped, the session stays resumable.
        let (reservation, evicted) = self.pool.reserve()?;
        self.release_evicted(evicted).await;

        let origin = self
            .pool
            .take_origin(session_id)
            .unwrap_or_else(SessionOrigin::resumed);
        let worker = self.workers.spawn(handle).await;
        reservation.commit(ResidentSession::new(session_id.clone(), origin));
        Ok(worker)
    }

    async fn evict_idle(&self) -> Vec<SessionId> {
        let idle = self.pool.take_idle();
        self.release_evicted(idle.clone()).await;
        idle
    }

    /// Drain the workers of sessions the pool already paged out
    async fn release_evicted(&self, evicted: Vec<SessionId>) {
        for session_id in evicted {
            // Dropping the handle without `end` keeps the session resumable.
            let _handle = self.workers.drain(&session_id).await;
            log::info!("[{session_id}] Evicted idle session");
        }
    }
}

/// Spawn the periodic idle sweep
///
/// Holds only a weak reference so the backend can be dropped; the task
/// exits once the backend is gone.
fn spawn_idle_sweeper<R: AgentRuntime>(
    inner: Weak<BackendInner<R>>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(inner) = inner.upgrade() else { break };
            let evicted = inner.evict_idle().await;
            if !evicted.is_empty() {
                log::debug!("Idle sweep paged out {} session(s)", evicted.len());
            }
        }
    })
}
