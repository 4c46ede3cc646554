//! Per-session workers
//!
//! Every resident session gets one background task that owns its runtime
//! handle and consumes a FIFO command queue. Operations for one session
//! therefore never overlap, while different sessions run in parallel.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::commands::WorkerCommand;
use crate::error::{Result, SessionError};
use crate::runtime::{AgentRuntime, SessionHandle};
use crate::types::SessionId;

/// Cloneable sender side of a session worker
#[derive(Debug, Clone)]
pub struct WorkerRef {
    session_id: SessionId,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerRef {
    /// Session served by this worker
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Queue a message and wait for its turn result
    ///
    /// # Errors
    /// Returns `Cancelled` if the worker was torn down before the message
    /// ran, or the runtime's error if the turn failed
    pub async fn send(&self, message: &str) -> Result<String> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = WorkerCommand {
            message: message.to_string(),
            response_tx,
        };

        self.command_tx
            .send(cmd)
            .map_err(|_| SessionError::cancelled(self.session_id.as_str()))?;

        response_rx
            .await
            .map_err(|_| SessionError::cancelled(self.session_id.as_str()))?
    }
}

struct WorkerEntry<H> {
    worker: WorkerRef,
    cancel: CancellationToken,
    task: JoinHandle<H>,
    generation: u64,
}

type WorkerMap<H> = Mutex<HashMap<SessionId, WorkerEntry<H>>>;

/// One single-consumer worker per resident session id
pub struct SessionWorkerPool<R: AgentRuntime> {
    runtime: Arc<R>,
    workers: Arc<WorkerMap<R::Handle>>,
    next_generation: AtomicU64,
}

impl<R: AgentRuntime> SessionWorkerPool<R> {
    /// Create an empty worker pool driving `runtime`
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start a worker that takes ownership of `handle`
    ///
    /// A worker already registered for the same id is drained first: its
    /// in-flight operation finishes, its queue is cancelled and its handle
    /// is dropped without `end`.
    pub async fn spawn(&self, handle: R::Handle) -> WorkerRef {
        let session_id = handle.session_id().clone();
        if let Some(previous) = self.drain(&session_id).await {
            log::warn!("[{session_id}] Replaced existing worker");
            drop(previous);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let worker = WorkerRef {
            session_id: session_id.clone(),
            command_tx,
        };

        let task = spawn_worker_loop(
            Arc::clone(&self.runtime),
            handle,
            command_rx,
            cancel.clone(),
            Retire {
                workers: Arc::downgrade(&self.workers),
                generation,
            },
        );

        self.workers.lock().insert(
            session_id.clone(),
            WorkerEntry {
                worker: worker.clone(),
                cancel,
                task,
                generation,
            },
        );

        log::debug!("[{session_id}] Worker started");
        worker
    }

    /// Sender for a session's worker, if one is running
    #[must_use]
    pub fn worker(&self, session_id: &SessionId) -> Option<WorkerRef> {
        self.workers
            .lock()
            .get(session_id)
            .map(|entry| entry.worker.clone())
    }

    /// Whether a worker is running for `session_id`
    #[must_use]
    pub fn has_worker(&self, session_id: &SessionId) -> bool {
        self.workers.lock().contains_key(session_id)
    }

    /// Number of running workers
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether no workers are running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// Queue `message` on the session's worker and wait for the result
    ///
    /// # Errors
    /// Returns `SessionNotFound` if no worker runs for `session_id`
    pub async fn submit(&self, session_id: &SessionId, message: &str) -> Result<String> {
        let worker = self
            .worker(session_id)
            .ok_or_else(|| SessionError::session_not_found(session_id.as_str()))?;
        worker.send(message).await
    }

    /// Tear down one worker and hand back its handle
    ///
    /// New submissions are refused immediately, the operation in flight is
    /// allowed to finish and anything still queued is cancelled.
    pub async fn drain(&self, session_id: &SessionId) -> Option<R::Handle> {
        let entry = self.workers.lock().remove(session_id)?;
        entry.cancel.cancel();
        join_worker(session_id, entry.task).await
    }

    /// Tear down every worker, waiting for in-flight operations
    ///
    /// Idempotent; returns the handles that were held.
    pub async fn stop(&self) -> Vec<R::Handle> {
        let entries: Vec<(SessionId, WorkerEntry<R::Handle>)> =
            self.workers.lock().drain().collect();
        if entries.is_empty() {
            return Vec::new();
        }

        log::info!("Stopping {} session worker(s)", entries.len());
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }

        let joins = entries
            .into_iter()
            .map(|(session_id, entry)| async move { join_worker(&session_id, entry.task).await });

        futures::future::join_all(joins)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Lets a crashed worker unregister itself
struct Retire<H> {
    workers: Weak<WorkerMap<H>>,
    generation: u64,
}

impl<H> Retire<H> {
    /// Remove this worker's entry, unless it was already drained or replaced
    fn retire(self, session_id: &SessionId) {
        let Some(workers) = self.workers.upgrade() else {
            return;
        };
        let mut workers = workers.lock();
        if workers
            .get(session_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            workers.remove(session_id);
        }
    }
}

async fn join_worker<H>(session_id: &SessionId, task: JoinHandle<H>) -> Option<H> {
    match task.await {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("[{session_id}] Worker task failed: {e}");
            None
        }
    }
}

/// Spawn the single-consumer loop for one session
///
/// The task owns the runtime handle and:
/// - Runs queued commands one at a time, in submission order
/// - Stops taking commands once `cancel` fires, without interrupting the
///   command currently running
/// - Skips commands whose caller stopped waiting before their turn
/// - Answers every command left in the queue with `Cancelled`
/// - Returns the handle so the caller can end or drop it
///
/// A panic inside the runtime retires the worker: it unregisters itself
/// before answering, so the next send resumes the session afresh.
fn spawn_worker_loop<R: AgentRuntime>(
    runtime: Arc<R>,
    mut handle: R::Handle,
    mut command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    cancel: CancellationToken,
    retire: Retire<R::Handle>,
) -> JoinHandle<R::Handle> {
    tokio::spawn(async move {
        let session_id = handle.session_id().clone();
        let mut retire = Some(retire);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if cmd.response_tx.is_closed() {
                        log::debug!("[{session_id}] Caller gone, skipping queued operation");
                        continue;
                    }

                    let outcome = AssertUnwindSafe(runtime.run(&mut handle, &cmd.message))
                        .catch_unwind()
                        .await;
                    let Ok(result) = outcome else {
                        log::error!("[{session_id}] Runtime panicked, retiring worker");
                        if let Some(retire) = retire.take() {
                            retire.retire(&session_id);
                        }
                        let _ = cmd.response_tx.send(Err(SessionError::runtime(format!(
                            "worker for session {session_id} crashed"
                        ))));
                        break;
                    };

                    if let Err(e) = &result {
                        log::warn!("[{session_id}] Operation failed: {e}");
                    }
                    // Caller may have gone away; the result is simply dropped then.
                    let _ = cmd.response_tx.send(result);
                }
            }
        }

        command_rx.close();
        let mut cancelled = 0usize;
        while let Ok(cmd) = command_rx.try_recv() {
            let _ = cmd
                .response_tx
                .send(Err(SessionError::cancelled(session_id.as_str())));
            cancelled += 1;
        }

        log::debug!("[{session_id}] Worker stopped ({cancelled} queued operation(s) cancelled)");
        handle
    })
}
