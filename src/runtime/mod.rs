//! Agent runtime contract
//!
//! The runtime that actually executes conversational turns lives outside
//! this crate. It is consumed through the narrow create/resume/run/end
//! interface below.

use std::future::Future;

use crate::error::Result;
use crate::types::{CreateSessionRequest, SessionId};

/// Live session object handed out by a runtime
pub trait SessionHandle: Send + 'static {
    /// Immutable id of the session behind this handle
    fn session_id(&self) -> &SessionId;
}

/// Runtime trait for creating and driving agent sessions
///
/// Handles are moved into the session's worker and never shared; every
/// call that touches a handle runs on that worker.
pub trait AgentRuntime: Send + Sync + 'static {
    /// Handle type produced by `create` and `resume`
    type Handle: SessionHandle;

    /// Create a brand-new session
    ///
    /// # Errors
    /// Returns a runtime error if the session could not be started. Callers
    /// may retry.
    fn create(
        &self,
        request: &CreateSessionRequest,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Re-open an existing session by id
    ///
    /// # Errors
    /// Returns `SessionNotFound` when the session state is gone, or a
    /// runtime error for transient failures
    fn resume(&self, session_id: &SessionId) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Run a single request/response turn
    ///
    /// # Errors
    /// Returns error on transport or model failures
    fn run(
        &self,
        handle: &mut Self::Handle,
        message: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// End the session, best effort
    ///
    /// # Errors
    /// Returns error if the runtime could not release the session
    fn end(&self, handle: Self::Handle) -> impl Future<Output = Result<()>> + Send;
}
