//! Worker command protocol
//!
//! Operations reach a session's worker as queued commands, each carrying
//! the oneshot slot its result is delivered through.

use tokio::sync::oneshot;

use crate::error::Result;

/// A message-send queued on a session worker
///
/// The oneshot sender is consumed on delivery, so a slot can never be
/// resolved twice.
pub(super) struct WorkerCommand {
    /// Text for a single runtime turn
    pub message: String,
    /// Channel to send the turn result back
    pub response_tx: oneshot::Sender<Result<String>>,
}
