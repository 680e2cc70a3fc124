//! Bridge errors

use ledger_types::LedgerError;
use thiserror::Error;

/// Errors surfaced by the action bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Called before `start()` or after `stop()`
    #[error("Session not ready: {0}")]
    SessionNotReady(&'static str),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// The host side of the action queue has been torn down
    #[error("Action queue closed")]
    QueueClosed,

    /// The ledger client refused or failed the submission
    #[error("Submission failed: {0}")]
    Submission(#[from] LedgerError),

    /// The ledger client failed a state query
    #[error("State query failed: {0}")]
    Query(LedgerError),

    #[error("Background task panicked: {0}")]
    BackgroundPanic(String),

    #[error("Background task lost: {0}")]
    BackgroundTask(String),

    #[error("Node session failed to start: {0}")]
    SessionStart(String),
}

/// Why a scheduled callback did not complete
#[derive(Error, Debug)]
pub enum CallbackFailure {
    #[error("callback returned an error: {0:#}")]
    Failed(anyhow::Error),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
