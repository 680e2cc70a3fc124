//! Node Session boundary
//!
//! The bridge never owns the blockchain engine. It talks to it through
//! these two traits: a thread-safe [`LedgerClient`] for submissions and
//! state reads, and the [`NodeSession`] that owns that client, the signing
//! identity and the node lifecycle.

use ledger_types::{Address, BlockHash, LedgerError, SigningIdentity, TipChanged, TxId};
use std::{fmt, sync::Arc};
use tokio::sync::{broadcast, watch};

/// Lifecycle published by a node session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Running,
    Stopped,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::NotStarted => "not_started",
            SessionPhase::Running => "running",
            SessionPhase::Stopped => "stopped",
        }
    }
}

/// Handle used to submit transactions and query state
///
/// Implementations must be safe for concurrent use; the bridge adds no
/// locking of its own around it. Per-identity ordering (nonces) is the
/// client's responsibility.
pub trait LedgerClient: Send + Sync + 'static {
    /// Domain action carried by transactions
    type Action: fmt::Debug + Send + 'static;
    /// State value stored at an address
    type State: Clone + Send + 'static;

    /// Sign `actions` with `signer`, stage the transaction and return its id
    fn make_transaction(
        &self,
        signer: &SigningIdentity,
        actions: Vec<Self::Action>,
    ) -> Result<TxId, LedgerError>;

    /// State at `address`, at the given block or at the tip
    fn get_state(
        &self,
        address: &Address,
        at: Option<BlockHash>,
    ) -> Result<Option<Self::State>, LedgerError>;

    /// Hash of the current tip
    fn tip(&self) -> BlockHash;
}

/// Long-lived node owning the ledger client and signing identity
pub trait NodeSession: Send + Sync + 'static {
    type Ledger: LedgerClient;

    /// Ledger handle, valid for the session's lifetime
    fn current_ledger_handle(&self) -> Arc<Self::Ledger>;

    /// Identity used to author transactions
    fn signing_identity(&self) -> &SigningIdentity;

    /// Lifecycle events (`Running` = started, `Stopped` = stopped)
    fn lifecycle(&self) -> watch::Receiver<SessionPhase>;

    /// Start background work (sync, mining)
    fn start(&self) -> anyhow::Result<()>;

    /// Stop background work; the session cannot be restarted
    fn stop(&self);

    /// Notifications for every appended block
    fn subscribe_tip(&self) -> broadcast::Receiver<TipChanged>;
}

/// Shorthand for the action type of a session's ledger
pub type ActionOf<S> = <<S as NodeSession>::Ledger as LedgerClient>::Action;

/// Shorthand for the state type of a session's ledger
pub type StateOf<S> = <<S as NodeSession>::Ledger as LedgerClient>::State;
