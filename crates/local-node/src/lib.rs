//! Local Node - in-process node session
//!
//! A self-contained [`bridge_runtime::NodeSession`] for hosts that run
//! their own chain:
//! - Signed transactions with per-signer nonces
//! - Append-only in-memory ledger with per-block state snapshots
//! - Background miner on the tokio runtime

pub mod action;
pub mod block;
pub mod ledger;
pub mod miner;
pub mod node;
pub mod transaction;

pub use action::{ActionContext, ActionError, LedgerAction, StateValue};
pub use block::{Block, TxOutcome};
pub use ledger::{InMemoryLedger, LedgerConfig, TxStatus};
pub use miner::{Miner, MinerConfig};
pub use node::{LocalNode, NodeConfig};
pub use transaction::Transaction;

/// Default block interval in milliseconds
pub const DEFAULT_BLOCK_INTERVAL_MS: u64 = 1000;

/// Maximum transactions waiting in the stage
pub const MAX_STAGED_TRANSACTIONS: usize = 4096;

/// Maximum actions carried by one transaction
pub const MAX_ACTIONS_PER_TRANSACTION: usize = 64;

/// Maximum transactions per block
pub const MAX_TXS_PER_BLOCK: usize = 512;
