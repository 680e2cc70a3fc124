//! Bridge Runtime - cross-thread action bridge for frame-driven hosts
//!
//! This crate connects a single-threaded host update loop to a ledger
//! client that works on background threads:
//! - Action queue: any thread hands callbacks to the host thread
//! - Drain loop: runs queued callbacks once per host tick
//! - Transaction builder: signs and submits off the host thread
//! - Agent: one explicitly passed facade per host instance

pub mod action_queue;
pub mod agent;
pub mod drain_loop;
pub mod error;
pub mod session;
pub mod tx_builder;

#[cfg(test)]
mod tests;

pub use action_queue::{ActionQueue, ActionSender, DrainReport, ScheduledCallback};
pub use agent::Agent;
pub use drain_loop::{DrainLoop, DrainLoopConfig, DrainState, DrainStats, ShutdownPolicy};
pub use error::{BridgeError, CallbackFailure};
pub use session::{ActionOf, LedgerClient, NodeSession, SessionPhase, StateOf};
pub use tx_builder::{SubmitResult, TransactionBuilder};

/// Default drain interval in milliseconds (10Hz)
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 100;

/// Default time an agent's stop waits for in-flight submissions
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1000;
