//! Local Node - in-process [`NodeSession`]
//!
//! Owns the ledger, the signing identity and the miner task. Lifecycle is
//! one-way: `NotStarted` -> `Running` -> `Stopped`.

use crate::{
    action::LedgerAction,
    ledger::{InMemoryLedger, LedgerConfig},
    miner::{Miner, MinerConfig},
    DEFAULT_BLOCK_INTERVAL_MS,
};
use anyhow::{bail, Result};
use bridge_runtime::{NodeSession, SessionPhase};
use ledger_types::{SigningIdentity, TipChanged};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
    task::JoinHandle,
};

/// Node configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Block interval in milliseconds
    pub block_interval_ms: u64,
    /// Append blocks even when nothing is staged
    pub mine_empty_blocks: bool,
    /// Ledger limits
    pub ledger: LedgerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: DEFAULT_BLOCK_INTERVAL_MS,
            mine_empty_blocks: false,
            ledger: LedgerConfig::default(),
        }
    }
}

impl NodeConfig {
    fn miner_config(&self) -> MinerConfig {
        MinerConfig {
            block_interval_ms: self.block_interval_ms,
            mine_empty_blocks: self.mine_empty_blocks,
        }
    }
}

/// Running miner task and its stop flag
struct MinerTask {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// In-process node session
pub struct LocalNode<A> {
    ledger: Arc<InMemoryLedger<A>>,
    identity: SigningIdentity,
    config: NodeConfig,
    /// Runtime the miner runs on
    runtime: Handle,
    /// Lifecycle publisher
    phase: watch::Sender<SessionPhase>,
    miner: Mutex<Option<MinerTask>>,
}

impl<A: LedgerAction> LocalNode<A> {
    /// Create a node; the miner starts with [`NodeSession::start`]
    pub fn new(identity: SigningIdentity, config: NodeConfig, runtime: Handle) -> Self {
        let ledger = Arc::new(InMemoryLedger::new(config.ledger.clone(), identity.address()));
        let (phase, _) = watch::channel(SessionPhase::NotStarted);

        Self {
            ledger,
            identity,
            config,
            runtime,
            phase,
            miner: Mutex::new(None),
        }
    }

    /// Create a node with a fresh random identity
    pub fn with_random_identity(config: NodeConfig, runtime: Handle) -> Self {
        Self::new(SigningIdentity::generate(), config, runtime)
    }

    pub fn ledger(&self) -> &Arc<InMemoryLedger<A>> {
        &self.ledger
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Mine one block immediately, outside the miner's schedule
    pub fn mine_now(&self) -> Option<TipChanged> {
        self.ledger
            .mine_block(self.identity.address(), self.config.mine_empty_blocks)
    }
}

impl<A: LedgerAction> NodeSession for LocalNode<A> {
    type Ledger = InMemoryLedger<A>;

    fn current_ledger_handle(&self) -> Arc<InMemoryLedger<A>> {
        self.ledger.clone()
    }

    fn signing_identity(&self) -> &SigningIdentity {
        &self.identity
    }

    fn lifecycle(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    fn start(&self) -> Result<()> {
        let mut miner_slot = self.miner.lock();
        let phase = self.phase();
        if phase != SessionPhase::NotStarted {
            bail!("Cannot start node: session is {}", phase.as_str());
        }

        let miner = Miner::new(
            self.ledger.clone(),
            self.identity.address(),
            self.config.miner_config(),
        );
        let running = miner.running_flag();
        let handle = self.runtime.spawn(miner.run_async());
        *miner_slot = Some(MinerTask { running, handle });

        self.phase.send_replace(SessionPhase::Running);
        tracing::info!(
            "Local node {} started ({}ms blocks)",
            self.identity.address(),
            self.config.block_interval_ms
        );
        Ok(())
    }

    fn stop(&self) {
        let mut miner_slot = self.miner.lock();
        if self.phase() == SessionPhase::Stopped {
            return;
        }

        if let Some(task) = miner_slot.take() {
            task.running.store(false, Ordering::SeqCst);
            // Blocks already mined stay; an in-flight tick is abandoned
            task.handle.abort();
        }
        self.phase.send_replace(SessionPhase::Stopped);
        tracing::info!(
            "Local node {} stopped at block {}",
            self.identity.address(),
            self.ledger.tip_index()
        );
    }

    fn subscribe_tip(&self) -> broadcast::Receiver<TipChanged> {
        self.ledger.subscribe()
    }
}

impl<A> Drop for LocalNode<A> {
    fn drop(&mut self) {
        if let Some(task) = self.miner.get_mut().take() {
            task.running.store(false, Ordering::SeqCst);
            task.handle.abort();
        }
    }
}
