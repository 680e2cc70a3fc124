//! Miner - periodic block production
//!
//! Mines the ledger's staged transactions into a block every
//! `block_interval_ms` on the tokio runtime.

use crate::{action::LedgerAction, ledger::InMemoryLedger, DEFAULT_BLOCK_INTERVAL_MS};
use ledger_types::{Address, TipChanged};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Miner configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Block interval in milliseconds
    pub block_interval_ms: u64,
    /// Append a block even when nothing is staged
    pub mine_empty_blocks: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: DEFAULT_BLOCK_INTERVAL_MS,
            mine_empty_blocks: false,
        }
    }
}

/// Background block producer for an [`InMemoryLedger`]
pub struct Miner<A> {
    ledger: Arc<InMemoryLedger<A>>,
    /// Address credited with mined blocks
    address: Address,
    config: MinerConfig,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl<A: LedgerAction> Miner<A> {
    pub fn new(ledger: Arc<InMemoryLedger<A>>, address: Address, config: MinerConfig) -> Self {
        Self {
            ledger,
            address,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag shared with the running loop; clearing it stops the miner
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the miner after its current block
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Mine one block now
    pub fn mine_once(&self) -> Option<TipChanged> {
        self.ledger.mine_block(self.address, self.config.mine_empty_blocks)
    }

    /// Run the miner until stopped (tokio)
    pub async fn run_async(self) {
        let block_duration = Duration::from_millis(self.config.block_interval_ms.max(1));
        let mut interval = tokio::time::interval(block_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        tracing::info!(
            "Miner started ({}ms blocks, empty blocks {})",
            self.config.block_interval_ms,
            if self.config.mine_empty_blocks { "on" } else { "off" }
        );

        loop {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let tick_start = Instant::now();

            if let Some(tip) = self.mine_once() {
                tracing::debug!(
                    "Block {} | {} txs | {}",
                    tip.index,
                    tip.transaction_count,
                    tip.hash
                );
            }

            let processing_time = tick_start.elapsed();
            if processing_time > block_duration {
                tracing::warn!(
                    "Block took {:.2}ms (target: {}ms)",
                    processing_time.as_secs_f64() * 1000.0,
                    self.config.block_interval_ms
                );
            }
        }

        tracing::info!("Miner stopped at block {}", self.ledger.tip_index());
    }
}
