//! In-memory append-only ledger
//!
//! Concurrent by construction: nonces and state snapshots live in
//! DashMaps, the stage behind a mutex and the chain behind a RwLock, so
//! submissions, mining and state reads can run from any thread.

use crate::{
    action::{ActionContext, LedgerAction, StateValue},
    block::{Block, TxOutcome},
    transaction::Transaction,
    MAX_ACTIONS_PER_TRANSACTION, MAX_STAGED_TRANSACTIONS, MAX_TXS_PER_BLOCK,
};
use bridge_runtime::LedgerClient;
use dashmap::DashMap;
use ledger_types::{Address, BlockHash, LedgerError, SigningIdentity, TipChanged, TxId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::broadcast;

/// Full state at one block
type StateSnapshot = HashMap<Address, StateValue>;

/// Ledger limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum transactions waiting in the stage
    pub max_staged_transactions: usize,
    /// Maximum actions in one transaction
    pub max_actions_per_transaction: usize,
    /// Maximum transactions mined into one block
    pub max_transactions_per_block: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_staged_transactions: MAX_STAGED_TRANSACTIONS,
            max_actions_per_transaction: MAX_ACTIONS_PER_TRANSACTION,
            max_transactions_per_block: MAX_TXS_PER_BLOCK,
        }
    }
}

/// Where a transaction is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Waiting for a block
    Staged,
    /// Mined into the block at `block_index`
    Included {
        block_index: u64,
        outcome: TxOutcome,
    },
}

/// Append-only chain with a transaction stage
pub struct InMemoryLedger<A> {
    /// Blocks, genesis first
    blocks: RwLock<Vec<Block<A>>>,
    /// State after each block
    snapshots: DashMap<BlockHash, Arc<StateSnapshot>>,
    /// Transactions waiting for the miner, in staging order
    staged: Mutex<VecDeque<Transaction<A>>>,
    /// Next nonce per signer
    nonces: DashMap<Address, u64>,
    /// Status per transaction id
    statuses: DashMap<TxId, TxStatus>,
    /// Tip notifications
    tip_sender: broadcast::Sender<TipChanged>,
    config: LedgerConfig,
}

impl<A: LedgerAction> InMemoryLedger<A> {
    /// Create a ledger holding only the genesis block
    pub fn new(config: LedgerConfig, genesis_miner: Address) -> Self {
        let genesis = Block::genesis(genesis_miner);
        let snapshots = DashMap::new();
        snapshots.insert(genesis.hash, Arc::new(StateSnapshot::new()));
        let (tip_sender, _) = broadcast::channel(64);

        tracing::debug!("Ledger created with genesis {}", genesis.hash);

        Self {
            blocks: RwLock::new(vec![genesis]),
            snapshots,
            staged: Mutex::new(VecDeque::new()),
            nonces: DashMap::new(),
            statuses: DashMap::new(),
            tip_sender,
            config,
        }
    }

    /// Sign and stage a transaction
    ///
    /// Nonce allocation, signing and staging happen under the signer's
    /// nonce entry, so a signer's staging order always matches its nonces.
    pub fn stage_transaction(
        &self,
        identity: &SigningIdentity,
        actions: Vec<A>,
    ) -> Result<TxId, LedgerError> {
        if actions.len() > self.config.max_actions_per_transaction {
            return Err(LedgerError::Rejected(format!(
                "{} actions exceed the limit of {}",
                actions.len(),
                self.config.max_actions_per_transaction
            )));
        }

        let signer = identity.address();
        let mut next_nonce = self.nonces.entry(signer).or_insert(0);
        let tx = Transaction::sign(identity, *next_nonce, actions)?;
        let tx_id = tx.id;
        let nonce = tx.nonce;

        {
            let mut staged = self.staged.lock();
            if staged.len() >= self.config.max_staged_transactions {
                return Err(LedgerError::StageFull(staged.len()));
            }
            self.statuses.insert(tx_id, TxStatus::Staged);
            staged.push_back(tx);
        }
        *next_nonce += 1;

        tracing::debug!("Staged transaction {} (signer {}, nonce {})", tx_id, signer, nonce);
        Ok(tx_id)
    }

    /// Mine staged transactions into a new block on top of the tip
    ///
    /// Returns `None` when nothing is staged and `allow_empty` is false.
    /// Each transaction is verified and executed atomically against the
    /// state left by the previous one; failures are recorded in the block
    /// without touching state.
    pub fn mine_block(&self, miner: Address, allow_empty: bool) -> Option<TipChanged> {
        // Held from taking the batch until the block is appended, so
        // concurrent miners append batches in the order they were staged
        let mut blocks = self.blocks.write();
        let candidates: Vec<Transaction<A>> = {
            let mut staged = self.staged.lock();
            let take = staged.len().min(self.config.max_transactions_per_block);
            staged.drain(..take).collect()
        };
        if candidates.is_empty() && !allow_empty {
            return None;
        }

        let (prev_index, prev_hash) = match blocks.last() {
            Some(prev) => (prev.index, prev.hash),
            None => return None,
        };
        let index = prev_index + 1;

        let mut state = self
            .snapshots
            .get(&prev_hash)
            .map(|snapshot| StateSnapshot::clone(snapshot.value()))
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(candidates.len());
        for tx in &candidates {
            let outcome = match tx.verify() {
                Err(e) => TxOutcome::Failed(e.to_string()),
                Ok(()) => {
                    let mut working = state.clone();
                    let mut ctx = ActionContext::new(tx.signer, index, &mut working);
                    let executed = tx
                        .actions
                        .iter()
                        .try_for_each(|action| action.execute(&mut ctx));
                    match executed {
                        Ok(()) => {
                            state = working;
                            TxOutcome::Applied
                        }
                        Err(e) => TxOutcome::Failed(e.to_string()),
                    }
                }
            };
            if let TxOutcome::Failed(reason) = &outcome {
                tracing::debug!("Transaction {} failed in block {}: {}", tx.id, index, reason);
            }
            outcomes.push(outcome);
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let block = Block::new(index, Some(prev_hash), timestamp, miner, candidates, outcomes);

        for (tx, outcome) in block.transactions.iter().zip(&block.outcomes) {
            self.statuses.insert(
                tx.id,
                TxStatus::Included {
                    block_index: index,
                    outcome: outcome.clone(),
                },
            );
        }
        self.snapshots.insert(block.hash, Arc::new(state));

        let tip = TipChanged {
            index,
            hash: block.hash,
            transaction_count: block.transactions.len(),
        };
        blocks.push(block);
        drop(blocks);

        // No subscribers is fine
        let _ = self.tip_sender.send(tip);
        Some(tip)
    }

    /// State at `address` after the given block (tip when `None`)
    pub fn state_at(
        &self,
        address: &Address,
        at: Option<BlockHash>,
    ) -> Result<Option<StateValue>, LedgerError> {
        let hash = at.unwrap_or_else(|| self.tip_hash());
        let snapshot = self
            .snapshots
            .get(&hash)
            .map(|snapshot| snapshot.value().clone())
            .ok_or(LedgerError::UnknownBlock(hash))?;
        Ok(snapshot.get(address).cloned())
    }

    pub fn tip_hash(&self) -> BlockHash {
        self.blocks.read().last().map(|block| block.hash).unwrap_or_default()
    }

    pub fn tip_index(&self) -> u64 {
        self.blocks.read().last().map(|block| block.index).unwrap_or(0)
    }

    /// Number of blocks including genesis
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn block(&self, index: u64) -> Option<Block<A>> {
        self.blocks.read().get(index as usize).cloned()
    }

    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    pub fn tx_status(&self, tx_id: &TxId) -> Option<TxStatus> {
        self.statuses.get(tx_id).map(|status| status.value().clone())
    }

    /// Nonce the next transaction from `signer` will get
    pub fn next_nonce(&self, signer: &Address) -> u64 {
        self.nonces.get(signer).map(|nonce| *nonce).unwrap_or(0)
    }

    /// Subscribe to tip notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TipChanged> {
        self.tip_sender.subscribe()
    }
}

impl<A: LedgerAction> LedgerClient for InMemoryLedger<A> {
    type Action = A;
    type State = StateValue;

    fn make_transaction(
        &self,
        signer: &SigningIdentity,
        actions: Vec<A>,
    ) -> Result<TxId, LedgerError> {
        self.stage_transaction(signer, actions)
    }

    fn get_state(
        &self,
        address: &Address,
        at: Option<BlockHash>,
    ) -> Result<Option<StateValue>, LedgerError> {
        self.state_at(address, at)
    }

    fn tip(&self) -> BlockHash {
        self.tip_hash()
    }
}
