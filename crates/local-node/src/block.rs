//! Blocks of the local chain

use crate::transaction::Transaction;
use ledger_types::{Address, BlockHash};

/// Result of executing one transaction in a block
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    /// All actions applied
    Applied,
    /// Nothing applied; the reason is recorded
    Failed(String),
}

/// An appended block
#[derive(Clone, Debug)]
pub struct Block<A> {
    /// Height (genesis is 0)
    pub index: u64,
    /// Hash of this block's header
    pub hash: BlockHash,
    /// Hash of the parent block (None for genesis)
    pub prev_hash: Option<BlockHash>,
    /// Mining time (unix millis)
    pub timestamp: i64,
    /// Address credited with the block
    pub miner: Address,
    /// Included transactions, in execution order
    pub transactions: Vec<Transaction<A>>,
    /// Outcome per transaction, same order
    pub outcomes: Vec<TxOutcome>,
}

impl<A> Block<A> {
    /// Genesis block; deterministic for a given miner
    pub fn genesis(miner: Address) -> Self {
        Self::new(0, None, 0, miner, Vec::new(), Vec::new())
    }

    pub fn new(
        index: u64,
        prev_hash: Option<BlockHash>,
        timestamp: i64,
        miner: Address,
        transactions: Vec<Transaction<A>>,
        outcomes: Vec<TxOutcome>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&index.to_le_bytes());
        match prev_hash {
            Some(prev) => hasher.update(&[1]).update(&prev.0),
            None => hasher.update(&[0]),
        };
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&miner.0);
        for tx in &transactions {
            hasher.update(&tx.id.0);
        }

        Self {
            index,
            hash: BlockHash(*hasher.finalize().as_bytes()),
            prev_hash,
            timestamp,
            miner,
            transactions,
            outcomes,
        }
    }

    /// Transactions whose actions were applied
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| **outcome == TxOutcome::Applied)
            .count()
    }
}
