//! Test doubles for the node session boundary

use crate::session::{LedgerClient, NodeSession, SessionPhase};
use ledger_types::{Address, BlockHash, LedgerError, SigningIdentity, TipChanged, TxId};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{broadcast, watch};

/// Actions understood by [`MockLedger`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockAction {
    /// Add to the signer's counter
    Add(i64),
    /// Make the ledger reject the transaction
    Reject,
    /// Make the ledger panic
    Panic,
}

#[derive(Clone, Debug)]
pub struct StagedTx {
    pub id: TxId,
    pub signer: Address,
    pub nonce: u64,
    pub actions: Vec<MockAction>,
}

/// Ledger keeping one counter per address, applied at staging time
pub struct MockLedger {
    staged: Mutex<Vec<StagedTx>>,
    nonces: Mutex<HashMap<Address, u64>>,
    counters: Mutex<HashMap<Address, i64>>,
    latency: Option<Duration>,
    tip: BlockHash,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            staged: Mutex::new(Vec::new()),
            nonces: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            latency: None,
            tip: BlockHash::digest(b"mock genesis"),
        }
    }

    /// Sleep this long inside every submission
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn staged(&self) -> Vec<StagedTx> {
        self.staged.lock().clone()
    }
}

impl LedgerClient for MockLedger {
    type Action = MockAction;
    type State = i64;

    fn make_transaction(
        &self,
        signer: &SigningIdentity,
        actions: Vec<MockAction>,
    ) -> Result<TxId, LedgerError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        if actions.contains(&MockAction::Panic) {
            panic!("mock ledger exploded");
        }
        if actions.contains(&MockAction::Reject) {
            return Err(LedgerError::Rejected("mock rejection".to_string()));
        }

        let address = signer.address();
        let nonce = {
            let mut nonces = self.nonces.lock();
            let next = nonces.entry(address).or_insert(0);
            let nonce = *next;
            *next += 1;
            nonce
        };
        let id = TxId::digest(format!("{}:{}", address, nonce).as_bytes());

        let delta: i64 = actions
            .iter()
            .map(|action| match action {
                MockAction::Add(n) => *n,
                _ => 0,
            })
            .sum();
        *self.counters.lock().entry(address).or_insert(0) += delta;

        self.staged.lock().push(StagedTx {
            id,
            signer: address,
            nonce,
            actions,
        });
        Ok(id)
    }

    fn get_state(
        &self,
        address: &Address,
        at: Option<BlockHash>,
    ) -> Result<Option<i64>, LedgerError> {
        match at {
            Some(hash) if hash != self.tip => Err(LedgerError::UnknownBlock(hash)),
            _ => Ok(self.counters.lock().get(address).copied()),
        }
    }

    fn tip(&self) -> BlockHash {
        self.tip
    }
}

/// Session wrapping a [`MockLedger`] with a controllable lifecycle
pub struct MockSession {
    ledger: Arc<MockLedger>,
    identity: SigningIdentity,
    phase: watch::Sender<SessionPhase>,
    tips: broadcast::Sender<TipChanged>,
    fail_start: bool,
}

impl MockSession {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::NotStarted);
        let (tips, _) = broadcast::channel(16);
        Self {
            ledger: Arc::new(MockLedger::new()),
            identity: SigningIdentity::generate(),
            phase,
            tips,
            fail_start: false,
        }
    }

    /// A session whose ledger sleeps this long inside every submission
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            ledger: Arc::new(MockLedger::with_latency(latency)),
            ..Self::new()
        }
    }

    /// A session whose `start` always fails
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn ledger(&self) -> Arc<MockLedger> {
        self.ledger.clone()
    }

    /// Pretend a block at `index` was appended
    pub fn publish_tip(&self, index: u64) {
        let _ = self.tips.send(TipChanged {
            index,
            hash: BlockHash::digest(&index.to_le_bytes()),
            transaction_count: 0,
        });
    }
}

impl NodeSession for MockSession {
    type Ledger = MockLedger;

    fn current_ledger_handle(&self) -> Arc<MockLedger> {
        self.ledger.clone()
    }

    fn signing_identity(&self) -> &SigningIdentity {
        &self.identity
    }

    fn lifecycle(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    fn start(&self) -> anyhow::Result<()> {
        if self.fail_start {
            anyhow::bail!("mock session refused to start");
        }
        if self.phase() != SessionPhase::NotStarted {
            anyhow::bail!("mock session already {}", self.phase().as_str());
        }
        self.phase.send_replace(SessionPhase::Running);
        Ok(())
    }

    fn stop(&self) {
        self.phase.send_replace(SessionPhase::Stopped);
    }

    fn subscribe_tip(&self) -> broadcast::Receiver<TipChanged> {
        self.tips.subscribe()
    }
}
