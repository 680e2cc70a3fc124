//! Domain actions executed by the local ledger

use borsh::BorshSerialize;
use ledger_types::Address;
use std::{collections::HashMap, fmt};
use thiserror::Error;

/// Value stored at an address
pub type StateValue = serde_json::Value;

/// Action execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Invalid action: {0}")]
    Invalid(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// A domain action carried by transactions
///
/// Actions are borsh-encoded into the signed payload, so the encoding must
/// be deterministic. A transaction applies all of its actions or none.
pub trait LedgerAction: BorshSerialize + fmt::Debug + Clone + Send + Sync + 'static {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError>;
}

/// View of the ledger state handed to an executing action
pub struct ActionContext<'a> {
    signer: Address,
    block_index: u64,
    states: &'a mut HashMap<Address, StateValue>,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        signer: Address,
        block_index: u64,
        states: &'a mut HashMap<Address, StateValue>,
    ) -> Self {
        Self {
            signer,
            block_index,
            states,
        }
    }

    /// Address that signed the transaction
    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Index of the block being mined
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    pub fn get_state(&self, address: &Address) -> Option<&StateValue> {
        self.states.get(address)
    }

    pub fn set_state(&mut self, address: Address, value: StateValue) {
        self.states.insert(address, value);
    }

    pub fn remove_state(&mut self, address: &Address) -> Option<StateValue> {
        self.states.remove(address)
    }
}
