//! Signed transactions

use crate::action::LedgerAction;
use borsh::BorshSerialize;
use ledger_types::{verify_signature, Address, LedgerError, SigningIdentity, TxId};

/// A signed, ordered list of actions from one signer
#[derive(Clone, Debug)]
pub struct Transaction<A> {
    /// blake3 of the signed payload and signature
    pub id: TxId,
    /// Address of the signer
    pub signer: Address,
    /// Signer's ed25519 public key
    pub public_key: [u8; 32],
    /// Per-signer sequence number
    pub nonce: u64,
    /// Creation time (unix millis)
    pub timestamp: i64,
    /// Actions, in authored order
    pub actions: Vec<A>,
    /// Signature over the payload
    pub signature: [u8; 64],
}

impl<A: LedgerAction> Transaction<A> {
    /// Sign `actions` with `identity` at `nonce`
    pub fn sign(
        identity: &SigningIdentity,
        nonce: u64,
        actions: Vec<A>,
    ) -> Result<Self, LedgerError> {
        let signer = identity.address();
        let public_key = identity.public_key();
        let timestamp = chrono::Utc::now().timestamp_millis();

        let payload = signing_payload(&signer, &public_key, nonce, timestamp, &actions)?;
        let signature = identity.sign(&payload);

        Ok(Self {
            id: transaction_id(&payload, &signature),
            signer,
            public_key,
            nonce,
            timestamp,
            actions,
            signature,
        })
    }

    /// Check the signer binding, signature and id
    pub fn verify(&self) -> Result<(), LedgerError> {
        if Address::from_public_key(&self.public_key) != self.signer {
            return Err(LedgerError::InvalidSignature);
        }

        let payload = signing_payload(
            &self.signer,
            &self.public_key,
            self.nonce,
            self.timestamp,
            &self.actions,
        )?;
        verify_signature(&self.public_key, &payload, &self.signature)?;

        if transaction_id(&payload, &self.signature) != self.id {
            return Err(LedgerError::Rejected("transaction id mismatch".to_string()));
        }
        Ok(())
    }
}

fn signing_payload<A: BorshSerialize>(
    signer: &Address,
    public_key: &[u8; 32],
    nonce: u64,
    timestamp: i64,
    actions: &[A],
) -> Result<Vec<u8>, LedgerError> {
    let mut buf = Vec::new();
    let encoded = signer
        .serialize(&mut buf)
        .and_then(|_| public_key.serialize(&mut buf))
        .and_then(|_| nonce.serialize(&mut buf))
        .and_then(|_| timestamp.serialize(&mut buf))
        .and_then(|_| actions.serialize(&mut buf));
    encoded.map_err(|e| LedgerError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn transaction_id(payload: &[u8], signature: &[u8; 64]) -> TxId {
    let mut data = Vec::with_capacity(payload.len() + signature.len());
    data.extend_from_slice(payload);
    data.extend_from_slice(signature);
    TxId::digest(&data)
}
