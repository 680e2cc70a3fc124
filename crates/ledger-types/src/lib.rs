//! Shared ledger primitives
//!
//! Types exchanged between the host bridge and a ledger client:
//! addresses, transaction ids, block hashes, the signing identity and
//! the tip notifications a node publishes after appending a block.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;
use thiserror::Error;

/// Length of an account address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Account address, derived from the signer's public key
#[derive(
    BorshSerialize, BorshDeserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Derive the address owned by an ed25519 public key
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = blake3::hash(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_LEN]);
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_LEN] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

macro_rules! digest_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(BorshSerialize, BorshDeserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Hash arbitrary bytes with blake3
            pub fn digest(data: &[u8]) -> Self {
                Self(*blake3::hash(data).as_bytes())
            }

            pub fn to_bytes(&self) -> [u8; 32] {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", bs58::encode(self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

digest_newtype!(
    /// Transaction identifier (blake3 of the signed transaction payload)
    TxId
);

digest_newtype!(
    /// Block hash (blake3 of the block header)
    BlockHash
);

/// Private credential used to author and authorize transactions
///
/// Cloning copies the secret key; hand out clones only to code that signs.
#[derive(Clone)]
pub struct SigningIdentity {
    key: SigningKey,
    address: Address,
}

impl SigningIdentity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        let secret: [u8; 32] = rand::random();
        Self::from_secret_bytes(&secret)
    }

    /// Rebuild an identity from its 32-byte secret
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(secret);
        let address = Address::from_public_key(&key.verifying_key().to_bytes());
        Self { key, address }
    }

    /// Address owned by this identity
    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw ed25519 public key
    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Check an ed25519 signature produced by [`SigningIdentity::sign`]
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), LedgerError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| LedgerError::InvalidSignature)?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|_| LedgerError::InvalidSignature)
}

/// Published by a node each time a block is appended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TipChanged {
    /// Height of the new tip (genesis is 0)
    pub index: u64,
    /// Hash of the new tip
    pub hash: BlockHash,
    /// Transactions included in the block
    pub transaction_count: usize,
}

/// Errors reported by a ledger client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unknown block: {0}")]
    UnknownBlock(BlockHash),

    #[error("Stage is full ({0} transactions pending)")]
    StageFull(usize),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}
