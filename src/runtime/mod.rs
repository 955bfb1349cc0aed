//! Transaction host for a single token.
//!
//! The [`Executor`] stands in for the chain: it owns the token state, learns
//! the caller from a verified Ed25519 signature, and applies one transaction at
//! a time. A transaction that fails for any reason changes nothing, including
//! the sender's nonce.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    identity::{Account, Address},
    ledger::{serde_amount, Amount},
    token::{PiastreToken, SnapshotError, TokenError, TokenSnapshot},
};

const TX_DOMAIN: &[u8] = b"piastre-act/tx/v1";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    Mint {
        to: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    Transfer {
        to: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    TransferOwnership {
        new_owner: Address,
    },
    RenounceOwnership,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub call: Call,
}

impl Transaction {
    pub fn new(nonce: u64, call: Call) -> Self {
        Self { nonce, call }
    }

    pub fn digest(&self) -> Result<[u8; 32], RuntimeError> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| RuntimeError::Encoding(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(TX_DOMAIN);
        hasher.update(&encoded);
        Ok(hasher.finalize().into())
    }

    pub fn sign(self, account: &Account) -> Result<SignedTransaction, RuntimeError> {
        let digest = self.digest()?;
        let signature = account.sign(&digest);
        Ok(SignedTransaction {
            tx: self,
            public_key: account.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    #[serde(with = "serde_key")]
    pub public_key: [u8; 32],
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Verifies the signature and returns the address it belongs to.
    pub fn sender(&self) -> Result<Address, RuntimeError> {
        let key =
            VerifyingKey::from_bytes(&self.public_key).map_err(|_| RuntimeError::MalformedKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| RuntimeError::MalformedSignature)?;
        key.verify_strict(&self.tx.digest()?, &signature)
            .map_err(|_| RuntimeError::InvalidSignature)?;
        Ok(Address::from_verifying_key(&key))
    }

    pub fn hash(&self) -> Result<[u8; 32], RuntimeError> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| RuntimeError::Encoding(e.to_string()))?;
        Ok(Sha256::digest(&encoded).into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub index: u64,
    pub sender: Address,
    pub nonce: u64,
    pub call: Call,
    #[serde(with = "crate::token::serde_root")]
    pub tx_hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("nonce mismatch for {sender}: expected {expected}, got {actual}")]
    NonceMismatch {
        sender: Address,
        expected: u64,
        actual: u64,
    },
    #[error("transaction reverted: {0}")]
    Reverted(#[from] TokenError),
    #[error("transaction encoding failed: {0}")]
    Encoding(String),
    #[error("invalid state: {0}")]
    State(#[from] SnapshotError),
    #[error("receipt log is out of sequence at entry {index}")]
    ReceiptSequence { index: u64 },
    #[error("nonce table disagrees with receipts for {sender}")]
    NonceTable { sender: Address },
}

/// Persisted image of an [`Executor`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorState {
    pub token: TokenSnapshot,
    pub nonces: BTreeMap<Address, u64>,
    pub receipts: Vec<Receipt>,
}

#[derive(Clone, Debug)]
pub struct Executor {
    token: PiastreToken,
    nonces: BTreeMap<Address, u64>,
    receipts: Vec<Receipt>,
}

impl Executor {
    pub fn new(token: PiastreToken) -> Self {
        Self {
            token,
            nonces: BTreeMap::new(),
            receipts: Vec::new(),
        }
    }

    /// Deploys a fresh token owned by `owner`.
    pub fn deploy(owner: Address) -> Result<Self, RuntimeError> {
        Ok(Self::new(PiastreToken::new(owner)?))
    }

    pub fn token(&self) -> &PiastreToken {
        &self.token
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn next_nonce(&self, sender: &Address) -> u64 {
        self.nonces.get(sender).copied().unwrap_or(0)
    }

    /// Signs `call` with the account's next nonce and submits it.
    pub fn send(&mut self, account: &Account, call: Call) -> Result<Receipt, RuntimeError> {
        let nonce = self.next_nonce(&account.address());
        let signed = Transaction::new(nonce, call).sign(account)?;
        self.submit(signed)
    }

    pub fn submit(&mut self, signed: SignedTransaction) -> Result<Receipt, RuntimeError> {
        let sender = signed.sender().map_err(|err| {
            warn!("transaction rejected: {err}");
            err
        })?;
        let expected = self.next_nonce(&sender);
        if signed.tx.nonce != expected {
            warn!(
                %sender,
                expected,
                actual = signed.tx.nonce,
                "transaction rejected: nonce mismatch"
            );
            return Err(RuntimeError::NonceMismatch {
                sender,
                expected,
                actual: signed.tx.nonce,
            });
        }
        let tx_hash = signed.hash()?;
        self.execute(&sender, &signed.tx.call)?;

        self.nonces.insert(sender, expected + 1);
        let receipt = Receipt {
            index: self.receipts.len() as u64,
            sender,
            nonce: expected,
            call: signed.tx.call,
            tx_hash,
        };
        debug!(index = receipt.index, %sender, nonce = expected, "transaction applied");
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Applies `call` on behalf of `caller` without signature or nonce checks.
    pub fn execute(&mut self, caller: &Address, call: &Call) -> Result<(), RuntimeError> {
        match call {
            Call::Mint { to, amount } => self.token.mint(*to, *amount, caller)?,
            Call::Transfer { to, amount } => self.token.transfer(*to, *amount, caller)?,
            Call::TransferOwnership { new_owner } => {
                self.token.transfer_ownership(*new_owner, caller)?
            }
            Call::RenounceOwnership => self.token.renounce_ownership(caller)?,
        }
        Ok(())
    }

    pub fn state(&self) -> ExecutorState {
        ExecutorState {
            token: self.token.snapshot(),
            nonces: self.nonces.clone(),
            receipts: self.receipts.clone(),
        }
    }

    /// Restores an executor. The nonce table must be exactly what the receipt
    /// log implies, so an edited state cannot reopen a spent nonce.
    pub fn from_state(state: ExecutorState) -> Result<Self, RuntimeError> {
        let token = PiastreToken::from_snapshot(state.token)?;
        let nonces = nonces_from_receipts(&state.receipts)?;
        let stored: BTreeMap<Address, u64> = state
            .nonces
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .collect();
        if let Some(sender) = nonces
            .keys()
            .chain(stored.keys())
            .find(|sender| nonces.get(*sender) != stored.get(*sender))
        {
            return Err(RuntimeError::NonceTable { sender: *sender });
        }
        Ok(Self {
            token,
            nonces,
            receipts: state.receipts,
        })
    }
}

fn nonces_from_receipts(receipts: &[Receipt]) -> Result<BTreeMap<Address, u64>, RuntimeError> {
    let mut nonces = BTreeMap::new();
    for (position, receipt) in receipts.iter().enumerate() {
        let next = nonces.entry(receipt.sender).or_insert(0u64);
        if receipt.index != position as u64 || receipt.nonce != *next {
            return Err(RuntimeError::ReceiptSequence {
                index: position as u64,
            });
        }
        *next += 1;
    }
    Ok(nonces)
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

mod serde_key {
    use serde::{de::Error, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::serde_bytes::serialize(&value.to_vec(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        super::serde_bytes::deserialize(deserializer)?
            .try_into()
            .map_err(|_| D::Error::custom("public key must be 32 bytes"))
    }
}
