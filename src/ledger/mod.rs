use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::Address;

pub type Amount = u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("transfer amount exceeds balance of {account}: balance {balance}, needed {needed}")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        needed: Amount,
    },
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Mints are recorded as transfers from [`Address::ZERO`].
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    OwnershipTransferred {
        previous: Address,
        new: Address,
    },
}

/// Conserved-value balance table with a running total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Balances {
    accounts: BTreeMap<Address, Amount>,
    total: Amount,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from stored balances; the total is recomputed.
    pub fn from_accounts(accounts: BTreeMap<Address, Amount>) -> Result<Self, LedgerError> {
        let mut total: Amount = 0;
        for amount in accounts.values() {
            total = total.checked_add(*amount).ok_or(LedgerError::Overflow)?;
        }
        let accounts = accounts.into_iter().filter(|(_, v)| *v > 0).collect();
        Ok(Self { accounts, total })
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Amount> {
        &self.accounts
    }

    /// Adds freshly issued value to `account`.
    pub fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let new_balance = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let new_total = self
            .total
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.set(account, new_balance);
        self.total = new_total;
        Ok(())
    }

    /// Moves `amount` between two holders; the total is untouched.
    pub fn move_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let from_balance = self.ensure_funds(from, amount)?;
        if from == to {
            return Ok(());
        }
        let to_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.set(from, from_balance - amount);
        self.set(to, to_balance);
        Ok(())
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        compute_merkle_root(&self.accounts)
    }

    fn ensure_funds(&self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *account,
                balance,
                needed: amount,
            });
        }
        Ok(balance)
    }

    fn set(&mut self, account: &Address, amount: Amount) {
        if amount == 0 {
            self.accounts.remove(account);
        } else {
            self.accounts.insert(*account, amount);
        }
    }
}

fn compute_merkle_root(accounts: &BTreeMap<Address, Amount>) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = accounts
        .iter()
        .map(|(account, balance)| {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_bytes());
            hasher.update(balance.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"piastre-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Amounts travel as decimal strings; JSON numbers cannot hold the full u128 range.
pub(crate) mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

pub(crate) mod serde_balances {
    use std::collections::BTreeMap;

    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    use super::Amount;
    use crate::identity::Address;

    pub fn serialize<S>(value: &BTreeMap<Address, Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<String, String> = value
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Address, Amount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                let account = k.parse::<Address>().map_err(D::Error::custom)?;
                let amount = v.parse::<Amount>().map_err(D::Error::custom)?;
                Ok((account, amount))
            })
            .collect()
    }
}
