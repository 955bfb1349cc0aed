//! The PiastreACT token: owner-gated, capped minting over a conserved-value
//! balance ledger.
//!
//! [`PiastreToken`] embeds an [`OwnerGuard`] for access control and a
//! [`Balances`] table for value accounting. Every mutating call takes the
//! caller explicitly and either applies in full or leaves the token untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    access::{AccessError, Ownable, OwnerGuard},
    config::TokenConfig,
    identity::Address,
    ledger::{serde_amount, serde_balances, Amount, Balances, LedgerError, LedgerEvent},
};

pub const DECIMALS: u8 = 18;
/// One whole token in base units.
pub const UNIT: Amount = 1_000_000_000_000_000_000;
pub const MAX_SUPPLY: Amount = 1_000 * UNIT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Ownable: caller is not the owner")]
    Unauthorized { caller: Address },
    #[error("Ownable: new owner is the zero address")]
    InvalidOwner,
    #[error("Exceeds max supply")]
    SupplyCapExceeded {
        requested: Amount,
        total_supply: Amount,
        max_supply: Amount,
    },
    #[error("ERC20: invalid receiver {receiver}")]
    InvalidReceiver { receiver: Address },
    #[error("transfer amount exceeds balance")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        needed: Amount,
    },
    #[error("arithmetic overflow")]
    Overflow,
}

impl From<AccessError> for TokenError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthorized { caller } => TokenError::Unauthorized { caller },
            AccessError::InvalidOwner => TokenError::InvalidOwner,
        }
    }
}

impl From<LedgerError> for TokenError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                account,
                balance,
                needed,
            } => TokenError::InsufficientBalance {
                account,
                balance,
                needed,
            },
            LedgerError::Overflow => TokenError::Overflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot max supply {found} differs from {expected}")]
    MaxSupplyMismatch { expected: Amount, found: Amount },
    #[error("snapshot total supply {recorded} differs from balance sum {computed}")]
    TotalSupplyMismatch { recorded: Amount, computed: Amount },
    #[error("snapshot total supply {total_supply} exceeds max supply {max_supply}")]
    SupplyAboveCap {
        total_supply: Amount,
        max_supply: Amount,
    },
    #[error("snapshot merkle root does not match balances")]
    MerkleRootMismatch,
    #[error("snapshot balances overflow")]
    Overflow,
    #[error("snapshot metadata invalid: {0}")]
    InvalidMetadata(String),
    #[error("snapshot event {index} cannot be replayed")]
    EventReplay { index: usize },
    #[error("snapshot events do not reproduce the recorded balances")]
    EventLogMismatch,
    #[error("snapshot owner {recorded} differs from owner {replayed} in the event log")]
    OwnerMismatch { recorded: Address, replayed: Address },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub owner: Address,
    pub metadata: TokenConfig,
    #[serde(with = "serde_amount")]
    pub max_supply: Amount,
    #[serde(with = "serde_amount")]
    pub total_supply: Amount,
    #[serde(with = "serde_balances")]
    pub balances: BTreeMap<Address, Amount>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "serde_root")]
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiastreToken {
    guard: OwnerGuard,
    balances: Balances,
    max_supply: Amount,
    metadata: TokenConfig,
    events: Vec<LedgerEvent>,
}

impl PiastreToken {
    /// Deploys a token owned by `initial_owner`, which must not be the zero address.
    pub fn new(initial_owner: Address) -> Result<Self, TokenError> {
        Self::with_metadata(initial_owner, TokenConfig::default())
    }

    pub fn with_metadata(
        initial_owner: Address,
        metadata: TokenConfig,
    ) -> Result<Self, TokenError> {
        if initial_owner.is_zero() {
            return Err(TokenError::InvalidOwner);
        }
        Ok(Self {
            guard: OwnerGuard::new(initial_owner),
            balances: Balances::new(),
            max_supply: MAX_SUPPLY,
            metadata,
            events: Vec::new(),
        })
    }

    /// Issues `amount` new units to `to`. Owner only, bounded by the cap.
    pub fn mint(
        &mut self,
        to: Address,
        amount: Amount,
        caller: &Address,
    ) -> Result<(), TokenError> {
        if let Err(err) = self.guard.only_owner(caller) {
            warn!(%caller, "mint rejected: caller is not the owner");
            return Err(err.into());
        }
        if to.is_zero() {
            warn!("mint rejected: zero receiver");
            return Err(TokenError::InvalidReceiver { receiver: to });
        }
        let total_supply = self.balances.total();
        let within_cap = total_supply
            .checked_add(amount)
            .is_some_and(|next| next <= self.max_supply);
        if !within_cap {
            warn!(%to, amount, total_supply, "mint rejected: exceeds max supply");
            return Err(TokenError::SupplyCapExceeded {
                requested: amount,
                total_supply,
                max_supply: self.max_supply,
            });
        }
        self.balances.credit(&to, amount)?;
        self.events.push(LedgerEvent::Transfer {
            from: Address::ZERO,
            to,
            amount,
        });
        debug!(%to, amount, total_supply = self.balances.total(), "minted");
        Ok(())
    }

    /// Moves `amount` from `caller` to `to`. Total supply is unchanged.
    pub fn transfer(
        &mut self,
        to: Address,
        amount: Amount,
        caller: &Address,
    ) -> Result<(), TokenError> {
        if to.is_zero() {
            warn!(from = %caller, "transfer rejected: zero receiver");
            return Err(TokenError::InvalidReceiver { receiver: to });
        }
        if let Err(err) = self.balances.move_balance(caller, &to, amount) {
            warn!(from = %caller, %to, amount, "transfer rejected: {err}");
            return Err(err.into());
        }
        self.events.push(LedgerEvent::Transfer {
            from: *caller,
            to,
            amount,
        });
        debug!(from = %caller, %to, amount, "transferred");
        Ok(())
    }

    pub fn transfer_ownership(
        &mut self,
        new_owner: Address,
        caller: &Address,
    ) -> Result<(), TokenError> {
        let previous = self.guard.transfer_ownership(new_owner, caller)?;
        self.events.push(LedgerEvent::OwnershipTransferred {
            previous,
            new: new_owner,
        });
        debug!(%previous, new = %new_owner, "ownership transferred");
        Ok(())
    }

    /// Drops the owner for good, which closes minting permanently.
    pub fn renounce_ownership(&mut self, caller: &Address) -> Result<(), TokenError> {
        let previous = self.guard.renounce_ownership(caller)?;
        self.events.push(LedgerEvent::OwnershipTransferred {
            previous,
            new: Address::ZERO,
        });
        debug!(%previous, "ownership renounced");
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.balance_of(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.balances.total()
    }

    pub fn max_supply(&self) -> Amount {
        self.max_supply
    }

    pub fn decimals(&self) -> u8 {
        DECIMALS
    }

    pub fn metadata(&self) -> &TokenConfig {
        &self.metadata
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn holders(&self) -> &BTreeMap<Address, Amount> {
        self.balances.accounts()
    }

    pub fn check_invariants(&self) -> Result<(), SnapshotError> {
        let mut computed: Amount = 0;
        for amount in self.balances.accounts().values() {
            computed = computed.checked_add(*amount).ok_or(SnapshotError::Overflow)?;
        }
        if computed != self.balances.total() {
            return Err(SnapshotError::TotalSupplyMismatch {
                recorded: self.balances.total(),
                computed,
            });
        }
        if self.max_supply != MAX_SUPPLY {
            return Err(SnapshotError::MaxSupplyMismatch {
                expected: MAX_SUPPLY,
                found: self.max_supply,
            });
        }
        if computed > self.max_supply {
            return Err(SnapshotError::SupplyAboveCap {
                total_supply: computed,
                max_supply: self.max_supply,
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            owner: self.owner(),
            metadata: self.metadata.clone(),
            max_supply: self.max_supply,
            total_supply: self.balances.total(),
            balances: self.balances.accounts().clone(),
            events: self.events.clone(),
            merkle_root: self.balances.merkle_root(),
        }
    }

    /// Restores a token, refusing any snapshot that breaks a supply invariant.
    pub fn from_snapshot(snapshot: TokenSnapshot) -> Result<Self, SnapshotError> {
        let balances =
            Balances::from_accounts(snapshot.balances).map_err(|_| SnapshotError::Overflow)?;
        if balances.total() != snapshot.total_supply {
            return Err(SnapshotError::TotalSupplyMismatch {
                recorded: snapshot.total_supply,
                computed: balances.total(),
            });
        }
        if balances.merkle_root() != snapshot.merkle_root {
            return Err(SnapshotError::MerkleRootMismatch);
        }
        snapshot
            .metadata
            .validate()
            .map_err(|err| SnapshotError::InvalidMetadata(err.to_string()))?;
        let (replayed, replayed_owner) = replay_events(&snapshot.events)?;
        if replayed.accounts() != balances.accounts() {
            return Err(SnapshotError::EventLogMismatch);
        }
        if let Some(replayed) = replayed_owner.filter(|o| *o != snapshot.owner) {
            return Err(SnapshotError::OwnerMismatch {
                recorded: snapshot.owner,
                replayed,
            });
        }
        let token = Self {
            guard: OwnerGuard::new(snapshot.owner),
            balances,
            max_supply: snapshot.max_supply,
            metadata: snapshot.metadata,
            events: snapshot.events,
        };
        token.check_invariants()?;
        Ok(token)
    }
}

/// Rebuilds balances from the event log; also returns the last owner it names.
fn replay_events(events: &[LedgerEvent]) -> Result<(Balances, Option<Address>), SnapshotError> {
    let mut balances = Balances::new();
    let mut owner: Option<Address> = None;
    for (index, event) in events.iter().enumerate() {
        let replayed = match event {
            LedgerEvent::Transfer { from, to, amount } if from.is_zero() => {
                balances.credit(to, *amount)
            }
            LedgerEvent::Transfer { from, to, amount } => balances.move_balance(from, to, *amount),
            LedgerEvent::OwnershipTransferred { previous, new } => {
                if owner.is_some_and(|current| current != *previous) {
                    return Err(SnapshotError::EventReplay { index });
                }
                owner = Some(*new);
                Ok(())
            }
        };
        replayed.map_err(|_| SnapshotError::EventReplay { index })?;
    }
    Ok((balances, owner))
}

impl Ownable for PiastreToken {
    fn owner(&self) -> Address {
        self.guard.owner()
    }
}

pub(crate) mod serde_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("merkle root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    const OWNER: u8 = 1;

    fn token() -> PiastreToken {
        PiastreToken::new(addr(OWNER)).unwrap()
    }

    #[test]
    fn starts_empty_with_fixed_cap() {
        let token = token();
        assert_eq!(token.total_supply(), 0);
        assert_eq!(token.max_supply(), 1_000 * 10u128.pow(18));
        assert_eq!(token.decimals(), 18);
        assert_eq!(token.owner(), addr(OWNER));
        assert_eq!(token.balance_of(&addr(9)), 0);
    }

    #[test]
    fn owner_mint_credits_holder_and_supply() {
        let mut token = token();
        token.mint(addr(2), 123 * UNIT, &addr(OWNER)).unwrap();
        assert_eq!(token.balance_of(&addr(2)), 123 * UNIT);
        assert_eq!(token.total_supply(), 123 * UNIT);
        assert_eq!(
            token.events(),
            &[LedgerEvent::Transfer {
                from: Address::ZERO,
                to: addr(2),
                amount: 123 * UNIT
            }]
        );
    }

    #[test]
    fn non_owner_mint_is_unauthorized_and_has_no_effect() {
        let mut token = token();
        let err = token.mint(addr(3), 1, &addr(3)).unwrap_err();
        assert_eq!(err, TokenError::Unauthorized { caller: addr(3) });
        assert!(err.to_string().contains("Ownable"));
        assert_eq!(token.balance_of(&addr(3)), 0);
        assert_eq!(token.total_supply(), 0);
        assert!(token.events().is_empty());
    }

    #[test]
    fn mint_up_to_cap_then_reject() {
        let mut token = token();
        token.mint(addr(OWNER), MAX_SUPPLY, &addr(OWNER)).unwrap();
        let err = token.mint(addr(OWNER), 1, &addr(OWNER)).unwrap_err();
        assert_eq!(err.to_string(), "Exceeds max supply");
        assert!(matches!(err, TokenError::SupplyCapExceeded { requested: 1, .. }));
        assert_eq!(token.total_supply(), MAX_SUPPLY);
    }

    #[test]
    fn mint_amount_that_would_overflow_hits_the_cap_check() {
        let mut token = token();
        token.mint(addr(2), 1, &addr(OWNER)).unwrap();
        let err = token.mint(addr(2), Amount::MAX, &addr(OWNER)).unwrap_err();
        assert!(matches!(err, TokenError::SupplyCapExceeded { .. }));
        assert_eq!(token.total_supply(), 1);
    }

    #[test]
    fn transfer_conserves_supply() {
        let mut token = token();
        token.mint(addr(2), 100 * UNIT, &addr(OWNER)).unwrap();
        token.transfer(addr(3), 40 * UNIT, &addr(2)).unwrap();
        assert_eq!(token.balance_of(&addr(3)), 40 * UNIT);
        assert_eq!(token.balance_of(&addr(2)), 60 * UNIT);
        assert_eq!(token.total_supply(), 100 * UNIT);
    }

    #[test]
    fn transfer_beyond_balance_fails_cleanly() {
        let mut token = token();
        token.mint(addr(2), 10, &addr(OWNER)).unwrap();
        let before = token.clone();
        let err = token.transfer(addr(3), 11, &addr(2)).unwrap_err();
        assert_eq!(
            err,
            TokenError::InsufficientBalance {
                account: addr(2),
                balance: 10,
                needed: 11
            }
        );
        assert_eq!(token, before);
    }

    #[test]
    fn self_transfer_is_a_noop() {
        let mut token = token();
        token.mint(addr(2), 10, &addr(OWNER)).unwrap();
        token.transfer(addr(2), 10, &addr(2)).unwrap();
        assert_eq!(token.balance_of(&addr(2)), 10);
        assert_eq!(token.total_supply(), 10);
    }

    #[test]
    fn new_owner_can_mint_and_old_owner_cannot() {
        let mut token = token();
        token.transfer_ownership(addr(5), &addr(OWNER)).unwrap();
        assert!(token.mint(addr(5), 1, &addr(OWNER)).is_err());
        token.mint(addr(5), 1, &addr(5)).unwrap();
        assert_eq!(
            token.events()[0],
            LedgerEvent::OwnershipTransferred {
                previous: addr(OWNER),
                new: addr(5)
            }
        );
        assert_eq!(
            token.transfer_ownership(Address::ZERO, &addr(5)),
            Err(TokenError::InvalidOwner)
        );
    }

    #[test]
    fn renounce_closes_minting() {
        let mut token = token();
        token.renounce_ownership(&addr(OWNER)).unwrap();
        assert!(token.owner().is_zero());
        assert!(matches!(
            token.mint(addr(2), 1, &addr(OWNER)),
            Err(TokenError::Unauthorized { .. })
        ));
        assert!(token.mint(addr(2), 1, &Address::ZERO).is_err());
    }

    #[test]
    fn snapshot_restores_identical_token() {
        let mut token = token();
        token.mint(addr(2), 100 * UNIT, &addr(OWNER)).unwrap();
        token.transfer(addr(3), 25 * UNIT, &addr(2)).unwrap();
        let json = serde_json::to_string(&token.snapshot()).unwrap();
        let restored = PiastreToken::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored, token);
    }

    #[test]
    fn tampered_snapshots_are_refused() {
        let mut token = token();
        token.mint(addr(2), 100, &addr(OWNER)).unwrap();

        let mut inflated = token.snapshot();
        inflated.balances.insert(addr(2), 1_000);
        assert!(matches!(
            PiastreToken::from_snapshot(inflated),
            Err(SnapshotError::TotalSupplyMismatch { .. })
        ));

        let mut rerooted = token.snapshot();
        rerooted.merkle_root = [0u8; 32];
        assert_eq!(
            PiastreToken::from_snapshot(rerooted),
            Err(SnapshotError::MerkleRootMismatch)
        );

        let mut recapped = token.snapshot();
        recapped.max_supply = MAX_SUPPLY * 2;
        assert!(matches!(
            PiastreToken::from_snapshot(recapped),
            Err(SnapshotError::MaxSupplyMismatch { .. })
        ));
    }

    #[test]
    fn custom_metadata_is_kept() {
        let metadata = TokenConfig {
            name: "Other".into(),
            symbol: "OTH".into(),
        };
        let token = PiastreToken::with_metadata(addr(OWNER), metadata.clone()).unwrap();
        assert_eq!(token.metadata(), &metadata);
        assert_eq!(token.snapshot().metadata, metadata);
    }

    #[test]
    fn zero_owner_cannot_deploy() {
        assert_eq!(
            PiastreToken::new(Address::ZERO),
            Err(TokenError::InvalidOwner)
        );
        let metadata = TokenConfig::default();
        assert!(PiastreToken::with_metadata(Address::ZERO, metadata).is_err());
    }

    #[test]
    fn zero_receiver_is_rejected() {
        let mut token = token();
        assert_eq!(
            token.mint(Address::ZERO, 1, &addr(OWNER)),
            Err(TokenError::InvalidReceiver {
                receiver: Address::ZERO
            })
        );
        token.mint(addr(2), 10, &addr(OWNER)).unwrap();
        let before = token.clone();
        assert!(matches!(
            token.transfer(Address::ZERO, 5, &addr(2)),
            Err(TokenError::InvalidReceiver { .. })
        ));
        assert_eq!(token, before);
    }

    #[test]
    fn renounced_token_still_restores() {
        let mut token = token();
        token.mint(addr(2), 10, &addr(OWNER)).unwrap();
        token.renounce_ownership(&addr(OWNER)).unwrap();
        let restored = PiastreToken::from_snapshot(token.snapshot()).unwrap();
        assert!(restored.owner().is_zero());
        assert_eq!(restored, token);
    }

    #[test]
    fn snapshot_with_blank_metadata_is_refused() {
        let mut snapshot = token().snapshot();
        snapshot.metadata.symbol = "  ".into();
        assert!(matches!(
            PiastreToken::from_snapshot(snapshot),
            Err(SnapshotError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn snapshot_events_must_reproduce_balances_and_owner() {
        let mut token = token();
        token.mint(addr(2), 100, &addr(OWNER)).unwrap();
        token.transfer(addr(3), 40, &addr(2)).unwrap();

        let mut forged = token.snapshot();
        forged.events[1] = LedgerEvent::Transfer {
            from: addr(2),
            to: addr(4),
            amount: 40,
        };
        assert_eq!(
            PiastreToken::from_snapshot(forged),
            Err(SnapshotError::EventLogMismatch)
        );

        let mut overdrawn = token.snapshot();
        overdrawn.events.insert(
            0,
            LedgerEvent::Transfer {
                from: addr(3),
                to: addr(2),
                amount: 1,
            },
        );
        assert_eq!(
            PiastreToken::from_snapshot(overdrawn),
            Err(SnapshotError::EventReplay { index: 0 })
        );

        token.transfer_ownership(addr(5), &addr(OWNER)).unwrap();
        let mut reowned = token.snapshot();
        reowned.owner = addr(6);
        assert_eq!(
            PiastreToken::from_snapshot(reowned),
            Err(SnapshotError::OwnerMismatch {
                recorded: addr(6),
                replayed: addr(5)
            })
        );
    }
}
