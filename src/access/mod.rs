//! Single-owner access control.

use serde::{Deserialize, Serialize};

use crate::identity::Address;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Ownable: caller is not the owner")]
    Unauthorized { caller: Address },
    #[error("Ownable: new owner is the zero address")]
    InvalidOwner,
}

/// Capability of gating calls on a single designated owner.
pub trait Ownable {
    fn owner(&self) -> Address;

    fn only_owner(&self, caller: &Address) -> Result<(), AccessError> {
        if *caller != self.owner() || caller.is_zero() {
            return Err(AccessError::Unauthorized { caller: *caller });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerGuard {
    owner: Address,
}

impl OwnerGuard {
    pub fn new(owner: Address) -> Self {
        Self { owner }
    }

    /// Hands control to `new_owner`, returning the previous owner.
    pub fn transfer_ownership(
        &mut self,
        new_owner: Address,
        caller: &Address,
    ) -> Result<Address, AccessError> {
        self.only_owner(caller)?;
        if new_owner.is_zero() {
            return Err(AccessError::InvalidOwner);
        }
        Ok(std::mem::replace(&mut self.owner, new_owner))
    }

    /// Leaves the guard without an owner; every later `only_owner` check fails.
    pub fn renounce_ownership(&mut self, caller: &Address) -> Result<Address, AccessError> {
        self.only_owner(caller)?;
        Ok(std::mem::replace(&mut self.owner, Address::ZERO))
    }
}

impl Ownable for OwnerGuard {
    fn owner(&self) -> Address {
        self.owner
    }
}
