//! PiastreACT: a fungible token with owner-gated, capped minting.
//!
//! The crate is split along the capabilities the token is built from:
//!
//! * [`access`] — single-owner access control behind the [`access::Ownable`] trait.
//! * [`ledger`] — the conserved-value balance table, its events and merkle root.
//! * [`token`] — [`token::PiastreToken`], which composes the two and enforces
//!   the `1000 × 10^18` supply cap.
//! * [`identity`] — Ed25519-backed accounts and their 20-byte addresses.
//! * [`runtime`] — the single-writer host applying signed transactions.
//! * [`units`] and [`config`] — decimal amount strings and token metadata.

pub mod access;
pub mod config;
pub mod identity;
pub mod ledger;
pub mod runtime;
pub mod token;
pub mod units;

pub use access::{AccessError, Ownable, OwnerGuard};
pub use identity::{Account, Address};
pub use ledger::{Amount, LedgerEvent};
pub use runtime::{Call, Executor, Receipt, RuntimeError, SignedTransaction, Transaction};
pub use token::{PiastreToken, TokenError, DECIMALS, MAX_SUPPLY, UNIT};
