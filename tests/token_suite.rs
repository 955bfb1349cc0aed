//! End-to-end scenarios: deploy a token, drive it with signed transactions
//! from generated wallets, and check what the ledger reports.

use piastre_act::{
    Account, Call, Executor, Ownable, RuntimeError, TokenError, DECIMALS, MAX_SUPPLY, UNIT,
};
use rand::rngs::OsRng;

fn wallets(n: usize) -> Vec<Account> {
    (0..n).map(|_| Account::generate(&mut OsRng)).collect()
}

fn deploy(owner: &Account) -> Executor {
    Executor::deploy(owner.address()).unwrap()
}

//==================== basic invariants ====================//

#[test]
fn starts_with_zero_total_supply() {
    let [owner] = <[Account; 1]>::try_from(wallets(1)).unwrap();
    let exec = deploy(&owner);
    assert_eq!(exec.token().total_supply(), 0);
    assert_eq!(exec.token().owner(), owner.address());
}

#[test]
fn max_supply_is_constant_and_correct() {
    let [owner] = <[Account; 1]>::try_from(wallets(1)).unwrap();
    let mut exec = deploy(&owner);
    assert_eq!(exec.token().max_supply(), 1_000 * 10u128.pow(18));
    exec.send(
        &owner,
        Call::Mint {
            to: owner.address(),
            amount: 7 * UNIT,
        },
    )
    .unwrap();
    assert_eq!(exec.token().max_supply(), MAX_SUPPLY);
}

//==================== minting ====================//

#[test]
fn owner_can_mint_to_any_address() {
    let [owner, user] = <[Account; 2]>::try_from(wallets(2)).unwrap();
    let mut exec = deploy(&owner);
    let amount = 123 * UNIT;
    exec.send(
        &owner,
        Call::Mint {
            to: user.address(),
            amount,
        },
    )
    .unwrap();
    assert_eq!(exec.token().balance_of(&user.address()), amount);
}

#[test]
fn non_owner_cannot_mint() {
    let [owner, attacker] = <[Account; 2]>::try_from(wallets(2)).unwrap();
    let mut exec = deploy(&owner);
    let err = exec
        .send(
            &attacker,
            Call::Mint {
                to: attacker.address(),
                amount: 1,
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("Ownable"), "{err}");
    assert!(matches!(
        err,
        RuntimeError::Reverted(TokenError::Unauthorized { .. })
    ));
    assert_eq!(exec.token().balance_of(&attacker.address()), 0);
    assert_eq!(exec.token().total_supply(), 0);
}

#[test]
fn cannot_mint_above_max_supply() {
    let [owner] = <[Account; 1]>::try_from(wallets(1)).unwrap();
    let mut exec = deploy(&owner);
    exec.send(
        &owner,
        Call::Mint {
            to: owner.address(),
            amount: MAX_SUPPLY,
        },
    )
    .unwrap();
    let err = exec
        .send(
            &owner,
            Call::Mint {
                to: owner.address(),
                amount: 1,
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("Exceeds max supply"), "{err}");
    assert_eq!(exec.token().total_supply(), MAX_SUPPLY);
}

//==================== transfers ====================//

#[test]
fn transfer_works_correctly() {
    let [owner, alice, bob] = <[Account; 3]>::try_from(wallets(3)).unwrap();
    let mut exec = deploy(&owner);
    exec.send(
        &owner,
        Call::Mint {
            to: alice.address(),
            amount: 100 * UNIT,
        },
    )
    .unwrap();
    exec.send(
        &alice,
        Call::Transfer {
            to: bob.address(),
            amount: 40 * UNIT,
        },
    )
    .unwrap();
    assert_eq!(exec.token().balance_of(&bob.address()), 40 * UNIT);
    assert_eq!(exec.token().balance_of(&alice.address()), 60 * UNIT);
    assert_eq!(exec.token().total_supply(), 100 * UNIT);
}

#[test]
fn transfer_above_balance_is_rejected() {
    let [owner, alice, bob] = <[Account; 3]>::try_from(wallets(3)).unwrap();
    let mut exec = deploy(&owner);
    exec.send(
        &owner,
        Call::Mint {
            to: alice.address(),
            amount: UNIT,
        },
    )
    .unwrap();
    let err = exec
        .send(
            &alice,
            Call::Transfer {
                to: bob.address(),
                amount: UNIT + 1,
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Reverted(TokenError::InsufficientBalance { .. })
    ));
    assert_eq!(exec.token().balance_of(&alice.address()), UNIT);
    assert_eq!(exec.token().balance_of(&bob.address()), 0);
}

//==================== decimals ====================//

#[test]
fn decimals_is_18() {
    let [owner] = <[Account; 1]>::try_from(wallets(1)).unwrap();
    let exec = deploy(&owner);
    assert_eq!(exec.token().decimals(), 18);
    assert_eq!(DECIMALS, 18);
}

//==================== supply ====================//

#[test]
fn total_supply_never_exceeds_max_supply_in_tenths() {
    let [owner] = <[Account; 1]>::try_from(wallets(1)).unwrap();
    let mut exec = deploy(&owner);
    let chunk = MAX_SUPPLY / 10;
    let mut minted = 0u128;
    for _ in 0..10 {
        exec.send(
            &owner,
            Call::Mint {
                to: owner.address(),
                amount: chunk,
            },
        )
        .unwrap();
        minted += chunk;
        assert!(minted <= MAX_SUPPLY);
        assert_eq!(exec.token().total_supply(), minted);
    }
    assert_eq!(minted, MAX_SUPPLY);
    assert_eq!(exec.receipts().len(), 10);
    assert_eq!(exec.next_nonce(&owner.address()), 10);
}
