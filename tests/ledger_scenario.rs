//! End-to-end tests for admission, mining, validation and persistence

use pow_ledger::blockchain::{
    Blockchain, ChainViolation, LedgerState, LedgerStore, Rejection, Transaction, Wallet,
};
use pow_ledger::config::LedgerConfig;
use tempfile::TempDir;

fn signed(from: &Wallet, to: &Wallet, amount: f64) -> Transaction {
    let mut tx = Transaction::new(from.identity().clone(), to.identity().clone(), amount);
    from.sign_transaction(&mut tx).unwrap();
    tx
}

#[test]
fn test_reward_then_transfer_scenario() -> Result<(), Box<dyn std::error::Error>> {
    let mut ledger = Blockchain::new(2, 50.0);
    ledger.create_genesis()?;

    assert_eq!(ledger.chain().len(), 1);
    assert_eq!(ledger.chain()[0].index, 0);
    assert_eq!(ledger.chain()[0].previous_hash, "0");
    assert!(ledger.chain()[0].hash.starts_with("00"));

    let alice = Wallet::new()?;
    let bob = Wallet::new()?;
    assert_eq!(alice.get_balance(&ledger), 0.0);

    let rejected = ledger.add_transaction(signed(&alice, &bob, 10.0));
    assert!(matches!(rejected, Err(Rejection::InsufficientBalance { .. })));

    ledger.mine_pending(alice.identity())?;
    assert_eq!(alice.get_balance(&ledger), 50.0);

    ledger.add_transaction(signed(&alice, &bob, 10.0))?;
    let block = ledger.mine_pending(alice.identity())?;

    assert_eq!(block.transactions.len(), 2);
    assert_eq!(block.transactions[0].amount, 10.0);
    assert!(block.transactions[1].is_reward());
    assert_eq!(block.transactions[1].amount, 50.0);

    assert_eq!(alice.get_balance(&ledger), 90.0);
    assert_eq!(bob.get_balance(&ledger), 10.0);
    assert!(ledger.is_chain_valid());

    Ok(())
}

#[test]
fn test_every_mined_block_meets_difficulty() -> Result<(), Box<dyn std::error::Error>> {
    let mut ledger = Blockchain::new(2, 25.0);
    ledger.create_genesis()?;
    let miner = Wallet::new()?;

    for _ in 0..3 {
        ledger.mine_pending(miner.identity())?;
    }

    for (position, block) in ledger.chain().iter().enumerate() {
        assert_eq!(block.index, position as u64);
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
    }
    for pair in ledger.chain().windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }

    Ok(())
}

#[test]
fn test_tampering_through_state_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let mut ledger = Blockchain::new(2, 50.0);
    ledger.create_genesis()?;
    let alice = Wallet::new()?;
    let bob = Wallet::new()?;
    ledger.mine_pending(alice.identity())?;
    ledger.add_transaction(signed(&alice, &bob, 30.0))?;
    ledger.mine_pending(alice.identity())?;

    let mut state = ledger.serialize();
    state.chain[2].transactions[0].amount = 1_000.0;
    let tampered = Blockchain::deserialize(state);

    assert!(!tampered.is_chain_valid());
    assert_eq!(tampered.validate_chain(), Err(ChainViolation::HashMismatch(2)));
    // The forged amount also breaks the sender's signature
    assert!(!tampered.chain()[2].transactions[0].verify());

    Ok(())
}

#[test]
fn test_state_json_uses_documented_field_names() -> Result<(), Box<dyn std::error::Error>> {
    let mut ledger = Blockchain::new(1, 50.0);
    ledger.create_genesis()?;
    let alice = Wallet::new()?;
    let bob = Wallet::new()?;
    ledger.mine_pending(alice.identity())?;
    ledger.add_transaction(signed(&alice, &bob, 1.5))?;

    let value = serde_json::to_value(ledger.serialize())?;

    assert_eq!(value["difficulty"], 1);
    assert_eq!(value["block_reward"], 50.0);
    assert_eq!(value["chain"][1]["transactions"][0]["sender"], "Network");
    assert_eq!(value["chain"][1]["previous_hash"], value["chain"][0]["hash"]);
    assert_eq!(value["mempool"][0]["sender"], alice.identity().as_str());
    assert_eq!(value["mempool"][0]["recipient"], bob.identity().as_str());

    let signature = value["mempool"][0]["signature"].as_str().unwrap_or_default();
    assert_eq!(signature.len(), 128);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    let restored: LedgerState = serde_json::from_value(value)?;
    assert_eq!(restored, ledger.serialize());

    Ok(())
}

#[test]
fn test_persisted_ledger_keeps_working() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = LedgerStore::new(dir.path().join("ledger.json"));
    let config = LedgerConfig {
        difficulty: 1,
        block_reward: 50.0,
        ..LedgerConfig::default()
    };
    let alice = Wallet::new()?;
    let bob = Wallet::new()?;

    let mut ledger = store.load_or_bootstrap(&config)?;
    ledger.mine_pending(alice.identity())?;
    ledger.add_transaction(signed(&alice, &bob, 20.0))?;
    store.save(&ledger)?;

    let mut reloaded = store.load_or_bootstrap(&config)?;
    assert_eq!(reloaded.mempool().len(), 1);
    assert!(reloaded.is_chain_valid());

    reloaded.mine_pending(bob.identity())?;
    assert_eq!(alice.get_balance(&reloaded), 30.0);
    assert_eq!(bob.get_balance(&reloaded), 70.0);
    assert!(reloaded.is_chain_valid());

    Ok(())
}
