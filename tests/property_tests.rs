//! Property-based and scenario tests for the PoT ledger and consensus
//!
//! These tests drive the ledger through random block sequences and check
//! that its invariants survive, then exercise the service the way a running
//! node does.

use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use pot_core::config::NodeConfig;
use pot_core::consensus::{retarget_base_target, verify_hit, AncestorInfo};
use pot_core::constants::GENESIS_BASE_TARGET;
use pot_core::crypto::{hash_bytes, Address, PrivateKey};
use pot_core::ledger::AddressLedger;
use pot_core::node::LedgerService;
use pot_core::storage::{Coin, MemoryStore, SledStore, UtxoSet};
use pot_core::validation::{OutPoint, Transaction, TxInput, TxOutput};

const POOL: [&str; 7] = ["root0", "root1", "a", "b", "c", "d", "e"];

fn pool() -> Vec<Address> {
    POOL.iter().map(|name| Address::from(*name)).collect()
}

/// One single-transaction block: `payer` spends a fresh coin to `recipient`;
/// a zero-value output is an entrust, anything else is activity
#[derive(Debug, Clone)]
struct Step {
    payer: usize,
    recipient: usize,
    entrust: bool,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (0..POOL.len(), 0..POOL.len(), any::<bool>()).prop_map(|(payer, recipient, entrust)| Step {
        payer,
        recipient,
        entrust,
    })
}

/// Funding coin for the block at `height`, kept in the view for undo
fn step_transaction(coins: &mut UtxoSet, step: &Step, height: u64) -> Transaction {
    let pool = pool();
    let outpoint = OutPoint {
        tx_hash: hash_bytes(format!("funding-{height}").as_bytes()),
        index: 0,
    };
    coins.add(
        outpoint,
        Coin {
            amount: 10,
            address: pool[step.payer].clone(),
            height: height - 1,
        },
    );
    let value = if step.entrust { 0 } else { 1 };
    Transaction::new(
        vec![TxInput::spend(outpoint.tx_hash, 0)],
        vec![TxOutput::new(value, pool[step.recipient].clone())],
    )
}

fn seeded_ledger() -> AddressLedger {
    let mut ledger = AddressLedger::open(Arc::new(MemoryStore::new()), 64).unwrap();
    let pool = pool();
    ledger.seed_genesis(&pool[..2]).unwrap();
    ledger
}

/// Apply and commit one block per step; returns the transactions by height
fn run_steps(ledger: &mut AddressLedger, coins: &mut UtxoSet, steps: &[Step]) -> Vec<Transaction> {
    let mut applied = Vec::new();
    for (offset, step) in steps.iter().enumerate() {
        let height = offset as u64 + 1;
        let tx = step_transaction(coins, step, height);
        ledger.apply_transaction(&tx, coins, height).unwrap();
        ledger.commit(height, false).unwrap();
        applied.push(tx);
    }
    applied
}

fn total_root_power(ledger: &AddressLedger, height: u64) -> u64 {
    pool()
        .iter()
        .map(|address| ledger.get_harvest_power(address, height).unwrap())
        .sum()
}

/// One transaction inside a multi-transaction block
#[derive(Debug, Clone)]
enum BlockItem {
    Transfer(Step),
    /// `recipient` indexes the pool, with `POOL.len()` standing for the
    /// claimant
    Coinbase { recipient: usize, reward: u64 },
    /// Claims this percentage of the claimant's current reward
    Claim { percent: u64 },
}

fn block_item_strategy() -> impl Strategy<Value = BlockItem> {
    prop_oneof![
        3 => step_strategy().prop_map(BlockItem::Transfer),
        2 => (0..=POOL.len(), 1u64..1_000_000)
            .prop_map(|(recipient, reward)| BlockItem::Coinbase { recipient, reward }),
        1 => (0u64..=100).prop_map(|percent| BlockItem::Claim { percent }),
    ]
}

/// Root whose key is known, so its reward can be claimed
fn claimant_key() -> PrivateKey {
    PrivateKey::from_bytes(&[7u8; 32]).unwrap()
}

fn claimant() -> Address {
    Address::from_public_key(&claimant_key().public_key()).unwrap()
}

/// Pool plus the claimant
fn tracked() -> Vec<Address> {
    let mut addresses = pool();
    addresses.push(claimant());
    addresses
}

fn block_transaction(
    ledger: &AddressLedger,
    coins: &mut UtxoSet,
    item: &BlockItem,
    height: u64,
    slot: usize,
) -> Transaction {
    match item {
        BlockItem::Transfer(step) => {
            let pool = pool();
            let outpoint = OutPoint {
                tx_hash: hash_bytes(format!("funding-{height}-{slot}").as_bytes()),
                index: 0,
            };
            coins.add(
                outpoint,
                Coin {
                    amount: 10,
                    address: pool[step.payer].clone(),
                    height: height - 1,
                },
            );
            let value = if step.entrust { 0 } else { 1 };
            Transaction::new(
                vec![TxInput::spend(outpoint.tx_hash, 0)],
                vec![TxOutput::new(value, pool[step.recipient].clone())],
            )
        }
        BlockItem::Coinbase { recipient, reward } => {
            Transaction::coinbase(*reward, tracked()[*recipient].clone(), height as u32)
        }
        BlockItem::Claim { percent } => {
            let reward = ledger.member_entry(&claimant()).map_or(0, |entry| entry.reward);
            Transaction::new(
                vec![TxInput::claim(claimant_key().public_key(), reward * percent / 100)],
                vec![],
            )
        }
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every credit adds exactly one unit of weight somewhere; entrusts
    /// only move weight between roots
    #[test]
    fn prop_harvest_power_is_conserved(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut ledger = seeded_ledger();
        let mut coins = UtxoSet::new();
        run_steps(&mut ledger, &mut coins, &steps);

        let credits = steps.iter().filter(|step| !step.entrust).count() as u64;
        let height = steps.len() as u64;
        prop_assert_eq!(total_root_power(&ledger, height), 2 + credits);

        // Each committed height on its own
        let mut credited = 0;
        for (offset, step) in steps.iter().enumerate() {
            if !step.entrust {
                credited += 1;
            }
            prop_assert_eq!(total_root_power(&ledger, offset as u64 + 1), 2 + credited);
        }
    }

    /// A seen address is either a root or delegated, never a mix
    #[test]
    fn prop_root_exclusivity(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut ledger = seeded_ledger();
        let mut coins = UtxoSet::new();
        run_steps(&mut ledger, &mut coins, &steps);

        let height = steps.len() as u64;
        for address in pool() {
            let record = ledger.get_record(&address, height).unwrap();
            if record.is_blank() {
                prop_assert!(ledger.member_entry(&address).is_none());
                continue;
            }
            prop_assert!(record.is_root() != record.is_delegated(), "{} is {:?}", address, record);
            if record.is_delegated() {
                prop_assert_eq!(record.total_harvest_power, 0);
            }
            prop_assert!(ledger.member_entry(&address).is_some());
        }
    }

    /// A coinbase distributes exactly its amount over the club
    #[test]
    fn prop_reward_is_conserved(
        steps in prop::collection::vec(step_strategy(), 1..16),
        reward in 1u64..=21_000_000 * 100_000_000
    ) {
        let mut ledger = seeded_ledger();
        let mut coins = UtxoSet::new();
        run_steps(&mut ledger, &mut coins, &steps);

        let height = steps.len() as u64 + 1;
        let coinbase = Transaction::coinbase(reward, "root0", height as u32);
        let distribution = ledger.apply_transaction(&coinbase, &coins, height).unwrap();
        ledger.commit(height, false).unwrap();

        prop_assert!(distribution.is_some());
        let paid: u128 = pool()
            .iter()
            .filter_map(|address| ledger.member_entry(address))
            .map(|entry| entry.reward as u128)
            .sum();
        prop_assert_eq!(paid, reward as u128);
    }

    /// Undoing every block restores the genesis state exactly
    #[test]
    fn prop_undo_round_trip(steps in prop::collection::vec(step_strategy(), 1..20)) {
        let mut ledger = seeded_ledger();
        let pool = pool();
        let genesis: Vec<_> = pool
            .iter()
            .map(|address| (ledger.get_record(address, 0).unwrap(), ledger.member_entry(address).cloned()))
            .collect();

        let mut coins = UtxoSet::new();
        let applied = run_steps(&mut ledger, &mut coins, &steps);

        for (offset, tx) in applied.iter().enumerate().rev() {
            let height = offset as u64 + 1;
            ledger.undo_transaction(tx, &coins, height).unwrap();
            ledger.undo_club_members(height).unwrap();
            ledger.commit(height, true).unwrap();
        }

        prop_assert_eq!(ledger.committed_height(), Some(0));
        for (address, (record, entry)) in pool.iter().zip(genesis) {
            let now = ledger.get_record(address, 0).unwrap();
            prop_assert!(now.same_state(&record), "{} differs: {:?} vs {:?}", address, now, record);
            prop_assert_eq!(ledger.member_entry(address).cloned(), entry);
        }
    }

    /// Blocks of several transfers, coinbases and claims unwind one height
    /// at a time, and after each undo every record, every roster entry and
    /// every older version match what was committed at that height
    #[test]
    fn prop_multi_transaction_undo_round_trip(
        blocks in prop::collection::vec(prop::collection::vec(block_item_strategy(), 1..6), 1..10)
    ) {
        let mut ledger = AddressLedger::open(Arc::new(MemoryStore::new()), 64).unwrap();
        let addresses = tracked();
        ledger.seed_genesis(&[addresses[0].clone(), addresses[1].clone(), claimant()]).unwrap();

        let state = |ledger: &AddressLedger, height: u64| -> Vec<_> {
            addresses
                .iter()
                .map(|address| (ledger.get_record(address, height).unwrap(), ledger.member_entry(address).cloned()))
                .collect()
        };

        let mut coins = UtxoSet::new();
        let mut committed = vec![state(&ledger, 0)];
        let mut applied = Vec::new();
        for (offset, block) in blocks.iter().enumerate() {
            let height = offset as u64 + 1;
            let mut transactions = Vec::new();
            for (slot, item) in block.iter().enumerate() {
                let tx = block_transaction(&ledger, &mut coins, item, height, slot);
                ledger.apply_transaction(&tx, &coins, height).unwrap();
                transactions.push(tx);
            }
            ledger.commit(height, false).unwrap();
            committed.push(state(&ledger, height));
            applied.push(transactions);
        }

        for (offset, transactions) in applied.iter().enumerate().rev() {
            let height = offset as u64 + 1;
            for tx in transactions.iter().rev() {
                ledger.undo_transaction(tx, &coins, height).unwrap();
            }
            ledger.undo_club_members(height).unwrap();
            ledger.commit(height, true).unwrap();

            let below = height - 1;
            prop_assert_eq!(ledger.committed_height(), Some(below));
            for (index, address) in addresses.iter().enumerate() {
                let (record, entry) = &committed[below as usize][index];
                let now = ledger.get_record(address, below).unwrap();
                prop_assert!(now.same_state(record), "{} at {} differs: {:?} vs {:?}", address, below, now, record);
                prop_assert_eq!(&ledger.member_entry(address).cloned(), entry);
                for earlier in 0..below {
                    let (old, _) = &committed[earlier as usize][index];
                    let now = ledger.get_record(address, earlier).unwrap();
                    prop_assert!(now.same_state(old), "{} at {} differs: {:?} vs {:?}", address, earlier, now, old);
                }
            }
        }
    }

    /// More power or more elapsed time never turns a win into a loss
    #[test]
    fn prop_threshold_monotonic(
        hit in any::<u64>(),
        base_target in 1u64..=u64::MAX / 2,
        elapsed in 1u64..100_000,
        power in 1u64..1_000_000
    ) {
        if verify_hit(hit, base_target, elapsed, power) {
            prop_assert!(verify_hit(hit, base_target, elapsed, power + 1));
            prop_assert!(verify_hit(hit, base_target, elapsed + 1, power));
        }
        if !verify_hit(hit, base_target, elapsed, power) {
            prop_assert!(!verify_hit(hit, base_target, elapsed, power - 1));
        }
    }

    /// One retarget moves the base target by at most 67/60 up and
    /// 7 * 0.64 / 60 down
    #[test]
    fn prop_retarget_envelope(
        previous in 1_000u64..=u64::MAX / 2,
        spacings in prop::collection::vec(0u64..600, 3),
        height in 3u64..1_000_000
    ) {
        let mut timestamp = 1_000_000_000u64;
        let mut ancestors = Vec::new();
        for (back, spacing) in spacings.iter().enumerate() {
            ancestors.push(AncestorInfo { height: height - back as u64, timestamp, base_target: previous });
            timestamp -= spacing;
        }
        ancestors.push(AncestorInfo { height: height - 3, timestamp, base_target: previous });

        let next = retarget_base_target(&ancestors, GENESIS_BASE_TARGET, 60) as u128;
        let previous = previous as u128;
        prop_assert!(next <= previous * 67 / 60);
        prop_assert!(next * 6000 >= previous * (6000 - 7 * 64) - 6000);
        prop_assert!(next >= 1);
    }
}

// ============================================================================
// SCENARIO TESTS
// ============================================================================

/// Each block spends a coin of `root0` into a new member
fn member_block(coins: &mut UtxoSet, height: u64) -> Transaction {
    let step = Step {
        payer: 0,
        recipient: 0,
        entrust: false,
    };
    let mut tx = step_transaction(coins, &step, height);
    tx.outputs[0] = TxOutput::new(1, format!("member-{height}"));
    tx
}

#[test]
fn test_historical_reads_during_commits() {
    let service = Arc::new(LedgerService::open(Arc::new(MemoryStore::new()), &NodeConfig::default()).unwrap());
    let root = Address::from("root0");
    service.seed_genesis(&[root.clone()]).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            let done = done.clone();
            let root = root.clone();
            thread::spawn(move || {
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let Some(committed) = service.committed_height() else {
                        continue;
                    };
                    for height in 0..committed {
                        // Root gains one unit per block
                        assert_eq!(service.get_harvest_power_by_address(&root, height).unwrap(), height + 1);
                        reads += 1;
                    }
                }
                reads
            })
        })
        .collect();

    let mut coins = UtxoSet::new();
    for height in 1..=40 {
        let tx = member_block(&mut coins, height);
        service.update_father_and_weight_by_transaction(&tx, &coins, height).unwrap();
        service.commit_ledger(height, false).unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(service.get_harvest_power_by_address(&root, 40).unwrap(), 41);
}

#[test]
fn test_ledger_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = Address::from("root0");
    let mut config = NodeConfig::default();
    config.data_dir = dir.path().to_path_buf();

    {
        let store = Arc::new(SledStore::open(config.ledger_path()).unwrap());
        let service = LedgerService::open(store, &config).unwrap();
        service.seed_genesis(&[root.clone()]).unwrap();
        let mut coins = UtxoSet::new();
        for height in 1..=5 {
            let tx = member_block(&mut coins, height);
            service.update_father_and_weight_by_transaction(&tx, &coins, height).unwrap();
            service.commit_ledger(height, false).unwrap();
        }
    }

    let store = Arc::new(SledStore::open(config.ledger_path()).unwrap());
    let service = LedgerService::open(store, &config).unwrap();
    assert_eq!(service.committed_height(), Some(5));
    for height in 0..=5 {
        assert_eq!(service.get_harvest_power_by_address(&root, height).unwrap(), height + 1);
    }
    assert_eq!(service.member_entry(&Address::from("member-3")).unwrap().weight, 1);
}

#[test]
fn test_failed_commit_keeps_committed_state() {
    let store = Arc::new(MemoryStore::new());
    let service = LedgerService::open(store.clone(), &NodeConfig::default()).unwrap();
    let root = Address::from("root0");
    service.seed_genesis(&[root.clone()]).unwrap();

    let mut coins = UtxoSet::new();
    let tx = member_block(&mut coins, 1);
    service.update_father_and_weight_by_transaction(&tx, &coins, 1).unwrap();
    store.set_fail_writes(true);
    let err = service.commit_ledger(1, false).unwrap_err();
    assert!(err.kind().is_fatal());
    assert_eq!(service.committed_height(), Some(0));
    assert_eq!(service.get_harvest_power_by_address(&root, 0).unwrap(), 1);

    // After a restart the block replays cleanly
    store.set_fail_writes(false);
    let service = LedgerService::open(store, &NodeConfig::default()).unwrap();
    service.update_father_and_weight_by_transaction(&tx, &coins, 1).unwrap();
    service.commit_ledger(1, false).unwrap();
    assert_eq!(service.get_harvest_power_by_address(&root, 1).unwrap(), 2);
}

#[test]
fn test_two_roots_entrust_symmetrically() {
    let mut ledger = seeded_ledger();
    let mut coins = UtxoSet::new();
    // root0 gains two members, root1 one
    let steps = [
        Step { payer: 0, recipient: 2, entrust: false },
        Step { payer: 0, recipient: 3, entrust: false },
        Step { payer: 1, recipient: 4, entrust: false },
    ];
    run_steps(&mut ledger, &mut coins, &steps);
    let pool = pool();
    assert_eq!(ledger.get_harvest_power(&pool[0], 3).unwrap(), 3);
    assert_eq!(ledger.get_harvest_power(&pool[1], 3).unwrap(), 2);

    // root1 entrusts itself (and its member) to root0
    let steps = [Step { payer: 1, recipient: 0, entrust: true }];
    let tx = step_transaction(&mut coins, &steps[0], 4);
    ledger.apply_transaction(&tx, &coins, 4).unwrap();
    ledger.commit(4, false).unwrap();
    assert_eq!(ledger.get_harvest_power(&pool[0], 4).unwrap(), 5);
    assert_eq!(ledger.get_harvest_power(&pool[1], 4).unwrap(), 0);
    assert_eq!(ledger.get_record(&pool[4], 4).unwrap().miner.target(), Some(&pool[0]));

    // Activity below root1 now lands on root0
    let tx = step_transaction(&mut coins, &Step { payer: 0, recipient: 4, entrust: false }, 5);
    ledger.apply_transaction(&tx, &coins, 5).unwrap();
    ledger.commit(5, false).unwrap();
    assert_eq!(ledger.get_harvest_power(&pool[0], 5).unwrap(), 6);
}
