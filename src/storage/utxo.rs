//! Coin view
//!
//! The weight ledger reads spent coins to pick each transaction's "best
//! father" (the address of its highest-value input). The real coins
//! database lives in the validation pipeline; [`UtxoSet`] is the in-memory
//! view used by tests and the CLI.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::validation::{OutPoint, Transaction};

/// Unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Amount in base units
    pub amount: u64,
    /// Owner of the coin
    pub address: Address,
    /// Height at which this coin was created
    pub height: u64,
}

/// Read access to coins spent by a transaction.
///
/// During undo the view must again contain the coins the transaction spent.
pub trait CoinView {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}

/// Set of all unspent transaction outputs
#[derive(Debug, Default, Clone)]
pub struct UtxoSet {
    coins: HashMap<OutPoint, Coin>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.coins.contains_key(outpoint)
    }

    pub fn add(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    /// Spend the coin inputs of `tx` and add its outputs.
    ///
    /// Returns the spent coins, needed by [`UtxoSet::revert_transaction`].
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u64) -> Vec<(OutPoint, Coin)> {
        let mut spent = Vec::new();
        if !tx.is_coinbase() {
            for input in tx.coin_inputs() {
                let outpoint = input.outpoint();
                if let Some(coin) = self.remove(&outpoint) {
                    spent.push((outpoint, coin));
                }
            }
        }

        let tx_hash = tx.hash();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.add(
                OutPoint { tx_hash, index: index as u32 },
                Coin {
                    amount: output.amount,
                    address: output.recipient.clone(),
                    height,
                },
            );
        }
        spent
    }

    /// Remove the outputs of `tx` and restore the coins it spent
    pub fn revert_transaction(&mut self, tx: &Transaction, spent: &[(OutPoint, Coin)]) {
        let tx_hash = tx.hash();
        for index in 0..tx.outputs.len() {
            self.remove(&OutPoint { tx_hash, index: index as u32 });
        }
        for (outpoint, coin) in spent {
            self.add(*outpoint, coin.clone());
        }
    }

    /// Coins owned by `address`, largest first
    pub fn coins_of(&self, address: &Address) -> Vec<(OutPoint, Coin)> {
        let mut owned: Vec<_> = self
            .coins
            .iter()
            .filter(|(_, coin)| &coin.address == address)
            .map(|(outpoint, coin)| (*outpoint, coin.clone()))
            .collect();
        owned.sort_by(|a, b| {
            b.1.amount
                .cmp(&a.1.amount)
                .then_with(|| a.0.tx_hash.cmp(&b.0.tx_hash))
                .then_with(|| a.0.index.cmp(&b.0.index))
        });
        owned
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl CoinView for UtxoSet {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}
