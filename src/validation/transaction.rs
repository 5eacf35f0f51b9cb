//! Transaction structure
//!
//! Only the parts of a transaction the weight ledger reads are modelled here:
//! spent outpoints, reward-claim inputs and recipient outputs. Script and
//! signature validation belong to the block validation pipeline.

use serde::{Deserialize, Serialize};
use crate::crypto::{hash_bytes, Address, Hash, PublicKey, Signature};

/// Output index marking the single input of a coinbase
pub const COINBASE_OUTPUT_INDEX: u32 = 0xFFFF_FFFF;

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

/// Claim against the accumulated club reward of the signing address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    pub amount: u64,
}

/// A transaction input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash of the transaction containing the output
    pub prev_tx_hash: Hash,
    /// Index of the output in that transaction
    pub output_index: u32,
    /// Signature proving ownership
    pub signature: Signature,
    /// Public key of the signer
    pub public_key: PublicKey,
    /// Set when this input draws on the signer's club reward instead of a coin
    pub reward_claim: Option<RewardClaim>,
}

impl TxInput {
    /// Input spending a coin
    pub fn spend(prev_tx_hash: Hash, output_index: u32) -> Self {
        Self {
            prev_tx_hash,
            output_index,
            signature: Signature([0u8; 64]),
            public_key: PublicKey::default(),
            reward_claim: None,
        }
    }

    /// Input claiming `amount` of the reward accrued by `public_key`'s address
    pub fn claim(public_key: PublicKey, amount: u64) -> Self {
        Self {
            prev_tx_hash: Hash::zero(),
            output_index: 0,
            signature: Signature([0u8; 64]),
            public_key,
            reward_claim: Some(RewardClaim { amount }),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_hash: self.prev_tx_hash,
            index: self.output_index,
        }
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units. Zero marks an entrust output.
    pub amount: u64,
    pub recipient: Address,
}

impl TxOutput {
    pub fn new(amount: u64, recipient: impl Into<Address>) -> Self {
        Self {
            amount,
            recipient: recipient.into(),
        }
    }

    /// Zero-value outputs delegate the sender's weight to the recipient
    pub fn is_entrust(&self) -> bool {
        self.amount == 0
    }
}

/// A complete transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Lock time; coinbases carry their block height here so ids stay unique
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Create a coinbase paying the block reward to the forger
    pub fn coinbase(reward: u64, forger: impl Into<Address>, height: u32) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput::spend(Hash::zero(), COINBASE_OUTPUT_INDEX)],
            outputs: vec![TxOutput::new(reward, forger)],
            lock_time: height,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_hash == Hash::zero()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// Inputs that spend coins (reward claims excluded)
    pub fn coin_inputs(&self) -> impl Iterator<Item = &TxInput> {
        self.inputs.iter().filter(|input| input.reward_claim.is_none())
    }

    /// Calculate transaction hash
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes_for_signing())
    }

    fn to_bytes_for_signing(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prev_tx_hash.0);
            bytes.extend_from_slice(&input.output_index.to_le_bytes());
            match input.reward_claim {
                Some(claim) => {
                    bytes.push(1);
                    bytes.extend_from_slice(&claim.amount.to_le_bytes());
                    bytes.extend_from_slice(input.public_key.as_bytes());
                }
                None => bytes.push(0),
            }
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&(output.recipient.as_bytes().len() as u32).to_le_bytes());
            bytes.extend_from_slice(output.recipient.as_bytes());
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_detection() {
        let coinbase = Transaction::coinbase(5000, "forger", 1);
        assert!(coinbase.is_coinbase());

        let regular = Transaction::new(vec![], vec![]);
        assert!(!regular.is_coinbase());
    }

    #[test]
    fn test_coinbase_ids_unique_per_height() {
        let a = Transaction::coinbase(5000, "forger", 1);
        let b = Transaction::coinbase(5000, "forger", 2);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_entrust_output_detection() {
        assert!(TxOutput::new(0, "bob").is_entrust());
        assert!(!TxOutput::new(1, "bob").is_entrust());
    }

    #[test]
    fn test_coin_inputs_skip_claims() {
        let tx = Transaction::new(
            vec![
                TxInput::spend(hash_bytes(b"prev"), 0),
                TxInput::claim(PublicKey::default(), 10),
            ],
            vec![TxOutput::new(1, "alice")],
        );
        assert_eq!(tx.coin_inputs().count(), 1);
    }

    #[test]
    fn test_signing_hash_excludes_signatures() {
        let mut tx1 = Transaction::new(
            vec![TxInput::spend(hash_bytes(b"prev"), 0)],
            vec![TxOutput::new(100, "alice")],
        );
        let tx2 = tx1.clone();
        tx1.inputs[0].signature = Signature([1u8; 64]);
        assert_eq!(tx1.hash(), tx2.hash());
    }
}
