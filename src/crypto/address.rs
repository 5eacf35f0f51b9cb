//! Address encoding
//!
//! Address = "PT" + Base58(BLAKE3(uncompressed_pubkey)[0:20] + checksum[0:4])
//!
//! The ledger itself treats addresses as opaque strings, so [`Address::from`]
//! accepts anything; [`Address::parse`] is for user input.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{double_hash, hash_bytes, PublicKey, SignatureError};

/// Human-readable address prefix
pub const ADDRESS_PREFIX: &str = "PT";

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid address prefix")]
    InvalidPrefix,
    #[error("Invalid base58 encoding")]
    InvalidEncoding,
    #[error("Invalid address length")]
    InvalidLength,
    #[error("Invalid checksum")]
    InvalidChecksum,
}

/// An account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Derive the address owned by `key`. Compressed keys are expanded first.
    pub fn from_public_key(key: &PublicKey) -> Result<Self, SignatureError> {
        let full = key.decompress()?;
        let digest = hash_bytes(full.as_bytes());
        let payload = &digest.0[0..20];
        let checksum = double_hash(payload);

        let mut with_checksum = Vec::with_capacity(24);
        with_checksum.extend_from_slice(payload);
        with_checksum.extend_from_slice(&checksum.0[0..4]);

        Ok(Address(format!(
            "{}{}",
            ADDRESS_PREFIX,
            bs58::encode(&with_checksum).into_string()
        )))
    }

    /// Parse and checksum-verify a user-supplied address
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let encoded = s.strip_prefix(ADDRESS_PREFIX).ok_or(AddressError::InvalidPrefix)?;
        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| AddressError::InvalidEncoding)?;
        if decoded.len() != 24 {
            return Err(AddressError::InvalidLength);
        }
        let expected = double_hash(&decoded[0..20]);
        if decoded[20..24] != expected.0[0..4] {
            return Err(AddressError::InvalidChecksum);
        }
        Ok(Address(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
