//! Key layout and value codec
//!
//! All ledger data shares one ordered keyspace:
//!
//! | prefix | key                              | value                        |
//! |--------|----------------------------------|------------------------------|
//! | `a`    | height (i64, order-preserving) + address | address record version |
//! | `r`    | address                          | whole roster of that owner   |
//! | `r`    | (empty)                          | roster store's committed height |
//! | `j`    | height                           | operation journal of a block |
//! | `q`    | height + index (u32) + root      | reward-rate sample           |
//!
//! Address keys at negative heights are markers: [`HEIGHT_MARKER`] holds the
//! ledger's committed height and [`SNAPSHOT_MARKER`] holds the newest version
//! of every address so a cold start does not replay history.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StorageError;
use crate::crypto::Address;

const RECORD_PREFIX: u8 = b'a';
const ROSTER_PREFIX: u8 = b'r';
const JOURNAL_PREFIX: u8 = b'j';
const RATE_PREFIX: u8 = b'q';

/// Sentinel height for the committed-height marker
pub const HEIGHT_MARKER: i64 = -1;
/// Sentinel height for newest-snapshot markers
pub const SNAPSHOT_MARKER: i64 = -2;

/// Big-endian with the sign bit flipped, so negative heights sort first
fn encode_height(height: i64) -> [u8; 8] {
    ((height as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_height(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(arr) ^ (1 << 63)) as i64)
}

/// Key of an address record version at `height`
pub fn record_key(height: i64, address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + address.as_bytes().len());
    key.push(RECORD_PREFIX);
    key.extend_from_slice(&encode_height(height));
    key.extend_from_slice(address.as_bytes());
    key
}

/// Prefix covering every address versioned at `height`
pub fn version_prefix(height: u64) -> Vec<u8> {
    let mut key = vec![RECORD_PREFIX];
    key.extend_from_slice(&encode_height(height as i64));
    key
}

pub fn snapshot_key(address: &Address) -> Vec<u8> {
    record_key(SNAPSHOT_MARKER, address)
}

/// Prefix covering every newest-snapshot marker
pub fn snapshot_prefix() -> Vec<u8> {
    let mut key = vec![RECORD_PREFIX];
    key.extend_from_slice(&encode_height(SNAPSHOT_MARKER));
    key
}

pub fn ledger_height_key() -> Vec<u8> {
    let mut key = vec![RECORD_PREFIX];
    key.extend_from_slice(&encode_height(HEIGHT_MARKER));
    key
}

/// Address encoded after a record-key prefix
pub fn record_key_address(key: &[u8]) -> Option<Address> {
    let suffix = key.get(9..)?;
    std::str::from_utf8(suffix).ok().map(Address::from)
}

pub fn roster_key(owner: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + owner.as_bytes().len());
    key.push(ROSTER_PREFIX);
    key.extend_from_slice(owner.as_bytes());
    key
}

/// The roster store records its own committed height under the bare prefix
pub fn roster_height_key() -> Vec<u8> {
    vec![ROSTER_PREFIX]
}

pub fn roster_prefix() -> Vec<u8> {
    vec![ROSTER_PREFIX]
}

pub fn roster_key_owner(key: &[u8]) -> Option<Address> {
    let suffix = key.get(1..)?;
    if suffix.is_empty() {
        return None;
    }
    std::str::from_utf8(suffix).ok().map(Address::from)
}

pub fn journal_key(height: u64) -> Vec<u8> {
    let mut key = vec![JOURNAL_PREFIX];
    key.extend_from_slice(&encode_height(height as i64));
    key
}

pub fn rate_prefix(height: u64) -> Vec<u8> {
    let mut key = vec![RATE_PREFIX];
    key.extend_from_slice(&encode_height(height as i64));
    key
}

/// `index` is the position of the sample within its block, so two payouts
/// to the same root at one height keep separate keys
pub fn rate_key(height: u64, index: u32, root: &Address) -> Vec<u8> {
    let mut key = rate_prefix(height);
    key.extend_from_slice(&index.to_be_bytes());
    key.extend_from_slice(root.as_bytes());
    key
}

/// Human-readable rendering of a key for error messages and logs
pub fn describe_key(key: &[u8]) -> String {
    match key.first() {
        Some(&RECORD_PREFIX) if key.len() >= 9 => {
            let height = decode_height(&key[1..9]).unwrap_or_default();
            let address = String::from_utf8_lossy(&key[9..]);
            format!("record({height}, {address:?})")
        }
        Some(&ROSTER_PREFIX) => format!("roster({:?})", String::from_utf8_lossy(&key[1..])),
        Some(&JOURNAL_PREFIX) if key.len() >= 9 => {
            format!("journal({})", decode_height(&key[1..9]).unwrap_or_default())
        }
        Some(&RATE_PREFIX) if key.len() >= 13 => format!(
            "rate({}, #{}, {:?})",
            decode_height(&key[1..9]).unwrap_or_default(),
            u32::from_be_bytes([key[9], key[10], key[11], key[12]]),
            String::from_utf8_lossy(&key[13..])
        ),
        _ => hex::encode(key),
    }
}

pub fn encode_value<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|source| StorageError::Encode { what, source })
}

pub fn decode_value<T: DeserializeOwned>(
    what: &'static str,
    key: &[u8],
    bytes: &[u8],
) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|source| StorageError::Decode {
        what,
        key: describe_key(key),
        source,
    })
}
