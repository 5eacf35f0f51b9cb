//! Cryptography module - hashing, secp256k1 keys, address encoding

mod address;
mod hash;
mod keys;

pub use address::*;
pub use hash::*;
pub use keys::*;
