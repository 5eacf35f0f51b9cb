//! secp256k1 ECDSA keys
//!
//! Block headers carry the forger's key in compressed SEC1 form (33 bytes).
//! Weight accounting, address derivation and the generation-signature hash
//! all use the uncompressed form (65 bytes), so [`PublicKey::decompress`] is
//! on the consensus path.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Hash;

/// Length of a compressed SEC1 public key
pub const COMPRESSED_KEY_LEN: usize = 33;
/// Length of an uncompressed SEC1 public key
pub const UNCOMPRESSED_KEY_LEN: usize = 65;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
}

/// 32-byte private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// SEC1-encoded public key, compressed or uncompressed. Empty when absent.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(Vec<u8>);

/// 64-byte compact ECDSA signature
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "sig_serde")] pub [u8; 64]);

mod sig_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Invalid signature length"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// Compressed public key, the form carried in block headers
    pub fn public_key(&self) -> PublicKey {
        let point = self.0.verifying_key().to_encoded_point(true);
        PublicKey(point.as_bytes().to_vec())
    }

    /// Sign a message hash
    pub fn sign(&self, message: &Hash) -> Signature {
        let signature: EcdsaSignature = self.0.sign(&message.0);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&signature.to_bytes());
        Signature(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

impl PublicKey {
    /// Parse and validate a SEC1 encoding (33 or 65 bytes)
    pub fn from_sec1(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != COMPRESSED_KEY_LEN && bytes.len() != UNCOMPRESSED_KEY_LEN {
            return Err(SignatureError::InvalidPublicKey);
        }
        k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(PublicKey(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_compressed(&self) -> bool {
        self.0.len() == COMPRESSED_KEY_LEN
    }

    /// Return the uncompressed (65-byte) form of this key.
    ///
    /// Already-uncompressed keys are re-validated and returned as-is.
    pub fn decompress(&self) -> Result<PublicKey, SignatureError> {
        let key = k256::PublicKey::from_sec1_bytes(&self.0)
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        let point = key.to_encoded_point(false);
        Ok(PublicKey(point.as_bytes().to_vec()))
    }

    /// Verify a signature over a message hash
    pub fn verify(&self, message: &Hash, signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_sec1_bytes(&self.0) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
        let sig = match EcdsaSignature::from_slice(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        verifying_key.verify(&message.0, &sig).is_ok()
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(*bytes)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}
