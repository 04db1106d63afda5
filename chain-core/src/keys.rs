//! Deterministic secp256k1 keys for test identities

use crate::transaction::public_key_felt;
use crate::{CoreError, CoreResult, Felt};
use serde::{Deserialize, Serialize};

/// A secp256k1 secret key derived from a small integer seed.
///
/// The seed is the big-endian integer value of the key, so seed `3`
/// always yields the same key across runs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Derive a key from a non-zero seed
    pub fn from_seed(seed: u64) -> CoreResult<Self> {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&seed.to_be_bytes());
        secp256k1::SecretKey::from_slice(&bytes)
            .map_err(|e| CoreError::Crypto(format!("invalid seed {}: {}", seed, e)))?;
        Ok(Self(bytes))
    }

    /// Raw secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public key digest as stored by account contracts
    pub fn public_key(&self) -> CoreResult<Felt> {
        let secp = secp256k1::Secp256k1::new();
        let secret_key = secp256k1::SecretKey::from_slice(&self.0)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        Ok(public_key_felt(&public_key))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}
