//! Invoke transactions and their signatures

use crate::{Address, CoreError, CoreResult, Felt, Hash, Nonce};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Transaction signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    /// Create new signature
    pub fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }
}

/// A call to `selector` on `contract_address`, sent through the account
/// contract at `sender_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode)]
pub struct InvokeTransaction {
    /// Account contract submitting the call
    pub sender_address: Address,
    /// Target contract
    pub contract_address: Address,
    /// Entry point name
    pub selector: String,
    /// Call arguments
    pub calldata: Vec<Felt>,
    /// Account nonce this transaction consumes
    pub nonce: Nonce,
    /// Transaction signature
    pub signature: Option<Signature>,
}

impl InvokeTransaction {
    /// Create a new unsigned transaction
    pub fn new(
        sender_address: Address,
        contract_address: Address,
        selector: impl Into<String>,
        calldata: Vec<Felt>,
        nonce: Nonce,
    ) -> Self {
        Self {
            sender_address,
            contract_address,
            selector: selector.into(),
            calldata,
            nonce,
            signature: None,
        }
    }

    /// Encode transaction for hashing (without signature)
    pub fn encode_for_signing(&self) -> CoreResult<Vec<u8>> {
        let tx_data = TransactionForSigning {
            sender_address: self.sender_address,
            contract_address: self.contract_address,
            selector: self.selector.clone(),
            calldata: self.calldata.clone(),
            nonce: self.nonce,
        };

        bincode::encode_to_vec(&tx_data, bincode::config::standard())
            .map_err(|e| CoreError::Bincode(e.to_string()))
    }

    /// Calculate transaction hash (including signature)
    pub fn hash(&self) -> CoreResult<Hash> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoreError::Bincode(e.to_string()))?;
        Ok(Hash::keccak(&encoded))
    }

    /// Calculate hash for signing (without signature)
    pub fn signing_hash(&self) -> CoreResult<Hash> {
        let encoded = self.encode_for_signing()?;
        Ok(Hash::keccak(&encoded))
    }

    /// Sign the transaction with private key
    pub fn sign(&mut self, private_key: &[u8]) -> CoreResult<()> {
        let signing_hash = self.signing_hash()?;

        let secp = secp256k1::Secp256k1::new();
        let secret_key = secp256k1::SecretKey::from_slice(private_key)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let message = secp256k1::Message::from_digest(*signing_hash.as_bytes());

        let sig = secp.sign_ecdsa_recoverable(message, &secret_key);
        let (recovery_id, sig_bytes) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[0..32]);
        s.copy_from_slice(&sig_bytes[32..64]);
        let v = recovery_id as u8;

        self.signature = Some(Signature::new(r, s, v));
        Ok(())
    }

    /// Recover the signer's public key from the signature
    pub fn recover_public_key(&self) -> CoreResult<Felt> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Err(CoreError::InvalidSignature),
        };

        let signing_hash = self.signing_hash()?;

        let secp = secp256k1::Secp256k1::new();
        let recovery_id = secp256k1::ecdsa::RecoveryId::from_u8_masked(signature.v);

        let mut sig_bytes = [0u8; 64];
        sig_bytes[0..32].copy_from_slice(&signature.r);
        sig_bytes[32..64].copy_from_slice(&signature.s);

        let recoverable_sig =
            secp256k1::ecdsa::RecoverableSignature::from_compact(&sig_bytes, recovery_id)
                .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let message = secp256k1::Message::from_digest(*signing_hash.as_bytes());

        let public_key = secp
            .recover_ecdsa(message, &recoverable_sig)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        Ok(public_key_felt(&public_key))
    }
}

/// Public key digest stored by account contracts: Keccak-256 of the
/// uncompressed key without its 0x04 prefix.
pub(crate) fn public_key_felt(public_key: &secp256k1::PublicKey) -> Felt {
    let pubkey_bytes = public_key.serialize_uncompressed();
    let digest = Keccak256::digest(&pubkey_bytes[1..]);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(digest.as_slice());
    Felt::new(bytes)
}

/// Helper struct for encoding transaction data for signing
#[derive(Serialize, bincode::Encode)]
struct TransactionForSigning {
    sender_address: Address,
    contract_address: Address,
    selector: String,
    calldata: Vec<Felt>,
    nonce: Nonce,
}
