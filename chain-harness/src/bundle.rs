//! Session bundle and its cache encoding
//!
//! An encoded entry is a little-endian `u32` format version followed by
//! the bincode encoding of the whole [`SessionBundle`], simulator
//! snapshot included.

use crate::signer::Signer;
use crate::{HarnessError, HarnessResult};
use chain_core::Felt;
use chain_vm::{ContractDescriptor, StateDB, WorldState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the cache entry layout
pub const CACHE_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4;

/// Everything one test session deploys, as plain data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBundle {
    /// World state after all deployments
    pub snapshot: WorldState,
    /// Signers by identity name
    pub signers: BTreeMap<String, Signer>,
    /// Account descriptors by identity name
    pub accounts: BTreeMap<String, ContractDescriptor>,
    /// Contract descriptors by configured name
    pub contracts: BTreeMap<String, ContractDescriptor>,
    /// Session constants
    pub consts: BTreeMap<String, Felt>,
    /// When the world was built
    pub built_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    built_at: &'a DateTime<Utc>,
    block_number: u64,
    block_timestamp: u64,
    state_root: String,
    accounts: BTreeMap<&'a str, String>,
    contracts: BTreeMap<&'a str, String>,
    consts: BTreeMap<&'a str, String>,
}

impl SessionBundle {
    /// Encode as a versioned cache entry
    pub fn encode(&self) -> HarnessResult<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| HarnessError::Setup(format!("Failed to encode session bundle: {}", e)))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode a cache entry stored under `key`
    pub fn decode(key: &str, bytes: &[u8]) -> HarnessResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(HarnessError::CorruptCache {
                key: key.to_string(),
                reason: format!("entry is {} bytes, shorter than its header", bytes.len()),
            });
        }

        let (header, payload) = bytes.split_at(HEADER_LEN);
        let mut version = [0u8; HEADER_LEN];
        version.copy_from_slice(header);
        let version = u32::from_le_bytes(version);
        if version != CACHE_FORMAT_VERSION {
            return Err(HarnessError::IncompatibleCache {
                key: key.to_string(),
                found: version,
                expected: CACHE_FORMAT_VERSION,
            });
        }

        bincode::deserialize(payload).map_err(|e| HarnessError::CorruptCache {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Human-readable summary of the deployment
    pub fn manifest_json(&self) -> HarnessResult<String> {
        let block_info = self.snapshot.block_info();
        let manifest = Manifest {
            built_at: &self.built_at,
            block_number: block_info.block_number,
            block_timestamp: block_info.block_timestamp,
            state_root: self.snapshot.state_root().to_hex(),
            accounts: addresses(&self.accounts),
            contracts: addresses(&self.contracts),
            consts: self
                .consts
                .iter()
                .map(|(name, value)| (name.as_str(), value.to_string()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&manifest)?)
    }
}

fn addresses(descriptors: &BTreeMap<String, ContractDescriptor>) -> BTreeMap<&str, String> {
    descriptors
        .iter()
        .map(|(name, d)| (name.as_str(), format!("0x{}", d.contract_address.to_hex())))
        .collect()
}
