//! Deployed contract instances and staged state changes

use chain_core::{Address, Felt, Hash, Nonce};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A deployed contract: which class it runs and its transaction nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInstance {
    /// Class hash of the contract code
    pub class_hash: Hash,
    /// Number of transactions sent by this contract (accounts only)
    pub nonce: Nonce,
}

impl ContractInstance {
    /// Create a freshly deployed instance
    pub fn new(class_hash: Hash) -> Self {
        Self {
            class_hash,
            nonce: 0,
        }
    }

    /// Increment nonce
    pub fn increment_nonce(&mut self) {
        self.nonce += 1;
    }
}

/// Changes staged during one execution, applied only if it succeeds
#[derive(Debug, Clone, Default)]
pub struct StateChanges {
    /// Storage writes keyed by contract and slot
    pub storage: BTreeMap<(Address, Felt), Felt>,
    /// Newly deployed contracts
    pub deployed: BTreeMap<Address, ContractInstance>,
    /// Accounts whose nonce is consumed
    pub nonces: Vec<Address>,
}

impl StateChanges {
    /// Create new empty changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Staged storage value, if any
    pub fn get_storage(&self, address: &Address, key: &Felt) -> Option<Felt> {
        self.storage.get(&(*address, *key)).copied()
    }

    /// Update storage
    pub fn update_storage(&mut self, address: Address, key: Felt, value: Felt) {
        self.storage.insert((address, key), value);
    }

    /// Record a deployment
    pub fn deploy(&mut self, address: Address, instance: ContractInstance) {
        self.deployed.insert(address, instance);
    }

    /// Consume one nonce of `address`
    pub fn bump_nonce(&mut self, address: Address) {
        self.nonces.push(address);
    }

    /// Check if changes are empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty() && self.deployed.is_empty() && self.nonces.is_empty()
    }
}
