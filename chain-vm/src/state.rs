//! World state snapshots

use crate::account::{ContractInstance, StateChanges};
use crate::contract::ContractDefinition;
use crate::{VmError, VmResult};
use chain_core::{Address, BlockNumber, Felt, Hash, Nonce, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Block metadata visible to contracts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_number: BlockNumber,
    pub block_timestamp: Timestamp,
}

impl BlockInfo {
    /// Create block info
    pub fn new(block_number: BlockNumber, block_timestamp: Timestamp) -> Self {
        Self {
            block_number,
            block_timestamp,
        }
    }
}

/// State database trait
pub trait StateDB: Send + Sync {
    /// Get deployed contract by address
    fn get_contract(&self, address: &Address) -> VmResult<Option<ContractInstance>>;

    /// Get a declared class
    fn get_class(&self, class_hash: &Hash) -> VmResult<Option<ContractDefinition>>;

    /// Get storage value; unset slots read as zero
    fn get_storage(&self, address: &Address, key: &Felt) -> VmResult<Felt>;

    /// Declare a class, returning its hash
    fn declare_class(&mut self, definition: ContractDefinition) -> VmResult<Hash>;

    /// Apply staged changes
    fn apply_changes(&mut self, changes: StateChanges) -> VmResult<()>;

    /// Current block metadata
    fn block_info(&self) -> BlockInfo;

    /// Replace block metadata as a whole
    fn set_block_info(&mut self, block_info: BlockInfo);

    /// Reserve the next deployment salt
    fn next_salt(&mut self) -> u64;

    /// Get state root hash
    fn state_root(&self) -> Hash;
}

/// Complete simulated chain state.
///
/// A plain owned value: [`WorldState::copy`] yields a snapshot that shares
/// nothing with the original.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    /// Declared classes by class hash
    classes: BTreeMap<Hash, ContractDefinition>,
    /// Deployed contracts
    contracts: BTreeMap<Address, ContractInstance>,
    /// Contract storage
    storage: BTreeMap<Address, BTreeMap<Felt, Felt>>,
    /// Block metadata
    block_info: BlockInfo,
    /// Deployment counter used to derive addresses
    deploy_salt: u64,
}

impl WorldState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent deep copy of this snapshot
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Move the clock forward, leaving the block number unchanged
    pub fn advance_timestamp(&mut self, seconds: u64) -> VmResult<BlockInfo> {
        let timestamp = self.block_info.block_timestamp;
        let advanced = timestamp
            .checked_add(seconds)
            .ok_or(VmError::ClockOverflow { timestamp, seconds })?;
        self.block_info = BlockInfo::new(self.block_info.block_number, advanced);
        Ok(self.block_info)
    }

    /// Number of deployed contracts
    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    /// Nonce of a deployed contract
    pub fn nonce(&self, address: &Address) -> VmResult<Nonce> {
        self.contracts
            .get(address)
            .map(|instance| instance.nonce)
            .ok_or(VmError::ContractNotFound(*address))
    }

    fn set_storage(&mut self, address: Address, key: Felt, value: Felt) {
        let storage = self.storage.entry(address).or_default();

        if value == Felt::ZERO {
            storage.remove(&key);
            if storage.is_empty() {
                self.storage.remove(&address);
            }
        } else {
            storage.insert(key, value);
        }
    }
}

impl StateDB for WorldState {
    fn get_contract(&self, address: &Address) -> VmResult<Option<ContractInstance>> {
        Ok(self.contracts.get(address).cloned())
    }

    fn get_class(&self, class_hash: &Hash) -> VmResult<Option<ContractDefinition>> {
        Ok(self.classes.get(class_hash).cloned())
    }

    fn get_storage(&self, address: &Address, key: &Felt) -> VmResult<Felt> {
        Ok(self
            .storage
            .get(address)
            .and_then(|storage| storage.get(key))
            .copied()
            .unwrap_or(Felt::ZERO))
    }

    fn declare_class(&mut self, definition: ContractDefinition) -> VmResult<Hash> {
        let class_hash = definition.class_hash()?;
        self.classes.entry(class_hash).or_insert(definition);
        Ok(class_hash)
    }

    fn apply_changes(&mut self, changes: StateChanges) -> VmResult<()> {
        for (address, instance) in changes.deployed {
            if self.contracts.contains_key(&address) {
                return Err(VmError::InvalidTransaction(format!(
                    "address {} already in use",
                    address
                )));
            }
            self.contracts.insert(address, instance);
        }

        for ((address, key), value) in changes.storage {
            self.set_storage(address, key, value);
        }

        for address in changes.nonces {
            self.contracts
                .get_mut(&address)
                .ok_or(VmError::ContractNotFound(address))?
                .increment_nonce();
        }

        Ok(())
    }

    fn block_info(&self) -> BlockInfo {
        self.block_info
    }

    fn set_block_info(&mut self, block_info: BlockInfo) {
        self.block_info = block_info;
    }

    fn next_salt(&mut self) -> u64 {
        let salt = self.deploy_salt;
        self.deploy_salt += 1;
        salt
    }

    fn state_root(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();

        for class_hash in self.classes.keys() {
            hasher.update(class_hash.as_bytes());
        }

        for (address, instance) in &self.contracts {
            hasher.update(address.as_bytes());
            hasher.update(instance.class_hash.as_bytes());
            hasher.update(&instance.nonce.to_le_bytes());
        }

        for (address, storage) in &self.storage {
            hasher.update(address.as_bytes());
            for (key, value) in storage {
                hasher.update(key.as_bytes());
                hasher.update(value.as_bytes());
            }
        }

        hasher.update(&self.block_info.block_number.to_le_bytes());
        hasher.update(&self.block_info.block_timestamp.to_le_bytes());

        Hash::new(*hasher.finalize().as_bytes())
    }
}

/// One world state shared by every handle bound to it
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<WorldState>>,
}

impl SharedState {
    /// Wrap a state
    pub fn new(state: WorldState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Create from empty state
    pub fn empty() -> Self {
        Self::new(WorldState::new())
    }

    /// Copy the current state out
    pub fn snapshot(&self) -> WorldState {
        self.inner.read().copy()
    }

    /// New shared state backed by a copy of this one
    pub fn fork(&self) -> SharedState {
        Self::new(self.snapshot())
    }

    /// Whether both handles point at the same state instance
    pub fn same_state(&self, other: &SharedState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current block metadata
    pub fn block_info(&self) -> BlockInfo {
        self.inner.read().block_info()
    }

    /// Replace block metadata
    pub fn set_block_info(&self, block_info: BlockInfo) {
        self.inner.write().set_block_info(block_info);
    }

    /// Move the clock forward
    pub fn advance_timestamp(&self, seconds: u64) -> VmResult<BlockInfo> {
        self.inner.write().advance_timestamp(seconds)
    }

    /// Read a storage slot
    pub fn get_storage(&self, address: &Address, key: &Felt) -> VmResult<Felt> {
        self.inner.read().get_storage(address, key)
    }

    /// Nonce of a deployed contract
    pub fn nonce(&self, address: &Address) -> VmResult<Nonce> {
        self.inner.read().nonce(address)
    }

    /// Get state root
    pub fn state_root(&self) -> Hash {
        self.inner.read().state_root()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        f(&self.inner.read())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut WorldState) -> R) -> R {
        f(&mut self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn populated_state() -> (WorldState, Address, Felt) {
        let mut state = WorldState::new();
        let address = Address::new([1u8; 20]);
        let key = Felt::from_name("count");

        let mut changes = StateChanges::new();
        changes.deploy(address, ContractInstance::new(Hash::zero()));
        changes.update_storage(address, key, Felt::from(5u64));
        state.apply_changes(changes).unwrap();
        (state, address, key)
    }

    #[test]
    fn test_world_state_storage() {
        let (mut state, address, key) = populated_state();
        assert_eq!(state.get_storage(&address, &key).unwrap(), Felt::from(5u64));
        assert_eq!(
            state.get_storage(&address, &Felt::from_name("other")).unwrap(),
            Felt::ZERO
        );

        let mut changes = StateChanges::new();
        changes.update_storage(address, key, Felt::ZERO);
        state.apply_changes(changes).unwrap();
        assert!(state.storage.is_empty());
    }

    #[test]
    fn test_copy_is_independent() {
        let (mut state, address, key) = populated_state();
        let copy = state.copy();
        assert_eq!(copy, state);

        let mut changes = StateChanges::new();
        changes.update_storage(address, key, Felt::from(9u64));
        changes.bump_nonce(address);
        state.apply_changes(changes).unwrap();
        state.advance_timestamp(60).unwrap();

        assert_eq!(copy.get_storage(&address, &key).unwrap(), Felt::from(5u64));
        assert_eq!(copy.nonce(&address).unwrap(), 0);
        assert_eq!(copy.block_info().block_timestamp, 0);
        assert_ne!(copy.state_root(), state.state_root());
    }

    #[test]
    fn test_duplicate_deploy_rejected() {
        let (mut state, address, _) = populated_state();
        let mut changes = StateChanges::new();
        changes.deploy(address, ContractInstance::new(Hash::zero()));
        assert!(state.apply_changes(changes).is_err());
    }

    #[test]
    fn test_nonce_of_missing_contract() {
        let state = WorldState::new();
        assert_eq!(
            state.nonce(&Address::zero()),
            Err(VmError::ContractNotFound(Address::zero()))
        );
    }

    #[test]
    fn test_shared_state_fork() {
        let (state, address, key) = populated_state();
        let shared = SharedState::new(state);
        let alias = shared.clone();
        let forked = shared.fork();

        assert!(shared.same_state(&alias));
        assert!(!shared.same_state(&forked));

        shared.write(|s| {
            let mut changes = StateChanges::new();
            changes.update_storage(address, key, Felt::from(6u64));
            s.apply_changes(changes).unwrap();
        });

        assert_eq!(alias.get_storage(&address, &key).unwrap(), Felt::from(6u64));
        assert_eq!(forked.get_storage(&address, &key).unwrap(), Felt::from(5u64));
    }

    #[test]
    fn test_state_root_deterministic() {
        let (a, _, _) = populated_state();
        let (b, _, _) = populated_state();
        assert_eq!(a.state_root(), b.state_root());
    }

    #[test]
    fn test_advance_timestamp_overflow() {
        let mut state = WorldState::new();
        state.set_block_info(BlockInfo::new(3, u64::MAX - 10));

        assert_eq!(
            state.advance_timestamp(10).unwrap(),
            BlockInfo::new(3, u64::MAX)
        );
        assert_eq!(
            state.advance_timestamp(1),
            Err(VmError::ClockOverflow {
                timestamp: u64::MAX,
                seconds: 1,
            })
        );
        assert_eq!(state.block_info(), BlockInfo::new(3, u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_advance_timestamp_keeps_block_number(
            number in 0u64..1_000_000,
            start in 0u64..4_000_000_000,
            steps in proptest::collection::vec(0u64..100_000, 1..8),
        ) {
            let mut state = WorldState::new();
            state.set_block_info(BlockInfo::new(number, start));

            let mut expected = start;
            for step in steps {
                let info = state.advance_timestamp(step).unwrap();
                expected += step;
                prop_assert_eq!(info.block_timestamp, expected);
                prop_assert_eq!(info.block_number, number);
            }
        }
    }
}
