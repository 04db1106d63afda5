//! Simulated chain and contract handles
//!
//! A [`ContractHandle`] is always bound to exactly one [`SharedState`]. The
//! serializable part of a handle, the [`ContractDescriptor`], carries no
//! state reference; turning it back into a handle requires naming the
//! state it will run against ([`ContractHandle::bind`]).

use crate::contract::{Abi, ContractDefinition};
use crate::executor::{CallInfo, ExecutionInfo, TransactionExecutor};
use crate::state::{BlockInfo, SharedState, WorldState};
use crate::{VmError, VmResult};
use chain_core::{Address, Felt, InvokeTransaction, Nonce, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Facts needed to rebuild a handle against any state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    /// Interface description
    pub abi: Abi,
    /// Deployed address
    pub contract_address: Address,
    /// Receipt of the deployment
    pub deploy_execution_info: ExecutionInfo,
}

/// A deployed contract bound to one world state
#[derive(Debug, Clone)]
pub struct ContractHandle {
    state: SharedState,
    descriptor: ContractDescriptor,
}

impl ContractHandle {
    /// Bind a descriptor to `state`
    pub fn bind(state: SharedState, descriptor: ContractDescriptor) -> Self {
        Self { state, descriptor }
    }

    /// Deployed address
    pub fn contract_address(&self) -> Address {
        self.descriptor.contract_address
    }

    /// Interface description
    pub fn abi(&self) -> &Abi {
        &self.descriptor.abi
    }

    /// Receipt of the deployment
    pub fn deploy_execution_info(&self) -> &ExecutionInfo {
        &self.descriptor.deploy_execution_info
    }

    /// Serializable part of this handle
    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    /// The state this handle runs against
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Current nonce of this contract
    pub fn nonce(&self) -> VmResult<Nonce> {
        self.state.nonce(&self.descriptor.contract_address)
    }

    /// Read-only call of `selector`
    pub async fn call(&self, selector: &str, calldata: &[Felt]) -> VmResult<CallInfo> {
        self.ensure_selector(selector)?;
        let address = self.descriptor.contract_address;
        self.state
            .read(|state| TransactionExecutor::new().call(state, &address, selector, calldata))
    }

    /// Submit a signed transaction sent by this (account) contract
    pub async fn execute(&self, tx: &InvokeTransaction) -> VmResult<ExecutionInfo> {
        if tx.sender_address != self.descriptor.contract_address {
            return Err(VmError::InvalidTransaction(format!(
                "transaction sender {} is not account {}",
                tx.sender_address, self.descriptor.contract_address
            )));
        }
        self.state
            .write(|state| TransactionExecutor::new().execute(state, tx))
    }

    fn ensure_selector(&self, selector: &str) -> VmResult<()> {
        match self.descriptor.abi.entry(selector) {
            Some(_) => Ok(()),
            None => Err(VmError::UnknownSelector {
                contract_address: self.descriptor.contract_address,
                selector: selector.to_string(),
            }),
        }
    }
}

/// Simulated chain over one shared world state
#[derive(Debug, Clone)]
pub struct Simulator {
    state: SharedState,
    executor: TransactionExecutor,
}

impl Simulator {
    /// Chain with empty state
    pub fn empty() -> Self {
        Self::new(SharedState::empty())
    }

    /// Chain over an existing state
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            executor: TransactionExecutor::new(),
        }
    }

    /// Chain over a private copy of `snapshot`
    pub fn from_snapshot(snapshot: &WorldState) -> Self {
        Self::new(SharedState::new(snapshot.copy()))
    }

    /// The underlying state
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Current block metadata
    pub fn block_info(&self) -> BlockInfo {
        self.state.block_info()
    }

    /// Set the block timestamp, keeping the block number
    pub fn set_block_timestamp(&self, timestamp: Timestamp) {
        let current = self.state.block_info();
        self.state
            .set_block_info(BlockInfo::new(current.block_number, timestamp));
    }

    /// Deploy a compiled contract
    pub async fn deploy(
        &self,
        definition: ContractDefinition,
        constructor_calldata: &[Felt],
    ) -> VmResult<ContractHandle> {
        let abi = definition.abi();
        let name = definition.name.clone();
        let (contract_address, deploy_execution_info) = self
            .state
            .write(|state| self.executor.deploy(state, definition, constructor_calldata))?;

        info!("Deployed contract {} at {}", name, contract_address);

        Ok(ContractHandle::bind(
            self.state.clone(),
            ContractDescriptor {
                abi,
                contract_address,
                deploy_execution_info,
            },
        ))
    }

    /// Read-only call on any deployed contract
    pub async fn call(
        &self,
        contract_address: &Address,
        selector: &str,
        calldata: &[Felt],
    ) -> VmResult<CallInfo> {
        self.state
            .read(|state| self.executor.call(state, contract_address, selector, calldata))
    }

    /// Execute a signed transaction
    pub async fn execute(&self, tx: &InvokeTransaction) -> VmResult<ExecutionInfo> {
        self.state.write(|state| self.executor.execute(state, tx))
    }
}
