//! Per-test forks of the session world

use crate::bundle::SessionBundle;
use crate::signer::Signer;
use crate::{HarnessError, HarnessResult};
use chain_core::{Address, Felt};
use chain_vm::{BlockInfo, ContractDescriptor, ContractHandle, ExecutionInfo, SharedState, Simulator};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Produces isolated copies of the session world
#[derive(Debug, Clone)]
pub struct ForkFactory {
    bundle: Arc<SessionBundle>,
}

impl ForkFactory {
    /// Factory over a decoded bundle
    pub fn new(bundle: Arc<SessionBundle>) -> Self {
        Self { bundle }
    }

    /// The shared bundle
    pub fn bundle(&self) -> &Arc<SessionBundle> {
        &self.bundle
    }

    /// Copy the snapshot and bind every handle to the copy
    pub fn fork(&self) -> ForkContext {
        let state = SharedState::new(self.bundle.snapshot.copy());
        let accounts = bind_all(&state, &self.bundle.accounts);
        let contracts = bind_all(&state, &self.bundle.contracts);

        debug!(
            "Forked session world: {} accounts, {} contracts",
            accounts.len(),
            contracts.len()
        );

        ForkContext {
            state,
            accounts,
            contracts,
            bundle: Arc::clone(&self.bundle),
        }
    }
}

fn bind_all(
    state: &SharedState,
    descriptors: &BTreeMap<String, ContractDescriptor>,
) -> BTreeMap<String, ContractHandle> {
    descriptors
        .iter()
        .map(|(name, descriptor)| {
            (
                name.clone(),
                ContractHandle::bind(state.clone(), descriptor.clone()),
            )
        })
        .collect()
}

/// One test's private world
#[derive(Debug)]
pub struct ForkContext {
    state: SharedState,
    accounts: BTreeMap<String, ContractHandle>,
    contracts: BTreeMap<String, ContractHandle>,
    bundle: Arc<SessionBundle>,
}

impl ForkContext {
    /// Contract under test by configured name
    pub fn contract(&self, name: &str) -> HarnessResult<&ContractHandle> {
        self.contracts
            .get(name)
            .ok_or_else(|| HarnessError::UnknownContract(name.to_string()))
    }

    /// Account contract of an identity
    pub fn account(&self, identity: &str) -> HarnessResult<&ContractHandle> {
        self.signer(identity)?;
        self.accounts
            .get(identity)
            .ok_or_else(|| HarnessError::NoAccount(identity.to_string()))
    }

    /// Signer of an identity
    pub fn signer(&self, identity: &str) -> HarnessResult<&Signer> {
        self.bundle
            .signers
            .get(identity)
            .ok_or_else(|| HarnessError::UnknownIdentity(identity.to_string()))
    }

    /// Session constant by name
    pub fn constant(&self, name: &str) -> Option<Felt> {
        self.bundle.consts.get(name).copied()
    }

    /// Current block metadata of this fork
    pub fn block_info(&self) -> BlockInfo {
        self.state.block_info()
    }

    /// The fork's state
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Simulator over this fork's state
    pub fn simulator(&self) -> Simulator {
        Simulator::new(self.state.clone())
    }

    /// Sign as `identity` and invoke `selector` on `contract_address`.
    ///
    /// Simulator failures come back as [`HarnessError::Vm`] unchanged.
    pub async fn execute(
        &self,
        identity: &str,
        contract_address: Address,
        selector: &str,
        calldata: &[Felt],
    ) -> HarnessResult<ExecutionInfo> {
        let signer = self.signer(identity)?;
        let account = self.account(identity)?;
        signer
            .send_transaction(account, contract_address, selector, calldata)
            .await
    }

    /// Move the clock forward; the block number is unchanged
    pub fn advance_clock(&self, seconds: u64) -> HarnessResult<BlockInfo> {
        let block_info = self.state.advance_timestamp(seconds)?;
        debug!("Clock advanced to {}", block_info.block_timestamp);
        Ok(block_info)
    }
}
