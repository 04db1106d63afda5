//! Transaction signing for test identities

use crate::{HarnessError, HarnessResult};
use chain_core::{Address, Felt, InvokeTransaction, PrivateKey};
use chain_vm::{ContractHandle, ExecutionInfo, VmError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Signing key of one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    seed: u64,
    private_key: PrivateKey,
    public_key: Felt,
}

impl Signer {
    /// Derive a signer from a non-zero seed
    pub fn new(seed: u64) -> HarnessResult<Self> {
        let private_key = PrivateKey::from_seed(seed)
            .map_err(|e| HarnessError::Setup(format!("Cannot derive signer: {}", e)))?;
        let public_key = private_key
            .public_key()
            .map_err(|e| HarnessError::Setup(format!("Cannot derive signer: {}", e)))?;

        Ok(Self {
            seed,
            private_key,
            public_key,
        })
    }

    /// Seed the key was derived from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Public key as stored by account contracts
    pub fn public_key(&self) -> Felt {
        self.public_key
    }

    /// Sign an invoke of `selector` on `contract_address` sent from
    /// `account`, using the account's current nonce.
    pub fn sign_transaction(
        &self,
        account: &ContractHandle,
        contract_address: Address,
        selector: &str,
        calldata: &[Felt],
    ) -> HarnessResult<InvokeTransaction> {
        let nonce = account.nonce()?;
        let mut tx = InvokeTransaction::new(
            account.contract_address(),
            contract_address,
            selector,
            calldata.to_vec(),
            nonce,
        );
        tx.sign(self.private_key.as_bytes()).map_err(VmError::from)?;
        Ok(tx)
    }

    /// Sign and submit through `account`
    pub async fn send_transaction(
        &self,
        account: &ContractHandle,
        contract_address: Address,
        selector: &str,
        calldata: &[Felt],
    ) -> HarnessResult<ExecutionInfo> {
        let tx = self.sign_transaction(account, contract_address, selector, calldata)?;
        debug!(
            "Sending {} to {} from {} (nonce {})",
            selector, contract_address, tx.sender_address, tx.nonce
        );
        Ok(account.execute(&tx).await?)
    }
}
