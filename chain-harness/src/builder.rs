//! One-time deployment of the session world

use crate::bundle::SessionBundle;
use crate::config::HarnessConfig;
use crate::signer::Signer;
use crate::{HarnessError, HarnessResult};
use chain_core::{Felt, Timestamp};
use chain_vm::{ContractDefinition, Simulator};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Deploys accounts and contracts under test on a fresh simulator
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    config: HarnessConfig,
}

impl WorldBuilder {
    /// Create a builder for `config`
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Build the world and capture it as a bundle
    pub async fn build(&self) -> HarnessResult<SessionBundle> {
        self.config.validate()?;

        let simulator = Simulator::empty();
        let built_at = Utc::now();
        simulator.set_block_timestamp(wall_clock_seconds(built_at.timestamp())?);

        let account_definition = self.compile(&self.config.account_source)?;
        if !account_definition.is_account() {
            return Err(HarnessError::Setup(format!(
                "{} is not an account contract",
                self.config.account_source
            )));
        }

        let mut signers = BTreeMap::new();
        let mut accounts = BTreeMap::new();
        for identity in &self.config.identities {
            let signer = Signer::new(identity.seed)?;
            let account = simulator
                .deploy(account_definition.clone(), &[signer.public_key()])
                .await
                .map_err(|e| {
                    HarnessError::Setup(format!(
                        "Failed to deploy account for {}: {}",
                        identity.name, e
                    ))
                })?;
            debug!("Account {} at {}", identity.name, account.contract_address());

            if identity.registered {
                accounts.insert(identity.name.clone(), account.descriptor().clone());
            }

            signers.insert(identity.name.clone(), signer);
        }

        let mut contracts = BTreeMap::new();
        for contract in &self.config.contracts {
            let definition = self.compile(&contract.source)?;
            let handle = simulator.deploy(definition, &[]).await.map_err(|e| {
                HarnessError::Setup(format!("Failed to deploy {}: {}", contract.name, e))
            })?;
            contracts.insert(contract.name.clone(), handle.descriptor().clone());
        }

        let consts = self
            .config
            .consts
            .iter()
            .map(|(name, value)| (name.clone(), Felt::from(*value)))
            .collect();

        info!(
            "Built session world: {} accounts, {} contracts, {} identities",
            accounts.len(),
            contracts.len(),
            signers.len()
        );

        Ok(SessionBundle {
            snapshot: simulator.state().snapshot(),
            signers,
            accounts,
            contracts,
            consts,
            built_at,
        })
    }

    fn compile(&self, source: &str) -> HarnessResult<ContractDefinition> {
        let path = self.config.source_path(source);
        ContractDefinition::compile_file(&path).map_err(|e| {
            HarnessError::Setup(format!("Failed to compile {}: {}", path.display(), e))
        })
    }
}

fn wall_clock_seconds(seconds: i64) -> HarnessResult<Timestamp> {
    match Timestamp::try_from(seconds) {
        Ok(timestamp) if timestamp > 0 => Ok(timestamp),
        _ => Err(HarnessError::Setup(format!(
            "Wall clock is not after the epoch: {}",
            seconds
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContractConfig, IdentityConfig};
    use chain_vm::{SharedState, StateDB};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const ACCOUNT: &str = r#"
name = "Account"
kind = "account"
storage = ["public_key"]

[constructor]
inputs = ["public_key"]
body = [ { op = "write", var = "public_key", value = "public_key" } ]
"#;

    const TOKEN: &str = r#"
name = "Token"
storage = ["supply"]

[constructor]
body = [ { op = "write", var = "supply", value = 1000 } ]

[[functions]]
name = "supply"
kind = "view"
outputs = ["res"]
body = [ { op = "return", values = ["supply"] } ]
"#;

    fn contracts_dir() -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Account.toml"), ACCOUNT).unwrap();
        fs::write(dir.path().join("Token.toml"), TOKEN).unwrap();
        dir
    }

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default()
            .with_contracts_dir(dir.path())
            .with_identities(vec![
                IdentityConfig::new("admin", 1),
                IdentityConfig::unregistered("ghost", 2),
                IdentityConfig::new("alice", 3),
            ])
            .with_contracts(vec![ContractConfig::new("token", "Token.toml")])
    }

    #[tokio::test]
    async fn test_build_deploys_world() {
        let dir = contracts_dir();
        let bundle = WorldBuilder::new(config(&dir)).build().await.unwrap();

        assert_eq!(bundle.signers.len(), 3);
        assert_eq!(
            bundle.accounts.keys().collect::<Vec<_>>(),
            ["admin", "alice"]
        );
        assert!(!bundle.accounts.contains_key("ghost"));
        assert!(bundle.signers.contains_key("ghost"));
        // three accounts, the unregistered one included, plus the token
        assert_eq!(bundle.snapshot.contract_count(), 4);
        assert_eq!(bundle.consts.get("EXAMPLE_CONSTANT"), Some(&Felt::from(1u64)));

        let block_info = bundle.snapshot.block_info();
        assert!(block_info.block_timestamp > 0);
        assert_eq!(block_info.block_number, 0);
    }

    #[tokio::test]
    async fn test_accounts_hold_signer_keys() {
        let dir = contracts_dir();
        let bundle = WorldBuilder::new(config(&dir)).build().await.unwrap();
        let state = SharedState::new(bundle.snapshot.copy());

        for (name, descriptor) in &bundle.accounts {
            let stored = state
                .get_storage(&descriptor.contract_address, &Felt::from_name("public_key"))
                .unwrap();
            assert_eq!(stored, bundle.signers[name].public_key());
        }

        let token = &bundle.contracts["token"];
        let supply = state
            .get_storage(&token.contract_address, &Felt::from_name("supply"))
            .unwrap();
        assert_eq!(supply, Felt::from(1000u64));
    }

    #[tokio::test]
    async fn test_missing_source_is_setup_error() {
        let dir = contracts_dir();
        let config = config(&dir).with_contracts(vec![ContractConfig::new("nope", "Nope.toml")]);

        let err = WorldBuilder::new(config).build().await.unwrap_err();
        assert!(matches!(err, HarnessError::Setup(msg) if msg.contains("Nope.toml")));
    }

    #[tokio::test]
    async fn test_account_source_must_be_account() {
        let dir = contracts_dir();
        let config = config(&dir).with_account_source("Token.toml");

        let err = WorldBuilder::new(config).build().await.unwrap_err();
        assert!(matches!(err, HarnessError::Setup(_)));
    }

    #[test]
    fn test_wall_clock_seconds() {
        assert_eq!(wall_clock_seconds(1_700_000_000).unwrap(), 1_700_000_000);
        assert!(wall_clock_seconds(0).is_err());
        assert!(wall_clock_seconds(-5).is_err());
    }
}
