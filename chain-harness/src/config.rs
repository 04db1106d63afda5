//! Harness configuration

use crate::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Default cache key of the session bundle
pub const DEFAULT_CACHE_KEY: &str = "deployment";

/// A named role with a signing seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identity name, e.g. `alice`
    pub name: String,
    /// Signing key seed (non-zero)
    pub seed: u64,
    /// Whether forks expose this identity's account.
    ///
    /// Every identity gets an account deployed; an unregistered one can
    /// sign but has no account handle to send through.
    #[serde(default = "default_registered")]
    pub registered: bool,
}

fn default_registered() -> bool {
    true
}

impl IdentityConfig {
    /// Registered identity
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            registered: true,
        }
    }

    /// Identity whose account is not exposed to forks
    pub fn unregistered(name: impl Into<String>, seed: u64) -> Self {
        Self {
            registered: false,
            ..Self::new(name, seed)
        }
    }
}

/// A contract under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Name the contract is looked up by in a fork
    pub name: String,
    /// Source file, relative to the contracts directory
    pub source: String,
}

impl ContractConfig {
    /// Create a contract entry
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory contract sources are resolved against
    pub contracts_dir: PathBuf,
    /// Source of the account contract
    pub account_source: String,
    /// Identities, in deployment order
    pub identities: Vec<IdentityConfig>,
    /// Contracts under test, in deployment order
    pub contracts: Vec<ContractConfig>,
    /// Session constants exposed to every fork
    pub consts: BTreeMap<String, u64>,
    /// Key of the session bundle in the cache store
    pub cache_key: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let identities = vec![
            IdentityConfig::new("admin", 1),
            IdentityConfig::unregistered("unregistered", 2),
            IdentityConfig::new("alice", 3),
            IdentityConfig::new("bob", 4),
            IdentityConfig::new("carol", 5),
            IdentityConfig::new("dave", 6),
            IdentityConfig::new("eric", 7),
            IdentityConfig::new("frank", 8),
            IdentityConfig::new("grace", 9),
            IdentityConfig::new("hank", 10),
        ];

        Self {
            contracts_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("../contracts"),
            account_source: "Account.toml".to_string(),
            identities,
            contracts: vec![ContractConfig::new("contract", "Contract.toml")],
            consts: BTreeMap::from([("EXAMPLE_CONSTANT".to_string(), 1)]),
            cache_key: DEFAULT_CACHE_KEY.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML or JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: HarnessConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> HarnessResult<Self> {
        let config: HarnessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> HarnessResult<()> {
        if self.cache_key.is_empty() {
            return Err(HarnessError::Config("Cache key must not be empty".to_string()));
        }

        if self.account_source.is_empty() {
            return Err(HarnessError::Config(
                "Account source must not be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for identity in &self.identities {
            if identity.name.is_empty() {
                return Err(HarnessError::Config(
                    "Identity name must not be empty".to_string(),
                ));
            }
            if identity.seed == 0 {
                return Err(HarnessError::Config(format!(
                    "Identity {} has a zero seed",
                    identity.name
                )));
            }
            if !names.insert(identity.name.as_str()) {
                return Err(HarnessError::Config(format!(
                    "Duplicate identity: {}",
                    identity.name
                )));
            }
        }

        let mut names = HashSet::new();
        for contract in &self.contracts {
            if contract.name.is_empty() || contract.source.is_empty() {
                return Err(HarnessError::Config(
                    "Contract name and source must not be empty".to_string(),
                ));
            }
            if !names.insert(contract.name.as_str()) {
                return Err(HarnessError::Config(format!(
                    "Duplicate contract: {}",
                    contract.name
                )));
            }
        }

        Ok(())
    }

    /// Full path of a contract source
    pub fn source_path(&self, source: &str) -> PathBuf {
        self.contracts_dir.join(source)
    }

    pub fn with_contracts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.contracts_dir = dir.into();
        self
    }

    pub fn with_account_source(mut self, source: impl Into<String>) -> Self {
        self.account_source = source.into();
        self
    }

    pub fn with_identities(mut self, identities: Vec<IdentityConfig>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_contracts(mut self, contracts: Vec<ContractConfig>) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: u64) -> Self {
        self.consts.insert(name.into(), value);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_roster() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());

        let names: Vec<_> = config.identities.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            ["admin", "unregistered", "alice", "bob", "carol", "dave", "eric", "frank", "grace", "hank"]
        );
        let unregistered = &config.identities[1];
        assert_eq!(unregistered.seed, 2);
        assert!(!unregistered.registered);
        assert_eq!(config.consts.get("EXAMPLE_CONSTANT"), Some(&1));
        assert_eq!(config.cache_key, DEFAULT_CACHE_KEY);
        assert!(config.source_path("Contract.toml").ends_with("contracts/Contract.toml"));
    }

    #[test]
    fn test_from_toml_str_fills_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
cache_key = "custom"

[[identities]]
name = "solo"
seed = 42

[[identities]]
name = "ghost"
seed = 43
registered = false
"#,
        )
        .unwrap();

        assert_eq!(config.cache_key, "custom");
        assert_eq!(config.identities.len(), 2);
        assert!(config.identities[0].registered);
        assert!(!config.identities[1].registered);
        assert_eq!(config.account_source, "Account.toml");
        assert_eq!(config.contracts.len(), 1);
    }

    #[test]
    fn test_validation() {
        let duplicate = HarnessConfig::default()
            .with_identities(vec![IdentityConfig::new("a", 1), IdentityConfig::new("a", 2)]);
        assert!(matches!(duplicate.validate(), Err(HarnessError::Config(_))));

        let zero_seed = HarnessConfig::default().with_identities(vec![IdentityConfig::new("a", 0)]);
        assert!(zero_seed.validate().is_err());

        let empty_key = HarnessConfig::default().with_cache_key("");
        assert!(empty_key.validate().is_err());

        let duplicate_contract = HarnessConfig::default().with_contracts(vec![
            ContractConfig::new("c", "A.toml"),
            ContractConfig::new("c", "B.toml"),
        ]);
        assert!(duplicate_contract.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();

        let toml_path = dir.path().join("harness.toml");
        fs::write(&toml_path, "cache_key = \"from-toml\"\n").unwrap();
        let config = HarnessConfig::load_from_file(&toml_path).unwrap();
        assert_eq!(config.cache_key, "from-toml");

        let json_path = dir.path().join("harness.json");
        let expected = HarnessConfig::default().with_constant("LIMIT", 10);
        fs::write(&json_path, serde_json::to_string_pretty(&expected).unwrap()).unwrap();
        assert_eq!(HarnessConfig::load_from_file(&json_path).unwrap(), expected);

        let missing = HarnessConfig::load_from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(HarnessError::Config(_))));
    }
}
