//! Harness error types

use chain_vm::VmError;
use thiserror::Error;

/// Harness error type
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Building the session world failed
    #[error("Setup error: {0}")]
    Setup(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache entry could not be decoded
    #[error("Corrupt cache entry '{key}': {reason}")]
    CorruptCache { key: String, reason: String },

    /// Cache entry written by another format version
    #[error("Incompatible cache entry '{key}': format version {found}, expected {expected}")]
    IncompatibleCache {
        key: String,
        found: u32,
        expected: u32,
    },

    /// Cache store I/O failure
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// Simulator error, unchanged
    #[error(transparent)]
    Vm(#[from] VmError),

    /// No signer with this name
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Identity has no deployed account
    #[error("Identity {0} has no deployed account")]
    NoAccount(String),

    /// No contract with this name
    #[error("Unknown contract: {0}")]
    UnknownContract(String),
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::CacheIo(err.to_string())
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(err: toml::de::Error) -> Self {
        HarnessError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Config(err.to_string())
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::Address;

    #[test]
    fn test_vm_error_is_transparent() {
        let vm = VmError::ContractNotFound(Address::zero());
        let err: HarnessError = vm.clone().into();
        assert_eq!(err.to_string(), vm.to_string());
        assert!(matches!(err, HarnessError::Vm(inner) if inner == vm));
    }
}
