//! VM error types

use chain_core::{Address, CoreError, Nonce};
use thiserror::Error;

/// VM error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Contract source failed to parse or validate
    #[error("Compilation error in {contract}: {reason}")]
    Compilation { contract: String, reason: String },

    /// No contract deployed at address
    #[error("Contract not found: {0}")]
    ContractNotFound(Address),

    /// Selector missing from the contract's ABI
    #[error("Unknown selector `{selector}` on contract {contract_address}")]
    UnknownSelector {
        contract_address: Address,
        selector: String,
    },

    /// Wrong number of calldata words
    #[error("Invalid calldata for `{selector}`: expected {expected} arguments, got {actual}")]
    InvalidCalldata {
        selector: String,
        expected: usize,
        actual: usize,
    },

    /// Contract-level assertion failed
    #[error("Assertion failed in `{selector}` on {contract_address}: {message}")]
    AssertionFailed {
        contract_address: Address,
        selector: String,
        message: String,
    },

    /// Arithmetic overflow inside contract logic
    #[error("Arithmetic overflow in `{selector}` on {contract_address}")]
    Overflow {
        contract_address: Address,
        selector: String,
    },

    /// Invalid nonce
    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: Nonce, actual: Nonce },

    /// Signature does not match the account's public key
    #[error("Invalid signature for account {0}")]
    InvalidSignature(Address),

    /// Transaction sender is not an account contract
    #[error("Contract {0} is not an account")]
    NotAnAccount(Address),

    /// Block timestamp would exceed `u64::MAX`
    #[error("Clock overflow: cannot advance timestamp {timestamp} by {seconds} seconds")]
    ClockOverflow { timestamp: u64, seconds: u64 },

    /// Invalid transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error raised by the core crate
    #[error("Core error: {0}")]
    Core(String),
}

impl From<bincode::Error> for VmError {
    fn from(err: bincode::Error) -> Self {
        VmError::Serialization(err.to_string())
    }
}

impl From<CoreError> for VmError {
    fn from(err: CoreError) -> Self {
        VmError::Core(err.to_string())
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
