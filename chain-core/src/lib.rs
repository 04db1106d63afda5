//! Core chain data structures
//!
//! This crate provides the primitive building blocks shared by the
//! simulator and the test harness:
//! - Basic types (Hash, Address, Felt, BlockNumber, etc.)
//! - Signed invoke transactions
//! - Deterministic test keys

pub mod error;
pub mod keys;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use keys::PrivateKey;
pub use transaction::*;
pub use types::*;
