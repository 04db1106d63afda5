//! Chain simulator
//!
//! This crate provides a small simulated chain: a TOML contract compiler,
//! a world state that can be copied and serialized as a plain value, and
//! an executor for deployments, signed invoke transactions and read-only
//! calls.

pub mod account;
pub mod contract;
pub mod error;
pub mod executor;
pub mod simulator;
pub mod state;

pub use account::{ContractInstance, StateChanges};
pub use contract::{
    Abi, AbiEntry, ContractDefinition, ContractKind, EntryPoint, EntryPointKind, Instruction,
    Operand, ACCOUNT_PUBLIC_KEY_VAR, CONSTRUCTOR_SELECTOR,
};
pub use error::{VmError, VmResult};
pub use executor::{CallInfo, ExecutionInfo, StateChange, TransactionExecutor};
pub use simulator::{ContractDescriptor, ContractHandle, Simulator};
pub use state::{BlockInfo, SharedState, StateDB, WorldState};
