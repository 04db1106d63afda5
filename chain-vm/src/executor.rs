//! Transaction execution engine

use crate::account::{ContractInstance, StateChanges};
use crate::contract::{
    ContractDefinition, EntryPoint, Instruction, Operand, ACCOUNT_PUBLIC_KEY_VAR,
    CONSTRUCTOR_SELECTOR,
};
use crate::state::{BlockInfo, StateDB};
use crate::{VmError, VmResult};
use chain_core::{Address, Felt, Hash, InvokeTransaction, Nonce};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// State change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    /// Contract deployed
    ContractDeployed { address: Address, class_hash: Hash },
    /// Storage value changed
    StorageChange {
        address: Address,
        key: Felt,
        old_value: Felt,
        new_value: Felt,
    },
    /// Account nonce changed
    NonceChange {
        address: Address,
        old_nonce: Nonce,
        new_nonce: Nonce,
    },
}

/// One entry point execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Calling contract (zero for direct calls and constructors)
    pub caller_address: Address,
    /// Executing contract
    pub contract_address: Address,
    /// Entry point name
    pub selector: String,
    /// Arguments
    pub calldata: Vec<Felt>,
    /// Returned values
    pub retdata: Vec<Felt>,
    /// Names of the returned values, from the ABI
    pub outputs: Vec<String>,
}

impl CallInfo {
    /// Returned value by output name
    pub fn output(&self, name: &str) -> Option<Felt> {
        self.outputs
            .iter()
            .position(|output| output == name)
            .and_then(|index| self.retdata.get(index))
            .copied()
    }
}

/// Transaction execution receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Hash of the invoke transaction (`None` for deployments)
    pub transaction_hash: Option<Hash>,
    /// Top-level call
    pub call_info: CallInfo,
    /// State changes made
    pub state_changes: Vec<StateChange>,
    /// Block the execution ran in
    pub block_info: BlockInfo,
}

impl ExecutionInfo {
    /// Returned value by output name
    pub fn output(&self, name: &str) -> Option<Felt> {
        self.call_info.output(name)
    }
}

struct Frame<'a> {
    caller: Address,
    contract_address: Address,
    block_info: BlockInfo,
    calldata: &'a [Felt],
    entry_point: &'a EntryPoint,
}

impl Frame<'_> {
    fn assertion(&self, message: &Option<String>, fallback: String) -> VmError {
        VmError::AssertionFailed {
            contract_address: self.contract_address,
            selector: self.entry_point.name.clone(),
            message: message.clone().unwrap_or(fallback),
        }
    }
}

/// Main transaction executor
#[derive(Debug, Clone, Default)]
pub struct TransactionExecutor;

impl TransactionExecutor {
    /// Create new transaction executor
    pub fn new() -> Self {
        Self
    }

    /// Declare `definition`, run its constructor and record the instance.
    ///
    /// The class declaration and the consumed salt persist even when the
    /// constructor fails.
    pub fn deploy<S: StateDB>(
        &self,
        state: &mut S,
        definition: ContractDefinition,
        calldata: &[Felt],
    ) -> VmResult<(Address, ExecutionInfo)> {
        let constructor = definition.constructor.clone();
        let name = definition.name.clone();
        let class_hash = state.declare_class(definition)?;
        let salt = state.next_salt();
        let address = derive_address(&class_hash, salt, calldata);
        let block_info = state.block_info();

        let mut changes = StateChanges::new();
        changes.deploy(address, ContractInstance::new(class_hash));

        let (retdata, outputs) = match &constructor {
            Some(entry_point) => {
                check_calldata(entry_point, calldata)?;
                let frame = Frame {
                    caller: Address::zero(),
                    contract_address: address,
                    block_info,
                    calldata,
                    entry_point,
                };
                (run(&*state, &mut changes, &frame)?, entry_point.outputs.clone())
            }
            None if !calldata.is_empty() => {
                return Err(VmError::InvalidCalldata {
                    selector: CONSTRUCTOR_SELECTOR.to_string(),
                    expected: 0,
                    actual: calldata.len(),
                });
            }
            None => (Vec::new(), Vec::new()),
        };

        let mut state_changes = vec![StateChange::ContractDeployed {
            address,
            class_hash,
        }];
        state_changes.extend(describe_storage(&*state, &changes)?);
        state.apply_changes(changes)?;

        debug!("Deployed {} at {} (salt {})", name, address, salt);

        Ok((
            address,
            ExecutionInfo {
                transaction_hash: None,
                call_info: CallInfo {
                    caller_address: Address::zero(),
                    contract_address: address,
                    selector: CONSTRUCTOR_SELECTOR.to_string(),
                    calldata: calldata.to_vec(),
                    retdata,
                    outputs,
                },
                state_changes,
                block_info,
            },
        ))
    }

    /// Execute a signed invoke transaction
    pub fn execute<S: StateDB>(
        &self,
        state: &mut S,
        tx: &InvokeTransaction,
    ) -> VmResult<ExecutionInfo> {
        let sender_nonce = self.validate_transaction(&*state, tx)?;
        let (definition, _) = load_contract(&*state, &tx.contract_address)?;
        let entry_point = find_entry_point(&definition, &tx.contract_address, &tx.selector)?;
        check_calldata(entry_point, &tx.calldata)?;

        debug!(
            "Executing {} on {} from {} (nonce {})",
            tx.selector, tx.contract_address, tx.sender_address, tx.nonce
        );

        let block_info = state.block_info();
        let frame = Frame {
            caller: tx.sender_address,
            contract_address: tx.contract_address,
            block_info,
            calldata: &tx.calldata,
            entry_point,
        };

        let mut changes = StateChanges::new();
        let retdata = run(&*state, &mut changes, &frame).map_err(|err| {
            warn!("Transaction {} on {} failed: {}", tx.selector, tx.contract_address, err);
            err
        })?;
        changes.bump_nonce(tx.sender_address);

        let mut state_changes = describe_storage(&*state, &changes)?;
        state_changes.push(StateChange::NonceChange {
            address: tx.sender_address,
            old_nonce: sender_nonce,
            new_nonce: sender_nonce + 1,
        });
        state.apply_changes(changes)?;

        Ok(ExecutionInfo {
            transaction_hash: Some(tx.hash()?),
            call_info: CallInfo {
                caller_address: tx.sender_address,
                contract_address: tx.contract_address,
                selector: tx.selector.clone(),
                calldata: tx.calldata.clone(),
                retdata,
                outputs: entry_point.outputs.clone(),
            },
            state_changes,
            block_info,
        })
    }

    /// Run an entry point without committing any change
    pub fn call<S: StateDB>(
        &self,
        state: &S,
        contract_address: &Address,
        selector: &str,
        calldata: &[Felt],
    ) -> VmResult<CallInfo> {
        let (definition, _) = load_contract(state, contract_address)?;
        let entry_point = find_entry_point(&definition, contract_address, selector)?;
        check_calldata(entry_point, calldata)?;

        let frame = Frame {
            caller: Address::zero(),
            contract_address: *contract_address,
            block_info: state.block_info(),
            calldata,
            entry_point,
        };
        let mut scratch = StateChanges::new();
        let retdata = run(state, &mut scratch, &frame)?;

        Ok(CallInfo {
            caller_address: Address::zero(),
            contract_address: *contract_address,
            selector: selector.to_string(),
            calldata: calldata.to_vec(),
            retdata,
            outputs: entry_point.outputs.clone(),
        })
    }

    /// Validate sender, nonce and signature; returns the sender's nonce
    pub fn validate_transaction<S: StateDB>(
        &self,
        state: &S,
        tx: &InvokeTransaction,
    ) -> VmResult<Nonce> {
        let sender = tx.sender_address;
        let (definition, instance) = load_contract(state, &sender)?;
        if !definition.is_account() {
            return Err(VmError::NotAnAccount(sender));
        }

        if instance.nonce != tx.nonce {
            return Err(VmError::InvalidNonce {
                expected: instance.nonce,
                actual: tx.nonce,
            });
        }

        let recovered = tx
            .recover_public_key()
            .map_err(|_| VmError::InvalidSignature(sender))?;
        let stored = state.get_storage(&sender, &Felt::from_name(ACCOUNT_PUBLIC_KEY_VAR))?;
        if recovered != stored {
            return Err(VmError::InvalidSignature(sender));
        }

        Ok(instance.nonce)
    }
}

fn load_contract<S: StateDB>(
    state: &S,
    address: &Address,
) -> VmResult<(ContractDefinition, ContractInstance)> {
    let instance = state
        .get_contract(address)?
        .ok_or(VmError::ContractNotFound(*address))?;
    let definition = state.get_class(&instance.class_hash)?.ok_or_else(|| {
        VmError::InvalidTransaction(format!("class {} is not declared", instance.class_hash))
    })?;
    Ok((definition, instance))
}

fn find_entry_point<'a>(
    definition: &'a ContractDefinition,
    address: &Address,
    selector: &str,
) -> VmResult<&'a EntryPoint> {
    definition
        .entry_point(selector)
        .ok_or_else(|| VmError::UnknownSelector {
            contract_address: *address,
            selector: selector.to_string(),
        })
}

fn check_calldata(entry_point: &EntryPoint, calldata: &[Felt]) -> VmResult<()> {
    if entry_point.inputs.len() != calldata.len() {
        return Err(VmError::InvalidCalldata {
            selector: entry_point.name.clone(),
            expected: entry_point.inputs.len(),
            actual: calldata.len(),
        });
    }
    Ok(())
}

/// Address of a new deployment: last 20 bytes of
/// keccak(class_hash || salt || calldata)
fn derive_address(class_hash: &Hash, salt: u64, calldata: &[Felt]) -> Address {
    let mut preimage = Vec::with_capacity(40 + calldata.len() * 32);
    preimage.extend_from_slice(class_hash.as_bytes());
    preimage.extend_from_slice(&salt.to_be_bytes());
    for word in calldata {
        preimage.extend_from_slice(word.as_bytes());
    }
    Address::from_slice(&Hash::keccak(&preimage).as_bytes()[12..])
}

fn read_storage<S: StateDB>(
    state: &S,
    changes: &StateChanges,
    address: &Address,
    key: &Felt,
) -> VmResult<Felt> {
    match changes.get_storage(address, key) {
        Some(value) => Ok(value),
        None => state.get_storage(address, key),
    }
}

fn eval<S: StateDB>(
    state: &S,
    changes: &StateChanges,
    frame: &Frame<'_>,
    operand: &Operand,
) -> VmResult<Felt> {
    let value = match operand {
        Operand::Const(value) => *value,
        Operand::Arg(index) => *frame
            .calldata
            .get(*index)
            .ok_or_else(|| VmError::InvalidCalldata {
                selector: frame.entry_point.name.clone(),
                expected: frame.entry_point.inputs.len(),
                actual: frame.calldata.len(),
            })?,
        Operand::Storage(slot) => read_storage(state, changes, &frame.contract_address, slot)?,
        Operand::Caller => Felt::from(frame.caller),
        Operand::ContractAddress => Felt::from(frame.contract_address),
        Operand::Timestamp => Felt::from(frame.block_info.block_timestamp),
        Operand::BlockNumber => Felt::from(frame.block_info.block_number),
    };
    Ok(value)
}

fn run<S: StateDB>(
    state: &S,
    changes: &mut StateChanges,
    frame: &Frame<'_>,
) -> VmResult<Vec<Felt>> {
    for instruction in &frame.entry_point.body {
        match instruction {
            Instruction::AssertEq { lhs, rhs, message } => {
                let lhs = eval(state, changes, frame, lhs)?;
                let rhs = eval(state, changes, frame, rhs)?;
                if lhs != rhs {
                    return Err(frame.assertion(message, format!("{} != {}", lhs, rhs)));
                }
            }
            Instruction::AssertNe { lhs, rhs, message } => {
                let lhs = eval(state, changes, frame, lhs)?;
                let rhs = eval(state, changes, frame, rhs)?;
                if lhs == rhs {
                    return Err(frame.assertion(message, format!("{} == {}", lhs, rhs)));
                }
            }
            Instruction::Write { slot, value } => {
                let value = eval(state, changes, frame, value)?;
                changes.update_storage(frame.contract_address, *slot, value);
            }
            Instruction::Add { slot, value } => {
                let current = read_storage(state, changes, &frame.contract_address, slot)?;
                let value = eval(state, changes, frame, value)?;
                let sum = current
                    .checked_add(&value)
                    .ok_or_else(|| VmError::Overflow {
                        contract_address: frame.contract_address,
                        selector: frame.entry_point.name.clone(),
                    })?;
                changes.update_storage(frame.contract_address, *slot, sum);
            }
            Instruction::Return(values) => {
                return values
                    .iter()
                    .map(|value| eval(state, changes, frame, value))
                    .collect();
            }
        }
    }
    Ok(Vec::new())
}

fn describe_storage<S: StateDB>(state: &S, changes: &StateChanges) -> VmResult<Vec<StateChange>> {
    let mut described = Vec::new();
    for ((address, key), new_value) in &changes.storage {
        let old_value = state.get_storage(address, key)?;
        if old_value != *new_value {
            described.push(StateChange::StorageChange {
                address: *address,
                key: *key,
                old_value,
                new_value: *new_value,
            });
        }
    }
    Ok(described)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorldState;
    use chain_core::PrivateKey;

    const ACCOUNT: &str = r#"
name = "Account"
kind = "account"
storage = ["public_key"]

[constructor]
inputs = ["public_key"]
body = [ { op = "write", var = "public_key", value = "public_key" } ]
"#;

    const VAULT: &str = r#"
name = "Vault"
storage = ["balance", "last_depositor", "opened_at"]

[constructor]
body = [ { op = "write", var = "opened_at", value = "timestamp" } ]

[[functions]]
name = "deposit"
inputs = ["amount"]
body = [
    { op = "assert_ne", lhs = "amount", rhs = 0, message = "Vault: zero deposit" },
    { op = "add", var = "balance", value = "amount" },
    { op = "write", var = "last_depositor", value = "caller" },
]

[[functions]]
name = "balance"
kind = "view"
outputs = ["res"]
body = [ { op = "return", values = ["balance"] } ]
"#;

    struct Fixture {
        state: WorldState,
        executor: TransactionExecutor,
        key: PrivateKey,
        account: Address,
        vault: Address,
    }

    fn setup() -> Fixture {
        let executor = TransactionExecutor::new();
        let mut state = WorldState::new();
        state.set_block_info(BlockInfo::new(1, 1_700_000_000));

        let key = PrivateKey::from_seed(3).unwrap();
        let (account, _) = executor
            .deploy(
                &mut state,
                ContractDefinition::compile(ACCOUNT).unwrap(),
                &[key.public_key().unwrap()],
            )
            .unwrap();
        let (vault, _) = executor
            .deploy(&mut state, ContractDefinition::compile(VAULT).unwrap(), &[])
            .unwrap();

        Fixture {
            state,
            executor,
            key,
            account,
            vault,
        }
    }

    fn signed(fx: &Fixture, selector: &str, calldata: Vec<Felt>, nonce: Nonce) -> InvokeTransaction {
        let mut tx = InvokeTransaction::new(fx.account, fx.vault, selector, calldata, nonce);
        tx.sign(fx.key.as_bytes()).unwrap();
        tx
    }

    #[test]
    fn test_deploy_runs_constructor() {
        let fx = setup();
        assert_ne!(fx.account, fx.vault);
        assert_eq!(fx.state.contract_count(), 2);

        let stored = fx
            .state
            .get_storage(&fx.account, &Felt::from_name("public_key"))
            .unwrap();
        assert_eq!(stored, fx.key.public_key().unwrap());

        let opened = fx
            .state
            .get_storage(&fx.vault, &Felt::from_name("opened_at"))
            .unwrap();
        assert_eq!(opened, Felt::from(1_700_000_000u64));
    }

    #[test]
    fn test_deploy_rejects_constructor_calldata() {
        let mut fx = setup();
        let source = "name = \"Plain\"";
        let err = fx
            .executor
            .deploy(
                &mut fx.state,
                ContractDefinition::compile(source).unwrap(),
                &[Felt::from(1u64)],
            )
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidCalldata { expected: 0, actual: 1, .. }));
    }

    #[test]
    fn test_execute_and_call() {
        let mut fx = setup();
        let tx = signed(&fx, "deposit", vec![Felt::from(40u64)], 0);

        let info = fx.executor.execute(&mut fx.state, &tx).unwrap();
        assert_eq!(info.transaction_hash, Some(tx.hash().unwrap()));
        assert!(info.state_changes.contains(&StateChange::NonceChange {
            address: fx.account,
            old_nonce: 0,
            new_nonce: 1,
        }));

        let depositor = fx
            .state
            .get_storage(&fx.vault, &Felt::from_name("last_depositor"))
            .unwrap();
        assert_eq!(depositor, Felt::from(fx.account));

        let call = fx
            .executor
            .call(&fx.state, &fx.vault, "balance", &[])
            .unwrap();
        assert_eq!(call.output("res"), Some(Felt::from(40u64)));
        assert_eq!(fx.state.nonce(&fx.account).unwrap(), 1);
    }

    #[test]
    fn test_failed_execution_changes_nothing() {
        let mut fx = setup();
        let root = fx.state.state_root();
        let tx = signed(&fx, "deposit", vec![Felt::ZERO], 0);

        let err = fx.executor.execute(&mut fx.state, &tx).unwrap_err();
        assert_eq!(
            err,
            VmError::AssertionFailed {
                contract_address: fx.vault,
                selector: "deposit".to_string(),
                message: "Vault: zero deposit".to_string(),
            }
        );
        assert_eq!(fx.state.state_root(), root);
        assert_eq!(fx.state.nonce(&fx.account).unwrap(), 0);
    }

    #[test]
    fn test_nonce_and_signature_checks() {
        let mut fx = setup();

        let stale = signed(&fx, "deposit", vec![Felt::from(1u64)], 5);
        assert_eq!(
            fx.executor.execute(&mut fx.state, &stale).unwrap_err(),
            VmError::InvalidNonce {
                expected: 0,
                actual: 5
            }
        );

        let mut forged = InvokeTransaction::new(
            fx.account,
            fx.vault,
            "deposit",
            vec![Felt::from(1u64)],
            0,
        );
        forged
            .sign(PrivateKey::from_seed(4).unwrap().as_bytes())
            .unwrap();
        assert_eq!(
            fx.executor.execute(&mut fx.state, &forged).unwrap_err(),
            VmError::InvalidSignature(fx.account)
        );

        let unsigned = InvokeTransaction::new(fx.account, fx.vault, "deposit", vec![], 0);
        assert_eq!(
            fx.executor.execute(&mut fx.state, &unsigned).unwrap_err(),
            VmError::InvalidSignature(fx.account)
        );
    }

    #[test]
    fn test_sender_must_be_account() {
        let mut fx = setup();
        let mut tx = InvokeTransaction::new(fx.vault, fx.vault, "deposit", vec![Felt::from(1u64)], 0);
        tx.sign(fx.key.as_bytes()).unwrap();
        assert_eq!(
            fx.executor.execute(&mut fx.state, &tx).unwrap_err(),
            VmError::NotAnAccount(fx.vault)
        );
    }

    #[test]
    fn test_unknown_selector_and_calldata() {
        let mut fx = setup();
        let tx = signed(&fx, "withdraw", vec![], 0);
        assert!(matches!(
            fx.executor.execute(&mut fx.state, &tx).unwrap_err(),
            VmError::UnknownSelector { .. }
        ));

        let err = fx
            .executor
            .call(&fx.state, &fx.vault, "balance", &[Felt::from(1u64)])
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidCalldata { expected: 0, actual: 1, .. }));

        let missing = Address::new([9u8; 20]);
        assert_eq!(
            fx.executor.call(&fx.state, &missing, "balance", &[]).unwrap_err(),
            VmError::ContractNotFound(missing)
        );
    }

    #[test]
    fn test_add_overflow() {
        let mut fx = setup();
        let max = Felt::new([0xff; 32]);
        let first = signed(&fx, "deposit", vec![max], 0);
        fx.executor.execute(&mut fx.state, &first).unwrap();

        let second = signed(&fx, "deposit", vec![Felt::from(1u64)], 1);
        assert!(matches!(
            fx.executor.execute(&mut fx.state, &second).unwrap_err(),
            VmError::Overflow { .. }
        ));
    }
}
