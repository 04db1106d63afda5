//! Contract sources, compilation and ABI
//!
//! Contracts are written as TOML documents:
//!
//! ```toml
//! name = "Counter"
//! storage = ["count"]
//!
//! [[functions]]
//! name = "increment"
//! inputs = ["amount"]
//! body = [ { op = "add", var = "count", value = "amount" } ]
//!
//! [[functions]]
//! name = "get"
//! kind = "view"
//! outputs = ["res"]
//! body = [ { op = "return", values = ["count"] } ]
//! ```
//!
//! Compilation resolves every operand name and checks the body against the
//! declared storage, inputs and outputs. The compiled [`ContractDefinition`]
//! is plain data and is stored inside the world state.

use crate::{VmError, VmResult};
use chain_core::{Felt, Hash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Name of the storage variable account contracts keep their key in
pub const ACCOUNT_PUBLIC_KEY_VAR: &str = "public_key";

/// Selector reported for constructor executions
pub const CONSTRUCTOR_SELECTOR: &str = "constructor";

/// Contract flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Ordinary contract
    #[default]
    Standard,
    /// Account contract that can send invoke transactions
    Account,
}

/// Entry point flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointKind {
    /// May write storage
    #[default]
    External,
    /// Read-only
    View,
}

#[derive(Debug, Clone, Deserialize)]
struct ContractSource {
    name: String,
    #[serde(default)]
    kind: ContractKind,
    #[serde(default)]
    storage: Vec<String>,
    constructor: Option<FunctionSource>,
    #[serde(default)]
    functions: Vec<FunctionSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionSource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: EntryPointKind,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    body: Vec<InstructionSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum InstructionSource {
    AssertEq {
        lhs: OperandSource,
        rhs: OperandSource,
        #[serde(default)]
        message: Option<String>,
    },
    AssertNe {
        lhs: OperandSource,
        rhs: OperandSource,
        #[serde(default)]
        message: Option<String>,
    },
    Write {
        var: String,
        value: OperandSource,
    },
    Add {
        var: String,
        value: OperandSource,
    },
    Return {
        #[serde(default)]
        values: Vec<OperandSource>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OperandSource {
    Literal(u64),
    Name(String),
}

/// Resolved instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Const(Felt),
    /// Index into the calldata
    Arg(usize),
    /// Storage slot of the executing contract
    Storage(Felt),
    Caller,
    ContractAddress,
    Timestamp,
    BlockNumber,
}

/// Compiled instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    AssertEq {
        lhs: Operand,
        rhs: Operand,
        message: Option<String>,
    },
    AssertNe {
        lhs: Operand,
        rhs: Operand,
        message: Option<String>,
    },
    Write {
        slot: Felt,
        value: Operand,
    },
    Add {
        slot: Felt,
        value: Operand,
    },
    Return(Vec<Operand>),
}

/// Compiled function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    pub kind: EntryPointKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub body: Vec<Instruction>,
}

/// ABI entry describing one callable function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEntry {
    pub name: String,
    pub kind: EntryPointKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Contract interface description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abi {
    pub entries: Vec<AbiEntry>,
}

impl Abi {
    /// Look up an entry by selector name
    pub fn entry(&self, selector: &str) -> Option<&AbiEntry> {
        self.entries.iter().find(|entry| entry.name == selector)
    }
}

/// Compiled contract class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinition {
    pub name: String,
    pub kind: ContractKind,
    pub storage: Vec<String>,
    pub constructor: Option<EntryPoint>,
    pub entry_points: Vec<EntryPoint>,
}

impl ContractDefinition {
    /// Compile a contract from TOML source text
    pub fn compile(source: &str) -> VmResult<Self> {
        let parsed: ContractSource = toml::from_str(source).map_err(|e| VmError::Compilation {
            contract: "<source>".to_string(),
            reason: e.to_string(),
        })?;
        Compiler::new(&parsed).compile()
    }

    /// Compile a contract source file
    pub fn compile_file<P: AsRef<Path>>(path: P) -> VmResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| VmError::Compilation {
            contract: path.display().to_string(),
            reason: format!("failed to read source: {}", e),
        })?;
        let definition = Self::compile(&source).map_err(|err| match err {
            VmError::Compilation { reason, .. } => VmError::Compilation {
                contract: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        debug!(
            "Compiled {} from {} ({} entry points)",
            definition.name,
            path.display(),
            definition.entry_points.len()
        );
        Ok(definition)
    }

    /// Content hash identifying this class
    pub fn class_hash(&self) -> VmResult<Hash> {
        let encoded = bincode::serialize(self)?;
        Ok(Hash::new(*blake3::hash(&encoded).as_bytes()))
    }

    /// Interface description
    pub fn abi(&self) -> Abi {
        Abi {
            entries: self
                .entry_points
                .iter()
                .map(|ep| AbiEntry {
                    name: ep.name.clone(),
                    kind: ep.kind,
                    inputs: ep.inputs.clone(),
                    outputs: ep.outputs.clone(),
                })
                .collect(),
        }
    }

    /// Find a function by selector name
    pub fn entry_point(&self, selector: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == selector)
    }

    /// Whether this class can send transactions
    pub fn is_account(&self) -> bool {
        self.kind == ContractKind::Account
    }
}

struct Compiler<'a> {
    source: &'a ContractSource,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a ContractSource) -> Self {
        Self { source }
    }

    fn error(&self, reason: impl Into<String>) -> VmError {
        VmError::Compilation {
            contract: self.source.name.clone(),
            reason: reason.into(),
        }
    }

    fn compile(&self) -> VmResult<ContractDefinition> {
        let source = self.source;
        if source.name.trim().is_empty() {
            return Err(self.error("contract name must not be empty"));
        }

        let mut seen = HashSet::new();
        for var in &source.storage {
            if !seen.insert(var.as_str()) {
                return Err(self.error(format!("storage variable `{}` declared twice", var)));
            }
        }

        let constructor = source
            .constructor
            .as_ref()
            .map(|ctor| self.compile_function(ctor, CONSTRUCTOR_SELECTOR))
            .transpose()?;

        let mut names = HashSet::new();
        let mut entry_points = Vec::with_capacity(source.functions.len());
        for function in &source.functions {
            if function.name.is_empty() || function.name == CONSTRUCTOR_SELECTOR {
                return Err(self.error(format!("invalid function name `{}`", function.name)));
            }
            if !names.insert(function.name.as_str()) {
                return Err(self.error(format!("function `{}` defined twice", function.name)));
            }
            entry_points.push(self.compile_function(function, &function.name)?);
        }

        if source.kind == ContractKind::Account {
            if !source.storage.iter().any(|v| v == ACCOUNT_PUBLIC_KEY_VAR) {
                return Err(self.error(format!(
                    "account contracts must declare `{}` storage",
                    ACCOUNT_PUBLIC_KEY_VAR
                )));
            }
            if constructor.is_none() {
                return Err(self.error("account contracts must define a constructor"));
            }
        }

        Ok(ContractDefinition {
            name: source.name.clone(),
            kind: source.kind,
            storage: source.storage.clone(),
            constructor,
            entry_points,
        })
    }

    fn compile_function(&self, function: &FunctionSource, name: &str) -> VmResult<EntryPoint> {
        let mut inputs = HashSet::new();
        for input in &function.inputs {
            if !inputs.insert(input.as_str()) {
                return Err(self.error(format!("`{}`: input `{}` declared twice", name, input)));
            }
        }

        let mut body = Vec::with_capacity(function.body.len());
        for instruction in &function.body {
            body.push(self.compile_instruction(function, name, instruction)?);
        }

        if !function.outputs.is_empty() && !matches!(body.last(), Some(Instruction::Return(_))) {
            return Err(self.error(format!("`{}` declares outputs but does not return", name)));
        }

        Ok(EntryPoint {
            name: name.to_string(),
            kind: function.kind,
            inputs: function.inputs.clone(),
            outputs: function.outputs.clone(),
            body,
        })
    }

    fn compile_instruction(
        &self,
        function: &FunctionSource,
        name: &str,
        instruction: &InstructionSource,
    ) -> VmResult<Instruction> {
        let compiled = match instruction {
            InstructionSource::AssertEq { lhs, rhs, message } => Instruction::AssertEq {
                lhs: self.resolve(function, name, lhs)?,
                rhs: self.resolve(function, name, rhs)?,
                message: message.clone(),
            },
            InstructionSource::AssertNe { lhs, rhs, message } => Instruction::AssertNe {
                lhs: self.resolve(function, name, lhs)?,
                rhs: self.resolve(function, name, rhs)?,
                message: message.clone(),
            },
            InstructionSource::Write { var, value } => Instruction::Write {
                slot: self.writable_slot(function, name, var)?,
                value: self.resolve(function, name, value)?,
            },
            InstructionSource::Add { var, value } => Instruction::Add {
                slot: self.writable_slot(function, name, var)?,
                value: self.resolve(function, name, value)?,
            },
            InstructionSource::Return { values } => {
                if values.len() != function.outputs.len() {
                    return Err(self.error(format!(
                        "`{}` returns {} values but declares {} outputs",
                        name,
                        values.len(),
                        function.outputs.len()
                    )));
                }
                Instruction::Return(
                    values
                        .iter()
                        .map(|value| self.resolve(function, name, value))
                        .collect::<VmResult<_>>()?,
                )
            }
        };
        Ok(compiled)
    }

    fn writable_slot(&self, function: &FunctionSource, name: &str, var: &str) -> VmResult<Felt> {
        if function.kind == EntryPointKind::View {
            return Err(self.error(format!("view `{}` writes storage `{}`", name, var)));
        }
        if !self.source.storage.iter().any(|v| v == var) {
            return Err(self.error(format!("`{}` writes undeclared storage `{}`", name, var)));
        }
        Ok(Felt::from_name(var))
    }

    fn resolve(
        &self,
        function: &FunctionSource,
        name: &str,
        operand: &OperandSource,
    ) -> VmResult<Operand> {
        let ident = match operand {
            OperandSource::Literal(value) => return Ok(Operand::Const(Felt::from(*value))),
            OperandSource::Name(ident) => ident.as_str(),
        };
        let resolved = match ident {
            "caller" => Operand::Caller,
            "contract_address" => Operand::ContractAddress,
            "timestamp" => Operand::Timestamp,
            "block_number" => Operand::BlockNumber,
            _ => {
                if let Some(index) = function.inputs.iter().position(|i| i == ident) {
                    Operand::Arg(index)
                } else if self.source.storage.iter().any(|v| v == ident) {
                    Operand::Storage(Felt::from_name(ident))
                } else {
                    return Err(self.error(format!("`{}`: unknown name `{}`", name, ident)));
                }
            }
        };
        Ok(resolved)
    }
}
