//! Interface description document: parsing, validation and argument encoding.

use std::{fmt, fs, path::Path};

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::InterfaceLoadError;
use crate::wire::Address;

/// Major.minor accepted; any patch level.
pub const SUPPORTED_VERSION: &str = "0.1";

/// Description shipped with the crate.
pub const BUNDLED: &str = include_str!("../../idl/gaspass.json");

pub const INITIALIZE: &str = "initialize";
pub const TOPUP: &str = "topup";
pub const SUBMIT_TX: &str = "submitTx";
pub const WITHDRAW: &str = "withdraw";
pub const STATE_ACCOUNT: &str = "GasPassInfo";

pub const ROLE_GAS_PASS: &str = "gasPass";
pub const ROLE_AUTHORITY: &str = "authority";
pub const ROLE_PAYER: &str = "payer";
pub const ROLE_EXECUTOR: &str = "executor";
pub const ROLE_RENT: &str = "rent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Bool,
    U8,
    U64,
    Bytes,
    PublicKey,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::Bool => "bool",
            FieldType::U8 => "u8",
            FieldType::U64 => "u64",
            FieldType::Bytes => "bytes",
            FieldType::PublicKey => "publicKey",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdlAccountItem {
    pub name: String,
    #[serde(default)]
    pub is_mut: bool,
    #[serde(default)]
    pub is_signer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    pub discriminant: u8,
    #[serde(default)]
    pub accounts: Vec<IdlAccountItem>,
    #[serde(default)]
    pub args: Vec<IdlField>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlAccountType {
    pub name: String,
    pub fields: Vec<IdlField>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdlMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IdlMetadata>,
    pub instructions: Vec<IdlInstruction>,
    #[serde(default)]
    pub accounts: Vec<IdlAccountType>,
}

/// Shape the GAS PASS program reads: positional accounts and borsh args.
struct ExpectedInstruction {
    name: &'static str,
    discriminant: u8,
    accounts: &'static [ExpectedAccount],
    args: &'static [FieldType],
}

/// `(role, is_mut, is_signer)` as the program checks them.
struct ExpectedAccount(&'static str, bool, bool);

impl ExpectedAccount {
    fn matches(&self, item: &IdlAccountItem) -> bool {
        item.name == self.0 && item.is_mut == self.1 && item.is_signer == self.2
    }
}

impl fmt::Display for ExpectedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_account(f, self.0, self.1, self.2)
    }
}

impl fmt::Display for IdlAccountItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_account(f, &self.name, self.is_mut, self.is_signer)
    }
}

fn write_account(f: &mut fmt::Formatter<'_>, role: &str, is_mut: bool, is_signer: bool) -> fmt::Result {
    f.write_str(role)?;
    match (is_mut, is_signer) {
        (true, true) => f.write_str(" (s, w)"),
        (true, false) => f.write_str(" (w)"),
        (false, true) => f.write_str(" (s)"),
        (false, false) => Ok(()),
    }
}

const EXPECTED_INSTRUCTIONS: [ExpectedInstruction; 4] = [
    ExpectedInstruction {
        name: INITIALIZE,
        discriminant: 0,
        accounts: &[
            ExpectedAccount(ROLE_GAS_PASS, true, false),
            ExpectedAccount(ROLE_AUTHORITY, false, true),
            ExpectedAccount(ROLE_RENT, false, false),
        ],
        args: &[FieldType::U8],
    },
    ExpectedInstruction {
        name: TOPUP,
        discriminant: 1,
        accounts: &[
            ExpectedAccount(ROLE_GAS_PASS, true, false),
            ExpectedAccount(ROLE_AUTHORITY, false, true),
            ExpectedAccount(ROLE_PAYER, true, false),
        ],
        args: &[FieldType::U64],
    },
    ExpectedInstruction {
        name: SUBMIT_TX,
        discriminant: 2,
        accounts: &[
            ExpectedAccount(ROLE_GAS_PASS, true, false),
            ExpectedAccount(ROLE_EXECUTOR, true, false),
        ],
        args: &[FieldType::Bytes],
    },
    ExpectedInstruction {
        name: WITHDRAW,
        discriminant: 3,
        accounts: &[
            ExpectedAccount(ROLE_GAS_PASS, true, false),
            ExpectedAccount(ROLE_AUTHORITY, true, true),
        ],
        args: &[FieldType::U64],
    },
];

const EXPECTED_STATE: [FieldType; 4] = [
    FieldType::Bool,
    FieldType::PublicKey,
    FieldType::U8,
    FieldType::U64,
];

impl InterfaceDescription {
    pub fn parse(text: &str) -> Result<Self, InterfaceLoadError> {
        if text.trim().is_empty() {
            return Err(InterfaceLoadError::Missing("document is empty".into()));
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn read(path: &Path) -> Result<Self, InterfaceLoadError> {
        let text = fs::read_to_string(path)
            .map_err(|e| InterfaceLoadError::Missing(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn bundled() -> Result<Self, InterfaceLoadError> {
        Self::parse(BUNDLED)
    }

    /// Short sha256 of the canonical JSON form, for logs.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(&Sha256::digest(canonical)[..8])
    }

    pub fn instruction(&self, name: &str) -> Option<&IdlInstruction> {
        self.instructions.iter().find(|ix| ix.name == name)
    }

    pub fn validate(&self, program_id: &Address) -> Result<(), InterfaceLoadError> {
        let patch = self
            .version
            .strip_prefix(SUPPORTED_VERSION)
            .and_then(|rest| rest.strip_prefix('.'));
        if !patch.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(InterfaceLoadError::VersionMismatch {
                found: self.version.clone(),
                expected: SUPPORTED_VERSION,
            });
        }

        if let Some(declared) = self.metadata.as_ref().and_then(|m| m.address) {
            if declared != *program_id {
                return Err(InterfaceLoadError::ProgramMismatch {
                    declared,
                    expected: *program_id,
                });
            }
        }

        for expected in &EXPECTED_INSTRUCTIONS {
            let ix = self
                .instruction(expected.name)
                .ok_or(InterfaceLoadError::MissingInstruction(expected.name))?;
            let incompatible = |reason: String| InterfaceLoadError::IncompatibleInstruction {
                name: ix.name.clone(),
                reason,
            };
            if ix.discriminant != expected.discriminant {
                return Err(incompatible(format!(
                    "discriminant {} (program uses {})",
                    ix.discriminant, expected.discriminant
                )));
            }
            let arg_types: Vec<FieldType> = ix.args.iter().map(|a| a.ty).collect();
            if arg_types != expected.args {
                return Err(incompatible(format!(
                    "arguments {} (program takes {})",
                    type_list(&arg_types),
                    type_list(expected.args)
                )));
            }
            let accounts_match = ix.accounts.len() == expected.accounts.len()
                && expected.accounts.iter().zip(&ix.accounts).all(|(e, a)| e.matches(a));
            if !accounts_match {
                return Err(incompatible(format!(
                    "accounts [{}] (program reads [{}])",
                    join(&ix.accounts),
                    join(expected.accounts)
                )));
            }
        }

        let state = self
            .accounts
            .iter()
            .find(|a| a.name == STATE_ACCOUNT)
            .ok_or_else(|| InterfaceLoadError::IncompatibleAccount {
                name: STATE_ACCOUNT.into(),
                reason: "not declared".into(),
            })?;
        let field_types: Vec<FieldType> = state.fields.iter().map(|f| f.ty).collect();
        if field_types != EXPECTED_STATE {
            return Err(InterfaceLoadError::IncompatibleAccount {
                name: state.name.clone(),
                reason: format!(
                    "fields {} (program stores {})",
                    type_list(&field_types),
                    type_list(&EXPECTED_STATE)
                ),
            });
        }
        Ok(())
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn type_list(types: &[FieldType]) -> String {
    let names: Vec<String> = types.iter().map(ToString::to_string).collect();
    format!("({})", names.join(", "))
}

/// Typed instruction argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgValue {
    Bool(bool),
    U8(u8),
    U64(u64),
    Bytes(Vec<u8>),
    PublicKey(Address),
}

impl ArgValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            ArgValue::Bool(_) => FieldType::Bool,
            ArgValue::U8(_) => FieldType::U8,
            ArgValue::U64(_) => FieldType::U64,
            ArgValue::Bytes(_) => FieldType::Bytes,
            ArgValue::PublicKey(_) => FieldType::PublicKey,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            ArgValue::Bool(v) => BorshSerialize::serialize(v, out),
            ArgValue::U8(v) => BorshSerialize::serialize(v, out),
            ArgValue::U64(v) => BorshSerialize::serialize(v, out),
            ArgValue::Bytes(v) => BorshSerialize::serialize(v, out),
            ArgValue::PublicKey(v) => BorshSerialize::serialize(v, out),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("`{instruction}` takes {expected} arguments, got {found}")]
    Arity {
        instruction: String,
        expected: usize,
        found: usize,
    },
    #[error("argument `{name}` is {expected}, got {found}")]
    Type {
        name: String,
        expected: FieldType,
        found: FieldType,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IdlInstruction {
    /// Discriminant byte followed by the borsh encoding of each argument in order.
    pub fn encode(&self, args: &[ArgValue]) -> Result<Vec<u8>, EncodeError> {
        if args.len() != self.args.len() {
            return Err(EncodeError::Arity {
                instruction: self.name.clone(),
                expected: self.args.len(),
                found: args.len(),
            });
        }
        let mut out = vec![self.discriminant];
        for (field, value) in self.args.iter().zip(args) {
            if field.ty != value.field_type() {
                return Err(EncodeError::Type {
                    name: field.name.clone(),
                    expected: field.ty,
                    found: value.field_type(),
                });
            }
            value.encode_into(&mut out)?;
        }
        Ok(out)
    }
}
