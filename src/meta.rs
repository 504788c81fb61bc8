//! Call metadata.
//!
//! The `call` opcode's header parameter indexes a table of native methods.
//! The disassembler only needs two facts per parameter: whether it names a
//! branch (and of which kind) and whether it points at a packed string.
//! Names, descriptions and enum tables are carried for the listing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use crate::error::{Result, ScriptError};

/// What a call parameter does with control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum BranchKind {
    /// Plain value
    #[default]
    None,
    /// Jump target
    Jump,
    /// Subroutine entry
    Subroutine,
    /// Reentry point for a forked thread
    Reentry,
    /// Subroutine entered with `gosub` semantics
    Gosub,
}

impl BranchKind {
    /// Name as written in metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            BranchKind::None => "none",
            BranchKind::Jump => "jump",
            BranchKind::Subroutine => "subroutine",
            BranchKind::Reentry => "reentry",
            BranchKind::Gosub => "gosub",
        }
    }
}

impl TryFrom<String> for BranchKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(BranchKind::None),
            "jump" => Ok(BranchKind::Jump),
            "subroutine" => Ok(BranchKind::Subroutine),
            "reentry" => Ok(BranchKind::Reentry),
            "gosub" => Ok(BranchKind::Gosub),
            other => Err(format!("unknown branch kind '{other}'")),
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter of a native method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptParam {
    /// `in`, `out` or `both`
    pub direction: String,
    /// Semantic type, e.g. `int`, `bool`, `string`, or an enum name
    #[serde(rename = "type")]
    pub kind: String,
    /// Parameter name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Control flow through this parameter
    #[serde(default)]
    pub branch: BranchKind,
}

impl ScriptParam {
    /// Whether the parameter points at a packed string.
    pub fn is_string(&self) -> bool {
        self.kind.eq_ignore_ascii_case("string")
    }
}

/// A native method callable through the `call` opcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMethod {
    /// Qualified method name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Parameters in operand order
    #[serde(default)]
    pub params: Vec<ScriptParam>,
}

/// Call metadata for one game version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Methods in call-index order
    #[serde(default)]
    pub methods: Vec<ScriptMethod>,
    /// Enum tables referenced by parameter types
    #[serde(default)]
    pub enums: BTreeMap<String, Vec<String>>,
}

impl Meta {
    /// Empty metadata; every `call` is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse metadata from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let meta: Meta = serde_json::from_str(json)?;
        meta.validate()?;
        Ok(meta)
    }

    /// Parse metadata from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let meta: Meta = serde_json::from_reader(reader)?;
        meta.validate()?;
        Ok(meta)
    }

    fn validate(&self) -> Result<()> {
        for (index, method) in self.methods.iter().enumerate() {
            if method.name.is_empty() {
                return Err(ScriptError::InvalidMeta {
                    message: format!("method {index} has no name"),
                });
            }
        }
        Ok(())
    }

    /// Method at a call index.
    pub fn method(&self, index: u16) -> Option<&ScriptMethod> {
        self.methods.get(usize::from(index))
    }

    /// Call index of a method name.
    pub fn method_index(&self, name: &str) -> Option<u16> {
        self.methods
            .iter()
            .position(|method| method.name == name)
            .and_then(|index| u16::try_from(index).ok())
    }

    /// Symbolic value of an enum-typed parameter.
    pub fn enum_value(&self, enum_name: &str, value: u32) -> Option<&str> {
        self.enums
            .get(enum_name)
            .and_then(|values| values.get(value as usize))
            .map(String::as_str)
    }
}
