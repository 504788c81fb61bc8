//! Error and diagnostic types for script disassembly and compilation.
//!
//! Hard failures (conditions that make the output meaningless) surface as
//! [`ScriptError`]. Everything the disassembler can recover from locally is
//! recorded as a [`Diagnostic`] on the resulting script instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Primary error type for script processing.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The image length is not a whole number of words.
    #[error("Script image of {length} bytes is not a multiple of 4")]
    MisalignedImage {
        /// Image length in bytes
        length: usize,
    },

    /// A branch table probe found no acceptable entries.
    #[error("Empty table at 0x{address:x}")]
    EmptyTable {
        /// Byte address
        address: u32,
    },

    /// A pointer table with no labels reached the compiler.
    #[error("Empty pointer table at 0x{address:x}")]
    EmptyPointerTable {
        /// Byte address
        address: u32,
    },

    /// A string entry with no code points and no terminator.
    #[error("Empty string at 0x{address:x}")]
    EmptyString {
        /// Byte address
        address: u32,
    },

    /// A referenced label has no destination.
    #[error("Couldn't find label destination {label}")]
    MissingLabel {
        /// Label name
        label: String,
    },

    /// A slot was never classified.
    #[error("Unset entry at 0x{address:x}")]
    UnsetEntry {
        /// Byte address
        address: u32,
    },

    /// A continuation slot without a preceding owner.
    #[error("Orphaned continuation slot at 0x{address:x}")]
    OrphanedSlot {
        /// Byte address
        address: u32,
    },

    /// An entry spills past the end of the image.
    #[error("Entry at 0x{address:x} needs {width} words but the script ends first")]
    EntryOverrun {
        /// Byte address
        address: u32,
        /// Width in words
        width: usize,
    },

    /// A `call` names a method the metadata does not describe.
    #[error("Unknown call {index} at 0x{address:x}")]
    UnknownCall {
        /// Method index from the header
        index: u16,
        /// Byte address
        address: u32,
    },

    /// An operand mode that is known to exist but has no encoding rule.
    #[error("Param type 0x{tag:x} not yet supported")]
    UnsupportedMode {
        /// Mode tag
        tag: u8,
    },

    /// Text containing a character the game font cannot encode.
    #[error("Illegal char {character:?}")]
    IllegalCharacter {
        /// Offending character
        character: char,
    },

    /// Malformed call metadata.
    #[error("Invalid metadata: {message}")]
    InvalidMeta {
        /// What was wrong
        message: String,
    },
}

/// Result type alias for script operations.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// A recoverable problem found while disassembling.
///
/// Diagnostics never abort a disassembly; each one truncates or skips a
/// single exploration path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Address the diagnostic refers to.
    pub address: u32,
    /// What went wrong.
    pub kind: DiagnosticKind,
}

/// Classification of recoverable disassembly problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The header word does not decode to a valid instruction.
    InvalidHeader {
        /// Header word as read
        word: u32,
    },
    /// An operand uses an addressing mode with no decoding rule.
    UnsupportedMode {
        /// Mode tag
        tag: u8,
    },
    /// The operands run past the end of the image.
    TruncatedInstruction,
    /// Decoding would overwrite a slot already claimed by another entry.
    OverlappingCode,
    /// A control transfer depends on a value only known at runtime.
    UnknowableOperand {
        /// Mnemonic of the transfer
        opcode: String,
    },
    /// An inline pointer resolves outside the image and was zeroed.
    PointerOutOfRange {
        /// Resolved byte address
        destination: i64,
    },
    /// A branch target lies outside the image or is misaligned.
    InvalidBranchTarget {
        /// Resolved byte address
        destination: u32,
    },
    /// Call metadata and the encoded operand count disagree.
    CallArityMismatch {
        /// Parameters the metadata declares
        expected: usize,
        /// Operands encoded
        actual: usize,
    },
    /// A pointer table collided with other entries and was shortened.
    TableOverrun {
        /// Entries kept
        kept: usize,
        /// Entries dropped
        dropped: usize,
    },
    /// A data pointer table had no plausible entries.
    EmptyDataTable,
    /// A string could not be laid over the image without losing bits.
    StringSkipped,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::InvalidHeader { word } => {
                write!(f, "invalid instruction header 0x{word:08x}")
            }
            DiagnosticKind::UnsupportedMode { tag } => {
                write!(f, "param type 0x{tag:x} not yet supported")
            }
            DiagnosticKind::TruncatedInstruction => {
                write!(f, "instruction operands run past the end of the script")
            }
            DiagnosticKind::OverlappingCode => {
                write!(f, "instruction overlaps an entry decoded earlier")
            }
            DiagnosticKind::UnknowableOperand { opcode } => {
                write!(f, "skipping {opcode} due to unknowable parameter")
            }
            DiagnosticKind::PointerOutOfRange { destination } => write!(
                f,
                "pointer destination 0x{destination:x} is past the end of the script, replacing with 0"
            ),
            DiagnosticKind::InvalidBranchTarget { destination } => {
                write!(f, "branch target 0x{destination:x} is not a valid address")
            }
            DiagnosticKind::CallArityMismatch { expected, actual } => {
                write!(f, "call has wrong number of args ({actual}/{expected})")
            }
            DiagnosticKind::TableOverrun { kept, dropped } => {
                write!(f, "table overrun, kept {kept} entries and dropped {dropped}")
            }
            DiagnosticKind::EmptyDataTable => write!(f, "data pointer table has no entries"),
            DiagnosticKind::StringSkipped => {
                write!(f, "string does not end on a word boundary")
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}: {}", self.address, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScriptError::EmptyTable { address: 0x1f4 };
        assert_eq!(err.to_string(), "Empty table at 0x1f4");
    }

    #[test]
    fn test_missing_label() {
        let err = ScriptError::MissingLabel {
            label: "LABEL_7".to_string(),
        };
        assert!(err.to_string().contains("LABEL_7"));
    }

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic {
            address: 0x40,
            kind: DiagnosticKind::UnknowableOperand {
                opcode: "jmp".to_string(),
            },
        };
        assert_eq!(
            diagnostic.to_string(),
            "0x40: skipping jmp due to unknowable parameter"
        );
    }
}
