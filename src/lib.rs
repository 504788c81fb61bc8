//! LoD Script - Event Script Disassembler and Compiler
//!
//! This library recovers a tagged, editable model from Legend of Dragoon
//! event-script bytecode and compiles that model back to a bit-identical
//! image.
//!
//! # Features
//!
//! - **Control-flow recovery**: Follows jumps, calls, forks and branch tables from the entrypoint header
//! - **Table heuristics**: Guesses pointer table extents and shortens them when they collide with code
//! - **String recovery**: Decodes game text referenced by call parameters
//! - **Lossless round trip**: `compile(disassemble(image)) == image` for every image
//! - **Listings**: Renders labelled assembly text with call metadata commentary
//!
//! # Quick Start
//!
//! ```rust
//! use lod_script::{compile, disassemble, Meta};
//!
//! // entrypoint -> 4; mov 0x5, stor[2]; return
//! let words: [u32; 5] = [0x4, 0x0208, 0x5, 0x0200_0002, 0x49];
//! let image: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
//!
//! let meta = Meta::new();
//! let script = disassemble(&image, &meta)?;
//! assert_eq!(script.instructions().count(), 2);
//! assert_eq!(compile(&script)?, image);
//! # Ok::<(), lod_script::ScriptError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(feature = "batch")]
pub mod batch;
pub mod charset;
pub mod compiler;
pub mod disassembler;
pub mod error;
pub mod formatter;
pub mod heuristics;
pub mod isa;
pub mod labels;
pub mod meta;
pub mod script;
pub mod types;

pub use disassembler::{Disassembler, DisassemblyStats};
pub use error::{Diagnostic, DiagnosticKind, Result, ScriptError};
pub use formatter::{JsonFormatter, ListingFormatter, ScriptFormatter, SummaryFormatter};
pub use isa::{AddressingMode, Opcode};
pub use labels::LabelTable;
pub use meta::{BranchKind, Meta, ScriptMethod, ScriptParam};
pub use script::{AddressFlags, EncodedString, Entry, Instruction, Operand, PointerTable, Script};
pub use types::{DisassemblerOptions, Word};

use std::path::Path;

/// Disassemble a little-endian script image.
///
/// # Errors
///
/// Fails when the image is not word aligned, when a branch table has no
/// acceptable entries, or when a `call` index is missing from `meta`.
pub fn disassemble(bytes: &[u8], meta: &Meta) -> Result<Script> {
    disassemble_with_options(bytes, meta, DisassemblerOptions::default())
}

/// Disassemble with custom options.
///
/// # Example
///
/// ```rust
/// use lod_script::{disassemble_with_options, DisassemblerOptions, Meta};
///
/// let options = DisassemblerOptions::thorough().with_extra_branch(0x40);
/// // let script = disassemble_with_options(&image, &Meta::new(), options)?;
/// ```
pub fn disassemble_with_options(
    bytes: &[u8],
    meta: &Meta,
    options: DisassemblerOptions,
) -> Result<Script> {
    Disassembler::with_options(meta, options).disassemble(bytes)
}

/// Read and disassemble a script file.
pub fn disassemble_file<P: AsRef<Path>>(path: P, meta: &Meta) -> Result<Script> {
    let data = std::fs::read(path)?;
    disassemble(&data, meta)
}

/// Compile a script model back to a little-endian image.
///
/// # Errors
///
/// Fails on structurally invalid models; see [`compiler::compile`].
pub fn compile(script: &Script) -> Result<Vec<u8>> {
    compiler::compile_to_bytes(script)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
