//! Core types shared by the disassembler and the compiler.
//!
//! This module defines the word representation of a script image and the
//! tunable options that steer the disassembler's heuristics.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScriptError};

/// A 32-bit script word.
pub type Word = u32;

/// Size of a word in bytes. Addresses are byte offsets and always a multiple of this.
pub const WORD_SIZE: u32 = 4;

/// Maximum number of leading entrypoint slots a script can carry.
pub const MAX_ENTRYPOINTS: usize = 0x20;

/// Number of instructions examined when guessing whether words are code.
pub const PROBABLE_OP_LOOKAHEAD: usize = 3;

/// Certainty needed before a run of words is treated as code.
pub const PROBABLE_OP_THRESHOLD: i64 = 2;

/// Words searched for a string terminator before a string table is rejected.
pub const STRING_SENTINEL_SEARCH_WORDS: usize = 300;

/// Convert a little-endian byte image into words.
///
/// # Errors
///
/// Returns [`ScriptError::MisalignedImage`] if the length is not a multiple of 4.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<Word>> {
    if bytes.len() % WORD_SIZE as usize != 0 {
        return Err(ScriptError::MisalignedImage {
            length: bytes.len(),
        });
    }

    let mut words = vec![0; bytes.len() / WORD_SIZE as usize];
    LittleEndian::read_u32_into(bytes, &mut words);
    Ok(words)
}

/// Convert words back into a little-endian byte image.
pub fn bytes_from_words(words: &[Word]) -> Vec<u8> {
    let mut bytes = vec![0; words.len() * WORD_SIZE as usize];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

/// Options controlling the disassembler.
///
/// The heuristic constants were tuned against retail scripts; they are not
/// protocol guarantees and may be overridden per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassemblerOptions {
    /// Leading slots scanned for entrypoints
    pub max_entrypoints: usize,
    /// Instructions decoded by the "is this code?" lookahead
    pub probable_op_lookahead: usize,
    /// Certainty at which the lookahead accepts words as code
    pub probable_op_threshold: i64,
    /// Words searched for a terminator before accepting a string table
    pub string_sentinel_search_words: usize,
    /// Additional addresses probed after table overruns are corrected
    pub extra_branches: Vec<u32>,
}

impl Default for DisassemblerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DisassemblerOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            max_entrypoints: MAX_ENTRYPOINTS,
            probable_op_lookahead: PROBABLE_OP_LOOKAHEAD,
            probable_op_threshold: PROBABLE_OP_THRESHOLD,
            string_sentinel_search_words: STRING_SENTINEL_SEARCH_WORDS,
            extra_branches: Vec::new(),
        }
    }

    /// Create options that are slower to accept data as code.
    pub fn thorough() -> Self {
        Self {
            probable_op_lookahead: 5,
            probable_op_threshold: 3,
            string_sentinel_search_words: 1024,
            ..Self::new()
        }
    }

    /// Create options with a shallower lookahead.
    pub fn fast() -> Self {
        Self {
            probable_op_lookahead: 2,
            probable_op_threshold: 2,
            string_sentinel_search_words: 128,
            ..Self::new()
        }
    }

    /// Add an address to probe after the main exploration.
    pub fn with_extra_branch(mut self, address: u32) -> Self {
        self.extra_branches.push(address);
        self
    }
}
