//! Inverse serializer: tagged model back to words.
//!
//! The compiler is a direct fold over the entries of a [`Script`]. It
//! resolves labels and packs strings but performs no analysis, so the
//! round-trip law `compile(disassemble(image)) == image` rests entirely on
//! the disassembler producing a faithful model.

use tracing::debug;

use crate::error::{Result, ScriptError};
use crate::isa::encode_header;
use crate::labels::LabelTable;
use crate::script::{EncodedString, Entry, Instruction, PointerTable, Script, STRING_SENTINEL};
use crate::types::{bytes_from_words, Word, WORD_SIZE};

/// Compile a script into words.
///
/// # Errors
///
/// Fails on unclassified or orphaned slots, entries running past the end
/// of the script, empty pointer tables, unsupported operand modes and
/// labels with no destination.
pub fn compile(script: &Script) -> Result<Vec<Word>> {
    let len = script.entries.len();
    let mut words = Vec::with_capacity(len);
    let mut index = 0;

    while index < len {
        let address = index as u32 * WORD_SIZE;
        let entry = &script.entries[index];

        let width = match entry.width() {
            Some(width) => width,
            None => return Err(ScriptError::OrphanedSlot { address }),
        };
        if index + width > len {
            return Err(ScriptError::EntryOverrun { address, width });
        }
        if width == 0 {
            return Err(match entry {
                Entry::PointerTable(_) => ScriptError::EmptyPointerTable { address },
                _ => ScriptError::EmptyString { address },
            });
        }

        match entry {
            Entry::Unset => return Err(ScriptError::UnsetEntry { address }),
            Entry::Entrypoint(entrypoint) => {
                words.push(label_address(&script.labels, &entrypoint.destination)?);
            }
            Entry::RawData { value, .. } => words.push(*value),
            Entry::EncodedString(string) => pack_string(string, &mut words),
            Entry::PointerTable(table) => compile_table(&script.labels, address, table, &mut words)?,
            Entry::Instruction(instruction) => compile_instruction(instruction, &mut words)?,
            Entry::OperandSlot { .. } | Entry::Continuation { .. } => {
                return Err(ScriptError::OrphanedSlot { address })
            }
        }

        index += width;
    }

    debug!("Compiled {} words", words.len());
    Ok(words)
}

/// Compile a script into a little-endian byte image.
pub fn compile_to_bytes(script: &Script) -> Result<Vec<u8>> {
    Ok(bytes_from_words(&compile(script)?))
}

fn label_address(labels: &LabelTable, name: &str) -> Result<Word> {
    labels
        .address_of(name)
        .ok_or_else(|| ScriptError::MissingLabel {
            label: name.to_string(),
        })
}

/// Two code points per word, low half first.
fn pack_string(string: &EncodedString, words: &mut Vec<Word>) {
    let mut chars = string.chars.clone();
    if string.terminated {
        chars.push(STRING_SENTINEL);
    }

    for pair in chars.chunks(2) {
        let low = u32::from(pair[0]);
        let high = pair.get(1).map_or(0, |chr| u32::from(*chr));
        words.push(low | high << 16);
    }
}

fn compile_table(
    labels: &LabelTable,
    address: u32,
    table: &PointerTable,
    words: &mut Vec<Word>,
) -> Result<()> {
    if table.labels.is_empty() {
        return Err(ScriptError::EmptyPointerTable { address });
    }

    for label in &table.labels {
        let destination = label_address(labels, label)?;
        let offset = (i64::from(destination) - i64::from(address)) / i64::from(WORD_SIZE);
        words.push(offset as i32 as u32);
    }
    Ok(())
}

fn compile_instruction(instruction: &Instruction, words: &mut Vec<Word>) -> Result<()> {
    words.push(encode_header(
        instruction.opcode.code(),
        instruction.operands.len(),
        instruction.header_param,
    ));

    for operand in &instruction.operands {
        if !operand.mode.is_supported() {
            return Err(ScriptError::UnsupportedMode {
                tag: operand.mode.tag(),
            });
        }
        words.extend_from_slice(&operand.raw_words);
    }
    Ok(())
}
