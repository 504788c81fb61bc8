//! Tagged memory model.
//!
//! A [`Script`] holds one [`Entry`] per word of the image. Multi-word
//! entries occupy their first slot with the entry itself and mark the rest
//! as continuations pointing back at it, so every slot is classified
//! exactly once.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Diagnostic;
use crate::isa::{AddressingMode, Opcode};
use crate::labels::LabelTable;
use crate::types::{Word, WORD_SIZE};

/// Packed string terminator.
pub const STRING_SENTINEL: u16 = 0xa0ff;

/// Leading slot naming an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Address of the slot
    pub address: u32,
    /// Label of the entry point
    pub destination: String,
}

/// One logical operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Address of the operand's first word
    pub address: u32,
    /// Encoding of the operand
    pub mode: AddressingMode,
    /// Encoded words, verbatim
    pub raw_words: Vec<Word>,
    /// Statically known value or address
    pub resolved: Option<u32>,
    /// Label minted at the resolved address of an inline operand
    pub label: Option<String>,
}

impl Operand {
    /// Width in words.
    pub fn width(&self) -> usize {
        self.raw_words.len()
    }

    /// A zero immediate at `address` occupying the same words as
    /// `raw_words`. Only the first word is cleared.
    pub fn zeroed(address: u32, mut raw_words: Vec<Word>) -> Self {
        if let Some(first) = raw_words.first_mut() {
            *first = 0;
        }
        Self {
            address,
            mode: AddressingMode::Immediate,
            raw_words,
            resolved: Some(0),
            label: None,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Address of the header word
    pub address: u32,
    /// Decoded opcode
    pub opcode: Opcode,
    /// Parameter packed into the header (call index, comparison operator)
    pub header_param: u16,
    /// Operands in encoding order
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Header plus operand words.
    pub fn width(&self) -> usize {
        1 + self.operands.iter().map(Operand::width).sum::<usize>()
    }
}

/// A run of relative offsets, one label per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerTable {
    /// Table base; entries are relative to it
    pub address: u32,
    /// One destination label per entry
    pub labels: Vec<String>,
}

/// Packed 16-bit character codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedString {
    /// Address of the first code point
    pub address: u32,
    /// Code points, sentinel excluded
    pub chars: Vec<u16>,
    /// Whether the sentinel follows the last code point
    pub terminated: bool,
}

impl EncodedString {
    /// Code points as stored, including the sentinel.
    pub fn stored_len(&self) -> usize {
        self.chars.len() + usize::from(self.terminated)
    }

    /// Width in words; two code points per word.
    pub fn width(&self) -> usize {
        (self.stored_len() + 1) / 2
    }
}

/// Classification of one word slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    /// Not yet classified
    Unset,
    /// Entry point slot at the head of the image
    Entrypoint(Entrypoint),
    /// Instruction header
    Instruction(Instruction),
    /// Slot holding (part of) operand `index` of the instruction at `instruction`
    OperandSlot {
        /// Header address of the owning instruction
        instruction: u32,
        /// Operand index
        index: usize,
    },
    /// First slot of a table of relative offsets
    PointerTable(PointerTable),
    /// First slot of a packed string
    EncodedString(EncodedString),
    /// Tail slot of the table or string starting at `head`
    Continuation {
        /// Address of the owning entry
        head: u32,
    },
    /// Unclassified word, emitted verbatim
    RawData {
        /// Byte address
        address: u32,
        /// Word as read
        value: Word,
    },
}

impl Entry {
    /// Width in words for entries that begin a run, `None` for continuations.
    pub fn width(&self) -> Option<usize> {
        match self {
            Entry::Unset | Entry::Entrypoint(_) | Entry::RawData { .. } => Some(1),
            Entry::Instruction(instruction) => Some(instruction.width()),
            Entry::PointerTable(table) => Some(table.labels.len()),
            Entry::EncodedString(string) => Some(string.width()),
            Entry::OperandSlot { .. } | Entry::Continuation { .. } => None,
        }
    }

    /// Whether nothing has claimed this slot yet.
    pub fn is_unset(&self) -> bool {
        matches!(self, Entry::Unset)
    }
}

bitflags! {
    /// Exploration classes an address belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AddressFlags: u8 {
        /// Probed as code
        const BRANCH = 0b0000_0001;
        /// Reached by `gosub` or a subroutine call
        const SUBROUTINE = 0b0000_0010;
        /// Reached by `fork` or a reentry call
        const REENTRY = 0b0000_0100;
        /// Head of a branch table
        const TABLE = 0b0000_1000;
        /// Named by a jump table entry
        const JUMP_TABLE_DESTINATION = 0b0001_0000;
        /// Named by an entry point slot
        const ENTRYPOINT = 0b0010_0000;
    }
}

/// A disassembled script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// One entry per word
    pub entries: Vec<Entry>,
    /// Names for every referenced address
    pub labels: LabelTable,
    /// Destinations named by the entrypoint slots, in slot order
    pub entrypoints: Vec<u32>,
    /// Addresses probed as code
    pub branches: BTreeSet<u32>,
    /// Targets of `gosub`, `gosub_table` and subroutine calls
    pub subroutines: BTreeSet<u32>,
    /// Targets of `fork` and reentry calls
    pub reentry_points: BTreeSet<u32>,
    /// Heads of branch tables
    pub table_addresses: BTreeSet<u32>,
    /// Destinations named by `jmp_table` entries
    pub jump_table_destinations: BTreeSet<u32>,
    /// Recoverable problems found while disassembling
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl Script {
    /// An all-unset script of `word_count` slots.
    pub fn new(word_count: usize) -> Self {
        Self {
            entries: vec![Entry::Unset; word_count],
            ..Self::default()
        }
    }

    /// Length in words.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the script has no words.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length in bytes.
    pub fn byte_len(&self) -> u32 {
        self.entries.len() as u32 * WORD_SIZE
    }

    /// Entry at a byte address.
    pub fn entry_at(&self, address: u32) -> Option<&Entry> {
        if address % WORD_SIZE != 0 {
            return None;
        }
        self.entries.get((address / WORD_SIZE) as usize)
    }

    pub(crate) fn set(&mut self, address: u32, entry: Entry) {
        if let Some(slot) = self.entries.get_mut((address / WORD_SIZE) as usize) {
            *slot = entry;
        }
    }

    /// Whether the slot at `address` is still unclassified.
    pub fn is_unset(&self, address: u32) -> bool {
        matches!(self.entry_at(address), Some(Entry::Unset))
    }

    /// Address of the entry that owns the slot at `address`.
    pub fn head_of(&self, address: u32) -> Option<u32> {
        match self.entry_at(address)? {
            Entry::OperandSlot { instruction, .. } => Some(*instruction),
            Entry::Continuation { head } => Some(*head),
            _ => Some(address),
        }
    }

    /// Entries that begin a run, with their addresses.
    pub fn heads(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.width().is_some())
            .map(|(index, entry)| (index as u32 * WORD_SIZE, entry))
    }

    /// Decoded instructions in address order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Instruction(instruction) => Some(instruction),
            _ => None,
        })
    }

    /// Instruction owning the slot at `address`, if any.
    pub fn instruction_at(&self, address: u32) -> Option<&Instruction> {
        match self.entry_at(self.head_of(address)?)? {
            Entry::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// Exploration classes of `address`.
    pub fn flags_at(&self, address: u32) -> AddressFlags {
        let mut flags = AddressFlags::empty();
        flags.set(AddressFlags::BRANCH, self.branches.contains(&address));
        flags.set(AddressFlags::SUBROUTINE, self.subroutines.contains(&address));
        flags.set(AddressFlags::REENTRY, self.reentry_points.contains(&address));
        flags.set(AddressFlags::TABLE, self.table_addresses.contains(&address));
        flags.set(
            AddressFlags::JUMP_TABLE_DESTINATION,
            self.jump_table_destinations.contains(&address),
        );
        flags.set(
            AddressFlags::ENTRYPOINT,
            self.entrypoints.contains(&address),
        );
        flags
    }

    /// Serialize the model as pretty-printed JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a model previously written by [`Script::to_json`].
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
