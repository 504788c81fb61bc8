//! Addressing-mode (operand encoding) catalog.
//!
//! The top byte of an operand's first word selects how the operand is
//! interpreted. Inline modes point back into the script image relative to
//! the instruction header; table modes additionally index through a run of
//! relative offsets stored at that address.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{get_displacement, get_mode_tag, get_p2};
use crate::types::{Word, WORD_SIZE};

/// Operand addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// The operand word itself
    Immediate,
    /// The word following the operand word
    NextImmediate,
    /// `stor[p0]`
    Storage,
    /// `stor[stor[stor[p0], p1], p2]`
    OtherOtherStorage,
    /// `stor[stor[p0], p1 + stor[p2]]`
    OtherStorageOffset,
    /// `var[p0]`
    GameVar1,
    /// `var[p0 + stor[p1]]`
    GameVar2,
    /// `var[p0][stor[p1]]`
    GameVarArray1,
    /// `var[p0 + stor[p1]][stor[p2]]`
    GameVarArray2,
    /// `inl[header + disp]`
    Inline1,
    /// `inl[(header + disp)[stor[p2]]]`
    Inline2,
    /// `inl[T[T[stor[p2]]]]`, `T = header + disp`
    InlineTable1,
    /// `inl[T[T[stor[q0]] + stor[q1]]]`, indices in the second word
    InlineTable2,
    /// `stor[stor[p0], p1 + p2]`
    OtherStorage,
    /// `var[p0 + p1]`
    GameVar3,
    /// `var[p0][p1]`
    GameVarArray3,
    /// `var[p0 + stor[p1]][p2]`
    GameVarArray4,
    /// `var[p0 + p1][stor[p2]]`
    GameVarArray5,
    /// Encoding 0x12, never observed decoded
    Unsupported12,
    /// `inl[header + disp + p2]`
    Inline3,
    /// `inl[T + inl[T + p2]]`
    InlineTable3,
    /// Encoding 0x15, never observed decoded
    Unsupported15,
    /// Encoding 0x16, never observed decoded
    Unsupported16,
    /// `inl[T[T[q0] + q1]]`, indices in the second word
    InlineTable4,
    /// `reg[p0]`
    Register,
    /// `id[name]`, characters packed into trailing words
    Identifier,
}

impl AddressingMode {
    /// Every mode with its encoding tag.
    pub const ALL: &'static [(u8, AddressingMode)] = &[
        (0x00, AddressingMode::Immediate),
        (0x01, AddressingMode::NextImmediate),
        (0x02, AddressingMode::Storage),
        (0x03, AddressingMode::OtherOtherStorage),
        (0x04, AddressingMode::OtherStorageOffset),
        (0x05, AddressingMode::GameVar1),
        (0x06, AddressingMode::GameVar2),
        (0x07, AddressingMode::GameVarArray1),
        (0x08, AddressingMode::GameVarArray2),
        (0x09, AddressingMode::Inline1),
        (0x0a, AddressingMode::Inline2),
        (0x0b, AddressingMode::InlineTable1),
        (0x0c, AddressingMode::InlineTable2),
        (0x0d, AddressingMode::OtherStorage),
        (0x0e, AddressingMode::GameVar3),
        (0x0f, AddressingMode::GameVarArray3),
        (0x10, AddressingMode::GameVarArray4),
        (0x11, AddressingMode::GameVarArray5),
        (0x12, AddressingMode::Unsupported12),
        (0x13, AddressingMode::Inline3),
        (0x14, AddressingMode::InlineTable3),
        (0x15, AddressingMode::Unsupported15),
        (0x16, AddressingMode::Unsupported16),
        (0x17, AddressingMode::InlineTable4),
        (0x18, AddressingMode::Register),
        (0x19, AddressingMode::Identifier),
    ];

    /// Decode a mode tag. Unmapped tags are immediates: the VM reads any
    /// unrecognised encoding as a literal word.
    pub fn from_tag(tag: u8) -> Self {
        Self::ALL
            .iter()
            .find(|(t, _)| *t == tag)
            .map_or(AddressingMode::Immediate, |(_, mode)| *mode)
    }

    /// Decode the mode of an operand word.
    pub fn from_word(word: Word) -> Self {
        Self::from_tag(get_mode_tag(word))
    }

    /// Encoding tag.
    pub fn tag(self) -> u8 {
        Self::ALL
            .iter()
            .find(|(_, mode)| *mode == self)
            .map_or(0, |(tag, _)| *tag)
    }

    /// Whether the decoder knows how to interpret this mode.
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            AddressingMode::Unsupported12
                | AddressingMode::Unsupported15
                | AddressingMode::Unsupported16
        )
    }

    /// Whether the operand points into the script image.
    pub fn is_inline(self) -> bool {
        matches!(
            self,
            AddressingMode::Inline1
                | AddressingMode::Inline2
                | AddressingMode::Inline3
                | AddressingMode::InlineTable1
                | AddressingMode::InlineTable2
                | AddressingMode::InlineTable3
                | AddressingMode::InlineTable4
        )
    }

    /// Whether the operand indexes through a table of relative offsets.
    pub fn is_table(self) -> bool {
        matches!(
            self,
            AddressingMode::InlineTable1
                | AddressingMode::InlineTable2
                | AddressingMode::InlineTable3
                | AddressingMode::InlineTable4
        )
    }

    /// Width in words when it does not depend on the operand's contents.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            AddressingMode::NextImmediate
            | AddressingMode::InlineTable2
            | AddressingMode::InlineTable4 => Some(2),
            AddressingMode::Identifier => None,
            _ => Some(1),
        }
    }

    /// Width in words of an operand whose first word is `first`.
    pub fn width(self, first: Word) -> usize {
        match self.fixed_width() {
            Some(width) => width,
            None => identifier_width(get_p2(first) as usize),
        }
    }

    /// Width in words of an operand written as text, e.g. `id[npc:walk]`.
    pub fn width_of_text(self, operand: &str) -> usize {
        match self.fixed_width() {
            Some(width) => width,
            None => {
                let name = operand
                    .trim()
                    .strip_prefix("id[")
                    .and_then(|rest| rest.strip_suffix(']'))
                    .unwrap_or("")
                    .trim();
                identifier_width(name.len())
            }
        }
    }

    /// Statically resolve an operand.
    ///
    /// Immediates resolve to their value and inline modes to the byte address
    /// they point at; everything else is a runtime value and yields `None`.
    /// The displacement counts words, so it is scaled by 4. Inline results may
    /// be negative or past the image; callers range-check them.
    pub fn resolve(self, header_address: u32, words: &[Word]) -> Option<i64> {
        let first = *words.first()?;
        let base = i64::from(header_address);
        let displacement = i64::from(get_displacement(first));

        match self {
            AddressingMode::Immediate => Some(i64::from(first)),
            AddressingMode::NextImmediate => words.get(1).map(|w| i64::from(*w)),
            AddressingMode::Inline1
            | AddressingMode::Inline2
            | AddressingMode::InlineTable1
            | AddressingMode::InlineTable2
            | AddressingMode::InlineTable3
            | AddressingMode::InlineTable4 => Some(base + displacement * i64::from(WORD_SIZE)),
            AddressingMode::Inline3 => {
                Some(base + (displacement + i64::from(get_p2(first))) * i64::from(WORD_SIZE))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.tag())
    }
}

/// Width of an identifier operand: the descriptor word plus four characters per word.
pub fn identifier_width(char_count: usize) -> usize {
    1 + (char_count + 3) / 4
}

/// Second resolution step of a table mode: the destination named by the
/// table entry at `entry_address`, relative to the table base.
pub fn resolve_table_entry(table_address: u32, entry_word: Word) -> i64 {
    i64::from(table_address) + i64::from(entry_word as i32) * i64::from(WORD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for (tag, mode) in AddressingMode::ALL {
            assert_eq!(AddressingMode::from_tag(*tag), *mode);
            assert_eq!(mode.tag(), *tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_immediate() {
        assert_eq!(AddressingMode::from_tag(0x1a), AddressingMode::Immediate);
        assert_eq!(AddressingMode::from_word(0xffff_ffff), AddressingMode::Immediate);
    }

    #[test]
    fn test_widths() {
        assert_eq!(AddressingMode::Immediate.width(0), 1);
        assert_eq!(AddressingMode::NextImmediate.width(0x0100_0000), 2);
        assert_eq!(AddressingMode::InlineTable2.width(0x0c00_0000), 2);
        assert_eq!(AddressingMode::InlineTable3.width(0x1400_0000), 1);
    }

    #[test]
    fn test_identifier_width() {
        // 5 characters: descriptor + ceil(5 / 4) words
        let word = 0x1905_0000;
        assert_eq!(AddressingMode::from_word(word), AddressingMode::Identifier);
        assert_eq!(AddressingMode::Identifier.width(word), 1 + 2);
        assert_eq!(identifier_width(4), 2);
        assert_eq!(identifier_width(0), 1);
        assert_eq!(AddressingMode::Identifier.width_of_text("id[hello]"), 3);
        assert_eq!(AddressingMode::Storage.width_of_text("stor[3]"), 1);
    }

    #[test]
    fn test_inline_resolution_scales_words() {
        // Displacement of +4 words from a header at 0x40
        assert_eq!(
            AddressingMode::Inline1.resolve(0x40, &[0x0900_0004]),
            Some(0x50)
        );
        // Negative displacement
        assert_eq!(
            AddressingMode::Inline1.resolve(0x40, &[0x0900_fffe]),
            Some(0x38)
        );
        // Inline3 adds p2 to the displacement
        assert_eq!(
            AddressingMode::Inline3.resolve(0x40, &[0x1302_0001]),
            Some(0x4c)
        );
        // Two-word table modes keep the displacement in the first word
        assert_eq!(
            AddressingMode::InlineTable2.resolve(0x10, &[0x0c00_0003, 0x0000_0102]),
            Some(0x1c)
        );
    }

    #[test]
    fn test_runtime_modes_do_not_resolve() {
        assert_eq!(AddressingMode::Storage.resolve(0, &[0x0200_0002]), None);
        assert_eq!(AddressingMode::Register.resolve(0, &[0x1800_0001]), None);
        assert_eq!(AddressingMode::Immediate.resolve(0, &[5]), Some(5));
        assert_eq!(
            AddressingMode::NextImmediate.resolve(0, &[0x0100_0000, 9]),
            Some(9)
        );
    }

    #[test]
    fn test_table_entry_resolution() {
        assert_eq!(resolve_table_entry(0x100, 3), 0x10c);
        assert_eq!(resolve_table_entry(0x100, 0xffff_fffc), 0xf0);
    }

    #[test]
    fn test_unsupported() {
        assert!(!AddressingMode::from_tag(0x12).is_supported());
        assert!(!AddressingMode::from_tag(0x15).is_supported());
        assert!(AddressingMode::Identifier.is_supported());
    }
}
