//! Instruction-likelihood scoring.
//!
//! Code and data share one flat word array, so the disassembler has to
//! guess whether a run of words is more code or more table. These helpers
//! decode a few instructions ahead and score how plausible the result is.

use memchr::memmem;

use crate::isa::{self, AddressingMode};
use crate::script::{Entry, Script, STRING_SENTINEL};
use crate::types::{bytes_from_words, Word, WORD_SIZE};

/// Whether `address` is an in-bounds, aligned, non-zero slot holding a valid header.
pub fn is_valid_op(words: &[Word], address: u32) -> bool {
    if address % WORD_SIZE != 0 {
        return false;
    }
    if address < WORD_SIZE || (address / WORD_SIZE) as usize >= words.len() {
        return false;
    }
    isa::read_header(words, address).is_some()
}

/// Score how much the words at `address` look like a run of instructions.
///
/// Each decoded header adds 1 and each operand that is not a plain
/// immediate adds 1. A decode failure subtracts the number of instructions
/// still to go and ends the scan.
pub fn instruction_certainty(words: &[Word], address: u32, lookahead: usize) -> i64 {
    let mut certainty: i64 = 0;
    let mut cursor = (address / WORD_SIZE) as usize;

    for index in 0..lookahead {
        let header = match words.get(cursor).and_then(|word| isa::decode_header(*word)) {
            Some(header) => header,
            None => {
                certainty -= (lookahead - index) as i64;
                break;
            }
        };

        certainty += 1;
        cursor += 1;

        for _ in 0..header.operand_count {
            let word = match words.get(cursor) {
                Some(word) => *word,
                None => break,
            };
            let mode = AddressingMode::from_word(word);
            if mode != AddressingMode::Immediate {
                certainty += 1;
            }
            cursor += mode.width(word);
        }
    }

    certainty
}

/// Whether the words at `address` are probably code.
///
/// An address already decoded as an instruction is always code.
pub fn is_probably_op(
    script: &Script,
    words: &[Word],
    address: u32,
    lookahead: usize,
    threshold: i64,
) -> bool {
    if address % WORD_SIZE != 0 {
        return false;
    }
    if address < WORD_SIZE || (address / WORD_SIZE) as usize >= words.len() {
        return false;
    }
    if matches!(script.entry_at(address), Some(Entry::Instruction(_))) {
        return true;
    }
    instruction_certainty(words, address, lookahead) >= threshold
}

/// Find the first string terminator at or after `address`.
///
/// The search covers at most `max_words` words and stops early at the end
/// of the image or at the first slot already claimed by another entry.
/// Returns the byte address of the terminator.
pub fn find_string_terminator(
    script: &Script,
    words: &[Word],
    address: u32,
    max_words: usize,
) -> Option<u32> {
    let start = (address / WORD_SIZE) as usize;
    let end = (start + max_words).min(words.len());
    if start >= end {
        return None;
    }

    let claimed = (start..end)
        .find(|index| !matches!(script.entries.get(*index), Some(Entry::Unset)))
        .unwrap_or(end);
    if start >= claimed {
        return None;
    }

    let bytes = bytes_from_words(&words[start..claimed]);
    let needle = STRING_SENTINEL.to_le_bytes();
    memmem::find_iter(&bytes, &needle)
        .find(|offset| offset % 2 == 0)
        .map(|offset| start as u32 * WORD_SIZE + offset as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    // mov stor[1], stor[2]; return; return
    const CODE: [Word; 6] = [0x4, 0x0000_0208, 0x0200_0001, 0x0200_0002, 0x49, 0x49];

    #[test]
    fn test_is_valid_op() {
        assert!(is_valid_op(&CODE, 4));
        assert!(is_valid_op(&CODE, 16));
        assert!(!is_valid_op(&CODE, 0));
        assert!(!is_valid_op(&CODE, 6));
        assert!(!is_valid_op(&CODE, 8));
        assert!(!is_valid_op(&CODE, 24));
    }

    #[test]
    fn test_certainty_counts_instructions_and_operands() {
        // mov (+1) with two storage operands (+2), return (+1), return (+1)
        assert_eq!(instruction_certainty(&CODE, 4, 3), 5);
    }

    #[test]
    fn test_certainty_penalises_failures() {
        let words = [0x49, 0xdead_beef];
        // return (+1), then failure with 2 of 3 remaining (-2)
        assert_eq!(instruction_certainty(&words, 0, 3), -1);
        assert_eq!(instruction_certainty(&[0xffff_ffff], 0, 3), -3);
    }

    #[test]
    fn test_is_probably_op() {
        let script = Script::new(CODE.len());
        assert!(is_probably_op(&script, &CODE, 4, 3, 2));
        // return, return, then the end of the image
        assert!(!is_probably_op(&script, &CODE, 16, 3, 2));
        assert!(!is_probably_op(&script, &CODE, 0, 3, 2));
    }

    #[test]
    fn test_find_string_terminator() {
        let words = [0x0022_0021, 0xa0ff_0023, 0x0000_0000];
        let script = Script::new(words.len());
        assert_eq!(find_string_terminator(&script, &words, 0, 300), Some(6));
        assert_eq!(find_string_terminator(&script, &words, 0, 1), None);
        assert_eq!(find_string_terminator(&script, &words, 8, 300), None);
    }

    #[test]
    fn test_terminator_search_stops_at_claimed_slot() {
        let words = [0x0022_0021, 0xa0ff_0023];
        let mut script = Script::new(words.len());
        script.set(4, Entry::RawData { address: 4, value: words[1] });
        assert_eq!(find_string_terminator(&script, &words, 0, 300), None);
    }

    #[test]
    fn test_terminator_must_be_half_word_aligned() {
        // 0xff 0xa0 straddling two half-words is not a terminator
        let words = [0x00a0_ff00];
        let bytes = bytes_from_words(&words);
        assert_eq!(&bytes[1..3], &[0xff, 0xa0]);
        let script = Script::new(1);
        assert_eq!(find_string_terminator(&script, &words, 0, 300), None);
    }
}
