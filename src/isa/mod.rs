//! Script VM instruction set.
//!
//! A header word packs `opcode | operand_count << 8 | header_param << 16`.
//! Operand words carry a mode tag in their top byte and three parameter
//! bytes below it; the low half doubles as a signed word displacement for
//! inline modes.

pub mod mode;
pub mod opcode;

pub use mode::{identifier_width, resolve_table_entry, AddressingMode};
pub use opcode::{comparison_operator, Opcode, OpcodeInfo};

use crate::types::{Word, WORD_SIZE};

/// Extract the opcode byte of a header word.
#[inline]
pub fn get_opcode(word: Word) -> u8 {
    (word & 0xff) as u8
}

/// Extract the operand count of a header word.
#[inline]
pub fn get_operand_count(word: Word) -> usize {
    ((word >> 8) & 0xff) as usize
}

/// Extract the header parameter of a header word.
#[inline]
pub fn get_header_param(word: Word) -> u16 {
    (word >> 16) as u16
}

/// Pack a header word.
#[inline]
pub fn encode_header(opcode: u8, operand_count: usize, header_param: u16) -> Word {
    u32::from(opcode) | ((operand_count as u32 & 0xff) << 8) | (u32::from(header_param) << 16)
}

/// Extract the addressing-mode tag of an operand word.
#[inline]
pub fn get_mode_tag(word: Word) -> u8 {
    (word >> 24) as u8
}

/// First parameter byte.
#[inline]
pub fn get_p0(word: Word) -> u8 {
    (word & 0xff) as u8
}

/// Second parameter byte.
#[inline]
pub fn get_p1(word: Word) -> u8 {
    ((word >> 8) & 0xff) as u8
}

/// Third parameter byte.
#[inline]
pub fn get_p2(word: Word) -> u8 {
    ((word >> 16) & 0xff) as u8
}

/// Signed displacement, in words, of an inline operand.
#[inline]
pub fn get_displacement(word: Word) -> i16 {
    (word & 0xffff) as u16 as i16
}

/// A decoded instruction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Decoded opcode
    pub opcode: Opcode,
    /// Number of operands that follow
    pub operand_count: usize,
    /// Upper half-word; call index or comparison operator
    pub header_param: u16,
}

/// Decode a header word.
///
/// Returns `None` unless the opcode exists, the operand count matches the
/// catalog (any count is accepted for `call`), and the header parameter is
/// zero for opcodes that define none.
pub fn decode_header(word: Word) -> Option<Header> {
    let opcode = Opcode::from_code(get_opcode(word))?;
    let operand_count = get_operand_count(word);
    let header_param = get_header_param(word);

    if let Some(arity) = opcode.arity() {
        if arity != operand_count {
            return None;
        }
    }

    if opcode.header_param_name().is_none() && header_param != 0 {
        return None;
    }

    Some(Header {
        opcode,
        operand_count,
        header_param,
    })
}

/// Decode the header at a byte address.
pub fn read_header(words: &[Word], address: u32) -> Option<Header> {
    if address % WORD_SIZE != 0 {
        return None;
    }
    words
        .get((address / WORD_SIZE) as usize)
        .and_then(|word| decode_header(*word))
}

impl Header {
    /// Re-encode this header.
    pub fn encode(&self) -> Word {
        encode_header(self.opcode.code(), self.operand_count, self.header_param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let word = 0x1234_0208;
        assert_eq!(get_opcode(word), 0x08);
        assert_eq!(get_operand_count(word), 2);
        assert_eq!(get_header_param(word), 0x1234);

        let operand = 0x0a03_0201;
        assert_eq!(get_mode_tag(operand), 0x0a);
        assert_eq!(get_p0(operand), 1);
        assert_eq!(get_p1(operand), 2);
        assert_eq!(get_p2(operand), 3);
        assert_eq!(get_displacement(0x0900_ffff), -1);
    }

    #[test]
    fn test_decode_header() {
        let mov = decode_header(0x0000_0208).unwrap();
        assert_eq!(mov.opcode, Opcode::Mov);
        assert_eq!(mov.encode(), 0x0000_0208);

        // Wrong operand count
        assert!(decode_header(0x0000_0108).is_none());
        // Header parameter on an opcode that takes none
        assert!(decode_header(0x0001_0208).is_none());
        // Unknown opcode
        assert!(decode_header(0x0000_0017).is_none());
    }

    #[test]
    fn test_decode_call_is_variadic() {
        let call = decode_header(0x0007_0538).unwrap();
        assert_eq!(call.opcode, Opcode::Call);
        assert_eq!(call.operand_count, 5);
        assert_eq!(call.header_param, 7);
    }

    #[test]
    fn test_jmp_cmp_operator() {
        let header = decode_header(encode_header(65, 3, 2)).unwrap();
        assert_eq!(header.opcode, Opcode::JmpCmp);
        assert_eq!(comparison_operator(header.header_param), Some("=="));
    }

    #[test]
    fn test_read_header() {
        let words = [0x4, 0x0000_0049];
        assert_eq!(read_header(&words, 4).map(|h| h.opcode), Some(Opcode::Return));
        assert!(read_header(&words, 2).is_none());
        assert!(read_header(&words, 8).is_none());
    }
}
