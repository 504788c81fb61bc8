//! Instruction catalog.
//!
//! Every opcode the script VM understands, with its mnemonic, optional
//! header parameter and fixed operand arity. `call` is the one variadic
//! instruction: its operand count comes from the header word and is checked
//! against call metadata instead of this catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Numeric opcode (low byte of the header word)
    pub code: u8,
    /// Mnemonic
    pub name: &'static str,
    /// Name of the parameter packed into the header word, if any
    pub header_param: Option<&'static str>,
    /// Operand names, in encoding order
    pub operands: &'static [&'static str],
}

/// Script VM opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    /// 0: `yield`
    Yield,
    /// 1: `rewind`
    Rewind,
    /// 2: `wait frames`
    Wait,
    /// 3: `wait_cmp operator, left, right`
    WaitCmp,
    /// 4: `wait_cmp operator, right`
    WaitCmp0,
    /// 5: `rewind`
    Rewind5,
    /// 6: `rewind`
    Rewind6,
    /// 7: `rewind`
    Rewind7,
    /// 8: `mov source, dest`
    Mov,
    /// 9: `swap_broken sourceDest, dest`
    SwapBroken,
    /// 10: `memcpy size, src, dest`
    Memcpy,
    /// 11: `rewind`
    Rewind11,
    /// 12: `mov dest`
    Mov0,
    /// 13: `rewind`
    Rewind13,
    /// 14: `rewind`
    Rewind14,
    /// 15: `rewind`
    Rewind15,
    /// 16: `and right, left`
    And,
    /// 17: `or right, left`
    Or,
    /// 18: `xor right, left`
    Xor,
    /// 19: `andor right, left`
    AndOr,
    /// 20: `not right, left`
    Not,
    /// 21: `shl right, left`
    Shl,
    /// 22: `shr right, left`
    Shr,
    /// 24: `add amount, operand`
    Add,
    /// 25: `sub amount, operand`
    Sub,
    /// 26: `sub_rev amount, operand/dest`
    SubRev,
    /// 27: `incr operand`
    Incr,
    /// 28: `decr operand`
    Decr,
    /// 29: `neg operand`
    Neg,
    /// 30: `abs operand`
    Abs,
    /// 32: `mul amount, operand`
    Mul,
    /// 33: `div amount, operand`
    Div,
    /// 34: `div_rev amount, operand/dest`
    DivRev,
    /// 35: `mod amount, operand`
    Mod,
    /// 36: `mod_rev amount, operand/dest`
    ModRev,
    /// 40: `mul_12 amount, operand`
    Mul12,
    /// 41: `div_12 amount, operand`
    Div12,
    /// 42: `div_12_rev amount, operand`
    Div12Rev,
    /// 43: `mod amount, operand`
    Mod43,
    /// 44: `mod_rev amount, operand/dest`
    ModRev44,
    /// 48: `sqrt value, dest`
    Sqrt,
    /// 49: `rand bound, dest`
    Rand,
    /// 50: `sin_12 angle, dest`
    Sin12,
    /// 51: `cos_12 angle, dest`
    Cos12,
    /// 52: `atan2_12 y, x, dest`
    Atan212,
    /// 56: `call index`
    Call,
    /// 64: `jmp addr`
    Jmp,
    /// 65: `jmp_cmp operator, left, right, addr`
    JmpCmp,
    /// 66: `jmp_cmp operator, right, addr`
    JmpCmp0,
    /// 67: `while counter, addr`
    While,
    /// 68: `jmp_table index, table`
    JmpTable,
    /// 72: `gosub addr`
    Gosub,
    /// 73: `return`
    Return,
    /// 74: `gosub_table index, table`
    GosubTable,
    /// 80: `deallocate`
    Deallocate,
    /// 82: `deallocate`
    Deallocate82,
    /// 83: `deallocate_other index`
    DeallocateOther,
    /// 86: `fork index, addr, p2`
    Fork,
    /// 87: `fork_reenter index, entrypoint, p2`
    ForkReenter,
    /// 88: `consume`
    Consume,
    /// 96: `debug96 ?, ?, ?`
    Debug96,
    /// 97: `debug97`
    Debug97,
    /// 98: `debug98 ?`
    Debug98,
    /// 99: `depth dest`
    Depth,
}

const NONE: &[&str] = &[];

const fn entry(
    code: u8,
    name: &'static str,
    header_param: Option<&'static str>,
    operands: &'static [&'static str],
) -> OpcodeInfo {
    OpcodeInfo {
        code,
        name,
        header_param,
        operands,
    }
}

impl Opcode {
    /// Every opcode in numeric order.
    pub const ALL: &'static [Opcode] = &[
        Opcode::Yield,
        Opcode::Rewind,
        Opcode::Wait,
        Opcode::WaitCmp,
        Opcode::WaitCmp0,
        Opcode::Rewind5,
        Opcode::Rewind6,
        Opcode::Rewind7,
        Opcode::Mov,
        Opcode::SwapBroken,
        Opcode::Memcpy,
        Opcode::Rewind11,
        Opcode::Mov0,
        Opcode::Rewind13,
        Opcode::Rewind14,
        Opcode::Rewind15,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::AndOr,
        Opcode::Not,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Add,
        Opcode::Sub,
        Opcode::SubRev,
        Opcode::Incr,
        Opcode::Decr,
        Opcode::Neg,
        Opcode::Abs,
        Opcode::Mul,
        Opcode::Div,
        Opcode::DivRev,
        Opcode::Mod,
        Opcode::ModRev,
        Opcode::Mul12,
        Opcode::Div12,
        Opcode::Div12Rev,
        Opcode::Mod43,
        Opcode::ModRev44,
        Opcode::Sqrt,
        Opcode::Rand,
        Opcode::Sin12,
        Opcode::Cos12,
        Opcode::Atan212,
        Opcode::Call,
        Opcode::Jmp,
        Opcode::JmpCmp,
        Opcode::JmpCmp0,
        Opcode::While,
        Opcode::JmpTable,
        Opcode::Gosub,
        Opcode::Return,
        Opcode::GosubTable,
        Opcode::Deallocate,
        Opcode::Deallocate82,
        Opcode::DeallocateOther,
        Opcode::Fork,
        Opcode::ForkReenter,
        Opcode::Consume,
        Opcode::Debug96,
        Opcode::Debug97,
        Opcode::Debug98,
        Opcode::Depth,
    ];

    /// Catalog entry for this opcode.
    pub fn info(self) -> OpcodeInfo {
        match self {
            Opcode::Yield => entry(0, "yield", None, NONE),
            Opcode::Rewind => entry(1, "rewind", None, NONE),
            Opcode::Wait => entry(2, "wait", None, &["frames"]),
            Opcode::WaitCmp => entry(3, "wait_cmp", Some("operator"), &["left", "right"]),
            Opcode::WaitCmp0 => entry(4, "wait_cmp", Some("operator"), &["right"]),
            Opcode::Rewind5 => entry(5, "rewind", None, NONE),
            Opcode::Rewind6 => entry(6, "rewind", None, NONE),
            Opcode::Rewind7 => entry(7, "rewind", None, NONE),
            Opcode::Mov => entry(8, "mov", None, &["source", "dest"]),
            Opcode::SwapBroken => entry(9, "swap_broken", None, &["sourceDest", "dest"]),
            Opcode::Memcpy => entry(10, "memcpy", None, &["size", "src", "dest"]),
            Opcode::Rewind11 => entry(11, "rewind", None, NONE),
            Opcode::Mov0 => entry(12, "mov", None, &["dest"]),
            Opcode::Rewind13 => entry(13, "rewind", None, NONE),
            Opcode::Rewind14 => entry(14, "rewind", None, NONE),
            Opcode::Rewind15 => entry(15, "rewind", None, NONE),
            Opcode::And => entry(16, "and", None, &["right", "left"]),
            Opcode::Or => entry(17, "or", None, &["right", "left"]),
            Opcode::Xor => entry(18, "xor", None, &["right", "left"]),
            Opcode::AndOr => entry(19, "andor", None, &["right", "left"]),
            Opcode::Not => entry(20, "not", None, &["right", "left"]),
            Opcode::Shl => entry(21, "shl", None, &["right", "left"]),
            Opcode::Shr => entry(22, "shr", None, &["right", "left"]),
            Opcode::Add => entry(24, "add", None, &["amount", "operand"]),
            Opcode::Sub => entry(25, "sub", None, &["amount", "operand"]),
            Opcode::SubRev => entry(26, "sub_rev", None, &["amount", "operand/dest"]),
            Opcode::Incr => entry(27, "incr", None, &["operand"]),
            Opcode::Decr => entry(28, "decr", None, &["operand"]),
            Opcode::Neg => entry(29, "neg", None, &["operand"]),
            Opcode::Abs => entry(30, "abs", None, &["operand"]),
            Opcode::Mul => entry(32, "mul", None, &["amount", "operand"]),
            Opcode::Div => entry(33, "div", None, &["amount", "operand"]),
            Opcode::DivRev => entry(34, "div_rev", None, &["amount", "operand/dest"]),
            Opcode::Mod => entry(35, "mod", None, &["amount", "operand"]),
            Opcode::ModRev => entry(36, "mod_rev", None, &["amount", "operand/dest"]),
            Opcode::Mul12 => entry(40, "mul_12", None, &["amount", "operand"]),
            Opcode::Div12 => entry(41, "div_12", None, &["amount", "operand"]),
            Opcode::Div12Rev => entry(42, "div_12_rev", None, &["amount", "operand"]),
            Opcode::Mod43 => entry(43, "mod", None, &["amount", "operand"]),
            Opcode::ModRev44 => entry(44, "mod_rev", None, &["amount", "operand/dest"]),
            Opcode::Sqrt => entry(48, "sqrt", None, &["value", "dest"]),
            Opcode::Rand => entry(49, "rand", None, &["bound", "dest"]),
            Opcode::Sin12 => entry(50, "sin_12", None, &["angle", "dest"]),
            Opcode::Cos12 => entry(51, "cos_12", None, &["angle", "dest"]),
            Opcode::Atan212 => entry(52, "atan2_12", None, &["y", "x", "dest"]),
            Opcode::Call => entry(56, "call", Some("index"), NONE),
            Opcode::Jmp => entry(64, "jmp", None, &["addr"]),
            Opcode::JmpCmp => entry(65, "jmp_cmp", Some("operator"), &["left", "right", "addr"]),
            Opcode::JmpCmp0 => entry(66, "jmp_cmp", Some("operator"), &["right", "addr"]),
            Opcode::While => entry(67, "while", None, &["counter", "addr"]),
            Opcode::JmpTable => entry(68, "jmp_table", None, &["index", "table"]),
            Opcode::Gosub => entry(72, "gosub", None, &["addr"]),
            Opcode::Return => entry(73, "return", None, NONE),
            Opcode::GosubTable => entry(74, "gosub_table", None, &["index", "table"]),
            Opcode::Deallocate => entry(80, "deallocate", None, NONE),
            Opcode::Deallocate82 => entry(82, "deallocate", None, NONE),
            Opcode::DeallocateOther => entry(83, "deallocate_other", None, &["index"]),
            Opcode::Fork => entry(86, "fork", None, &["index", "addr", "p2"]),
            Opcode::ForkReenter => entry(87, "fork_reenter", None, &["index", "entrypoint", "p2"]),
            Opcode::Consume => entry(88, "consume", None, NONE),
            Opcode::Debug96 => entry(96, "debug96", Some("?"), &["?", "?"]),
            Opcode::Debug97 => entry(97, "debug97", None, NONE),
            Opcode::Debug98 => entry(98, "debug98", None, &["?"]),
            Opcode::Depth => entry(99, "depth", None, &["dest"]),
        }
    }

    /// Look up an opcode by its numeric value.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Look up an opcode by mnemonic.
    ///
    /// Several opcodes share a mnemonic (`rewind`, `mov`, `jmp_cmp` ...);
    /// the lowest-numbered one is returned.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Numeric opcode.
    pub fn code(self) -> u8 {
        self.info().code
    }

    /// Mnemonic.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Name of the header parameter, if this opcode has one.
    pub fn header_param_name(self) -> Option<&'static str> {
        self.info().header_param
    }

    /// Operand names.
    pub fn operand_names(self) -> &'static [&'static str] {
        self.info().operands
    }

    /// Names used when commenting a listing. The zero-compare forms
    /// document the implicit zero operand.
    pub fn comment_operand_names(self) -> &'static [&'static str] {
        match self {
            Opcode::WaitCmp0 => &["left", "right"],
            Opcode::Mov0 => &["source", "dest"],
            Opcode::JmpCmp0 => &["left", "right", "addr"],
            _ => self.operand_names(),
        }
    }

    /// Fixed operand count, or `None` for the variadic `call`.
    pub fn arity(self) -> Option<usize> {
        match self {
            Opcode::Call => None,
            _ => Some(self.operand_names().len()),
        }
    }

    /// Whether execution never falls through to the next instruction.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::Rewind
                | Opcode::Return
                | Opcode::Deallocate
                | Opcode::Deallocate82
                | Opcode::Consume
        )
    }

    /// Whether the header parameter is a comparison operator.
    pub fn compares(self) -> bool {
        matches!(
            self,
            Opcode::WaitCmp | Opcode::WaitCmp0 | Opcode::JmpCmp | Opcode::JmpCmp0
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Render a comparison header parameter symbolically.
pub fn comparison_operator(value: u16) -> Option<&'static str> {
    match value {
        0 => Some("<="),
        1 => Some("<"),
        2 => Some("=="),
        3 => Some("!="),
        4 => Some(">"),
        5 => Some(">="),
        6 => Some("&"),
        7 => Some("!&"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_sorted() {
        let codes: Vec<u8> = Opcode::ALL.iter().map(|op| op.code()).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Opcode::from_code(8), Some(Opcode::Mov));
        assert_eq!(Opcode::from_code(73), Some(Opcode::Return));
        assert_eq!(Opcode::from_code(23), None);
        assert_eq!(Opcode::from_code(0xff), None);
    }

    #[test]
    fn test_arity() {
        assert_eq!(Opcode::Mov.arity(), Some(2));
        assert_eq!(Opcode::JmpCmp.arity(), Some(3));
        assert_eq!(Opcode::Return.arity(), Some(0));
        assert_eq!(Opcode::Call.arity(), None);
    }

    #[test]
    fn test_shared_mnemonics() {
        assert_eq!(Opcode::from_name("rewind"), Some(Opcode::Rewind));
        assert_eq!(Opcode::from_name("MOV"), Some(Opcode::Mov));
        assert_eq!(Opcode::Mod43.name(), "mod");
    }

    #[test]
    fn test_terminal() {
        assert!(Opcode::Return.is_terminal());
        assert!(Opcode::Consume.is_terminal());
        assert!(!Opcode::Gosub.is_terminal());
        assert!(!Opcode::Jmp.is_terminal());
    }

    #[test]
    fn test_comparison_operator() {
        assert_eq!(comparison_operator(2), Some("=="));
        assert_eq!(comparison_operator(7), Some("!&"));
        assert_eq!(comparison_operator(8), None);
    }
}
