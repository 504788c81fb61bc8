//! Heuristics for telling code from data.
//!
//! Script images carry no length table, so the disassembler relies on
//! lookahead scoring to decide where pointer tables end and where string
//! tables are plausible.

pub mod scorer;

pub use scorer::*;
