//! Output formatters for disassembled scripts.
//!
//! This module provides trait-based formatters for rendering a [`Script`]
//! as a text listing, as the JSON model accepted by the compiler, or as a
//! one-line summary.

use std::collections::HashMap;
use std::path::Path;

use crate::charset;
use crate::isa::{comparison_operator, get_p0, get_p1, get_p2, AddressingMode, Opcode};
use crate::labels::LABEL_PREFIX;
use crate::meta::Meta;
use crate::script::{AddressFlags, EncodedString, Entry, Instruction, Operand, Script};
use crate::types::WORD_SIZE;

/// Trait for formatting scripts.
pub trait ScriptFormatter {
    /// Format the header naming the source file.
    fn format_file(&self, path: &Path) -> String;

    /// Format the script body.
    fn format_body(&self, script: &Script, meta: &Meta) -> String;

    /// Format the complete output.
    fn format_script(&self, script: &Script, meta: &Meta, path: &Path) -> String {
        let mut out = self.format_file(path);
        out.push_str(&self.format_body(script, meta));
        out
    }
}

/// Text listing formatter.
#[derive(Debug, Clone, Default)]
pub struct ListingFormatter {
    /// Print call indices instead of method names
    pub strip_names: bool,
    /// Omit commentary
    pub strip_comments: bool,
}

impl ListingFormatter {
    /// Full listing with names and commentary.
    pub fn new() -> Self {
        Self::default()
    }

    /// A listing without names or commentary, for diffing.
    pub fn bare() -> Self {
        Self {
            strip_names: true,
            strip_comments: true,
        }
    }
}

impl ScriptFormatter for ListingFormatter {
    fn format_file(&self, path: &Path) -> String {
        if self.strip_comments {
            String::new()
        } else {
            format!("; {}\n", path.display())
        }
    }

    fn format_body(&self, script: &Script, meta: &Meta) -> String {
        Listing::new(self, script, meta).render()
    }
}

/// Renders one script; holds the label renumbering.
struct Listing<'a> {
    options: &'a ListingFormatter,
    script: &'a Script,
    meta: &'a Meta,
    renamed: HashMap<&'a str, String>,
}

impl<'a> Listing<'a> {
    fn new(options: &'a ListingFormatter, script: &'a Script, meta: &'a Meta) -> Self {
        // Generated labels are renumbered in address order
        let renamed = script
            .labels
            .iter()
            .flat_map(|(_, names)| names.iter())
            .filter(|name| name.starts_with(LABEL_PREFIX))
            .enumerate()
            .map(|(index, name)| (name.as_str(), format!("{LABEL_PREFIX}{index}")))
            .collect();

        Self {
            options,
            script,
            meta,
            renamed,
        }
    }

    fn label(&self, name: &str) -> String {
        self.renamed
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn render(&self) -> String {
        let mut out = String::new();

        for (address, entry) in self.script.heads() {
            if !self.options.strip_comments {
                let flags = self.script.flags_at(address);
                if flags.contains(AddressFlags::SUBROUTINE) {
                    out.push_str("\n; SUBROUTINE\n");
                }
                if flags.contains(AddressFlags::TABLE) {
                    out.push_str("\n; SUBROUTINE TABLE\n");
                }
                if flags.contains(AddressFlags::REENTRY) {
                    out.push_str("\n; FORK RE-ENTRY\n");
                }
            }

            self.push_labels(&mut out, address);

            match entry {
                Entry::Entrypoint(entrypoint) => {
                    out.push_str(&format!("entrypoint :{}\n", self.label(&entrypoint.destination)));
                }
                Entry::RawData { value, .. } => out.push_str(&format!("data 0x{value:x}\n")),
                Entry::PointerTable(table) => {
                    for label in &table.labels {
                        out.push_str(&format!("rel :{}\n", self.label(label)));
                    }
                }
                Entry::EncodedString(string) => self.push_string(&mut out, address, string),
                Entry::Instruction(instruction) => {
                    out.push_str(&self.instruction(instruction));
                    out.push('\n');
                }
                Entry::Unset => out.push_str("; unset\n"),
                Entry::OperandSlot { .. } | Entry::Continuation { .. } => {}
            }
        }

        out
    }

    fn push_labels(&self, out: &mut String, address: u32) {
        for name in self.script.labels.names_at(address) {
            out.push_str(&self.label(name));
            out.push_str(":\n");
        }
    }

    /// Strings are split wherever a label points into their middle.
    fn push_string(&self, out: &mut String, address: u32, string: &EncodedString) {
        let end = address + string.width() as u32 * WORD_SIZE;
        let mut start = 0;

        for (label_address, _) in self
            .script
            .labels
            .iter()
            .filter(|(label_address, _)| *label_address > address && *label_address < end)
        {
            let split = (((label_address - address) / 2) as usize).min(string.chars.len());
            out.push_str(&format!(
                "data str[{}{}]\n",
                charset::decode(&string.chars[start..split]),
                charset::NO_TERMINATOR
            ));
            self.push_labels(out, label_address);
            start = split;
        }

        let tail = if string.terminated {
            ""
        } else {
            charset::NO_TERMINATOR
        };
        out.push_str(&format!(
            "data str[{}{}]\n",
            charset::decode(&string.chars[start..]),
            tail
        ));
    }

    fn instruction(&self, instruction: &Instruction) -> String {
        let opcode = instruction.opcode;
        let method = if opcode == Opcode::Call {
            self.meta.method(instruction.header_param)
        } else {
            None
        };

        let mut line = opcode.name().to_string();

        if opcode == Opcode::Call {
            match method {
                Some(method) if !self.options.strip_names => {
                    line.push(' ');
                    line.push_str(&method.name);
                }
                _ => line.push_str(&format!(" {}", instruction.header_param)),
            }
        } else if opcode.header_param_name().is_some() {
            line.push(' ');
            line.push_str(&header_param(opcode, instruction.header_param));
        }

        match opcode {
            Opcode::WaitCmp0 | Opcode::JmpCmp0 => line.push_str(", 0x0"),
            Opcode::Mov0 => line.push_str(" 0x0,"),
            _ => {}
        }

        for (index, operand) in instruction.operands.iter().enumerate() {
            if index != 0 || opcode.header_param_name().is_some() {
                line.push(',');
            }
            line.push(' ');
            line.push_str(&self.operand(instruction, index, operand));
        }

        if !self.options.strip_comments {
            match method {
                Some(method) if !method.params.is_empty() => {
                    let params: Vec<String> = method
                        .params
                        .iter()
                        .map(|param| format!("{} {} {}", param.direction, param.kind, param.name))
                        .collect();
                    line.push_str(" ; ");
                    line.push_str(&params.join(", "));
                }
                _ if opcode != Opcode::Call
                    && (!instruction.operands.is_empty() || opcode.header_param_name().is_some()) =>
                {
                    let mut names: Vec<&str> = Vec::new();
                    names.extend(opcode.header_param_name());
                    names.extend(opcode.comment_operand_names());
                    line.push_str(" ; ");
                    line.push_str(&names.join(", "));
                }
                _ => {}
            }
        }

        line
    }

    fn immediate(&self, instruction: &Instruction, index: usize, value: u32) -> String {
        if instruction.opcode == Opcode::Call {
            let symbolic = self
                .meta
                .method(instruction.header_param)
                .and_then(|method| method.params.get(index))
                .and_then(|param| self.meta.enum_value(&param.kind, value));
            if let Some(symbolic) = symbolic {
                return symbolic.to_string();
            }
        }
        format!("0x{value:x}")
    }

    fn operand(&self, instruction: &Instruction, index: usize, operand: &Operand) -> String {
        let first = operand.raw_words.first().copied().unwrap_or(0);
        let second = operand.raw_words.get(1).copied().unwrap_or(0);
        let (p0, p1, p2) = (get_p0(first), get_p1(first), get_p2(first));
        let (q0, q1) = (get_p0(second), get_p1(second));

        let target = match &operand.label {
            Some(label) => format!(":{}", self.label(label)),
            None => {
                let resolved = operand
                    .mode
                    .resolve(instruction.address, &operand.raw_words)
                    .unwrap_or(0);
                format!("0x{resolved:x}")
            }
        };

        match operand.mode {
            AddressingMode::Immediate => self.immediate(instruction, index, first),
            AddressingMode::NextImmediate => self.immediate(instruction, index, second),
            AddressingMode::Storage => format!("stor[{p0}]"),
            AddressingMode::OtherOtherStorage => format!("stor[stor[stor[{p0}], {p1}], {p2}]"),
            AddressingMode::OtherStorageOffset => format!("stor[stor[{p0}], {p1} + stor[{p2}]]"),
            AddressingMode::GameVar1 => format!("var[{p0}]"),
            AddressingMode::GameVar2 => format!("var[{p0} + stor[{p1}]]"),
            AddressingMode::GameVarArray1 => format!("var[{p0}][stor[{p1}]]"),
            AddressingMode::GameVarArray2 => format!("var[{p0} + stor[{p1}]][stor[{p2}]]"),
            AddressingMode::Inline1 | AddressingMode::Inline3 => format!("inl[{target}]"),
            AddressingMode::Inline2 => format!("inl[{target}[stor[{p2}]]]"),
            AddressingMode::InlineTable1 => format!("inl[{target}[{target}[stor[{p2}]]]]"),
            AddressingMode::InlineTable2 => {
                format!("inl[{target}[{target}[stor[{q0}]] + stor[{q1}]]]")
            }
            AddressingMode::OtherStorage => format!("stor[stor[{p0}], {p1} + {p2}]"),
            AddressingMode::GameVar3 => format!("var[{p0} + {p1}]"),
            AddressingMode::GameVarArray3 => format!("var[{p0}][{p1}]"),
            AddressingMode::GameVarArray4 => format!("var[{p0} + stor[{p1}]][{p2}]"),
            AddressingMode::GameVarArray5 => format!("var[{p0} + {p1}][stor[{p2}]]"),
            AddressingMode::InlineTable3 => format!("inl[{target} + inl[{target} + 0x{p2:x}]]"),
            AddressingMode::InlineTable4 => format!("inl[{target}[{target}[{q0}] + {q1}]]"),
            AddressingMode::Register => format!("reg[{p0}]"),
            AddressingMode::Identifier => format!("id[{}]", identifier(&operand.raw_words)),
            AddressingMode::Unsupported12
            | AddressingMode::Unsupported15
            | AddressingMode::Unsupported16 => format!("0x{first:x}"),
        }
    }
}

fn header_param(opcode: Opcode, value: u16) -> String {
    if opcode.compares() {
        if let Some(operator) = comparison_operator(value) {
            return operator.to_string();
        }
    }
    format!("0x{value:x}")
}

/// Characters packed four per word after the descriptor, low byte first.
fn identifier(raw_words: &[u32]) -> String {
    let count = raw_words.first().map_or(0, |word| usize::from(get_p2(*word)));
    raw_words
        .iter()
        .skip(1)
        .flat_map(|word| word.to_le_bytes())
        .take(count)
        .map(char::from)
        .collect()
}

/// JSON model formatter.
///
/// The output is the serialized [`Script`], loadable again for compilation.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl ScriptFormatter for JsonFormatter {
    fn format_file(&self, _path: &Path) -> String {
        String::new()
    }

    fn format_body(&self, script: &Script, _meta: &Meta) -> String {
        let json = if self.pretty {
            serde_json::to_string_pretty(script)
        } else {
            serde_json::to_string(script)
        };
        json.unwrap_or_else(|_| "{}".to_string())
    }
}

/// Compact single-line summary formatter.
#[derive(Debug, Clone, Default)]
pub struct SummaryFormatter;

impl SummaryFormatter {
    /// Create a summary formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ScriptFormatter for SummaryFormatter {
    fn format_file(&self, path: &Path) -> String {
        format!("{}\t", path.display())
    }

    fn format_body(&self, script: &Script, _meta: &Meta) -> String {
        let mut tables = 0;
        let mut strings = 0;
        let mut data = 0;
        for (_, entry) in script.heads() {
            match entry {
                Entry::PointerTable(_) => tables += 1,
                Entry::EncodedString(_) => strings += 1,
                Entry::RawData { .. } => data += 1,
                _ => {}
            }
        }

        format!(
            "{} words\t{} entrypoints\t{} instructions\t{} tables\t{} strings\t{} data\t{} diagnostics\n",
            script.len(),
            script.entrypoints.len(),
            script.instructions().count(),
            tables,
            strings,
            data,
            script.diagnostics.len()
        )
    }
}
