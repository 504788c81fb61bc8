//! Control-flow recovering disassembler.
//!
//! Script images interleave code, pointer tables, strings and plain data
//! with no length table. The disassembler starts from the entrypoint slots
//! at the head of the image, follows every statically known control
//! transfer, and guesses table extents with the lookahead heuristics in
//! [`crate::heuristics`]. Guesses are reconciled once exploration settles:
//! tables that ran into independently discovered entries are shortened.
//!
//! Exploration is driven by an explicit worklist; nothing here recurses on
//! the native stack.

use tracing::{debug, trace, warn};

use crate::error::{Diagnostic, DiagnosticKind, Result, ScriptError};
use crate::heuristics;
use crate::isa::{self, resolve_table_entry, AddressingMode, Header, Opcode};
use crate::meta::{BranchKind, Meta, ScriptMethod, ScriptParam};
use crate::script::{
    EncodedString, Entry, Entrypoint, Instruction, Operand, PointerTable, Script, STRING_SENTINEL,
};
use crate::types::{words_from_bytes, DisassemblerOptions, Word, WORD_SIZE};

/// Counters collected while disassembling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisassemblyStats {
    /// Header words decoded while probing branches
    pub headers_decoded: usize,
    /// Branches probed (visited-set misses)
    pub branches_probed: usize,
    /// Branch tables scanned
    pub tables_probed: usize,
}

/// Disassembler for script images.
pub struct Disassembler<'m> {
    meta: &'m Meta,
    options: DisassemblerOptions,
    stats: DisassemblyStats,
}

impl<'m> Disassembler<'m> {
    /// Create a disassembler with default options.
    pub fn new(meta: &'m Meta) -> Self {
        Self::with_options(meta, DisassemblerOptions::default())
    }

    /// Create a disassembler with custom options.
    pub fn with_options(meta: &'m Meta, options: DisassemblerOptions) -> Self {
        Self {
            meta,
            options,
            stats: DisassemblyStats::default(),
        }
    }

    /// Get the current options.
    pub fn options(&self) -> &DisassemblerOptions {
        &self.options
    }

    /// Counters accumulated over every disassembly run by this instance.
    pub fn stats(&self) -> &DisassemblyStats {
        &self.stats
    }

    /// Disassemble a little-endian byte image.
    pub fn disassemble(&mut self, bytes: &[u8]) -> Result<Script> {
        let words = words_from_bytes(bytes)?;
        self.disassemble_words(&words)
    }

    /// Disassemble an image already split into words.
    ///
    /// # Errors
    ///
    /// Fails on an empty branch table and on a `call` whose index the
    /// metadata does not describe. Every other problem is recorded as a
    /// diagnostic on the returned script.
    pub fn disassemble_words(&mut self, words: &[Word]) -> Result<Script> {
        let mut session = Session {
            meta: self.meta,
            options: &self.options,
            words,
            script: Script::new(words.len()),
            worklist: Vec::new(),
            strings: Vec::new(),
            stats: &mut self.stats,
        };
        session.run()?;
        Ok(session.script)
    }
}

/// Pending exploration work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Branch(u32),
    BranchTable { address: u32, set: TableSet },
}

/// Which exploration set a table's destinations are recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableSet {
    JumpDestinations,
    Subroutines,
    Reentries,
}

impl TableSet {
    fn for_branch(kind: BranchKind) -> Option<Self> {
        match kind {
            BranchKind::None => None,
            BranchKind::Jump => Some(TableSet::JumpDestinations),
            BranchKind::Subroutine | BranchKind::Gosub => Some(TableSet::Subroutines),
            BranchKind::Reentry => Some(TableSet::Reentries),
        }
    }
}

/// What the entries of a branch table point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Branches,
    Tables,
}

/// Strings waiting for the final pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StringRequest {
    Single(u32),
    Table { head: u32, destinations: Vec<u32> },
}

/// Whether decoding continues after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Session<'a> {
    meta: &'a Meta,
    options: &'a DisassemblerOptions,
    words: &'a [Word],
    script: Script,
    worklist: Vec<Probe>,
    strings: Vec<StringRequest>,
    stats: &'a mut DisassemblyStats,
}

impl<'a> Session<'a> {
    fn run(&mut self) -> Result<()> {
        self.discover_entrypoints();

        if self.script.entrypoints.is_empty() {
            warn!("No entrypoints found, treating the whole script as data");
        }

        for destination in self.script.entrypoints.iter().rev() {
            self.worklist.push(Probe::Branch(*destination));
        }
        self.drain()?;
        self.correct_overruns();

        if !self.options.extra_branches.is_empty() {
            debug!("Probing {} extra branches", self.options.extra_branches.len());
            for address in self.options.extra_branches.iter().rev() {
                self.worklist.push(Probe::Branch(*address));
            }
            self.drain()?;
            self.correct_overruns();
        }

        self.recover_strings();
        self.fill_data();

        debug!(
            "Disassembly complete: {} branches, {} labels, {} diagnostics",
            self.script.branches.len(),
            self.script.labels.len(),
            self.script.diagnostics.len()
        );
        Ok(())
    }

    fn byte_len(&self) -> u32 {
        self.words.len() as u32 * WORD_SIZE
    }

    fn word_at(&self, address: u32) -> Word {
        self.words
            .get((address / WORD_SIZE) as usize)
            .copied()
            .unwrap_or(0)
    }

    fn diagnose(&mut self, address: u32, kind: DiagnosticKind) {
        self.script.diagnostics.push(Diagnostic { address, kind });
    }

    fn is_probably_op(&self, address: u32) -> bool {
        heuristics::is_probably_op(
            &self.script,
            self.words,
            address,
            self.options.probable_op_lookahead,
            self.options.probable_op_threshold,
        )
    }

    fn discover_entrypoints(&mut self) {
        let limit = self.options.max_entrypoints.min(self.words.len());

        for index in 0..limit {
            let destination = self.words[index];
            if !heuristics::is_valid_op(self.words, destination) {
                break;
            }

            let address = index as u32 * WORD_SIZE;
            let label = self.script.labels.add_unique(destination);
            self.script.set(
                address,
                Entry::Entrypoint(Entrypoint {
                    address,
                    destination: label,
                }),
            );
            self.script.entrypoints.push(destination);
        }

        debug!("Found {} entrypoints", self.script.entrypoints.len());
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(probe) = self.worklist.pop() {
            match probe {
                Probe::Branch(address) => self.probe_branch(address)?,
                Probe::BranchTable { address, set } => {
                    self.probe_table(address, TableKind::Branches, set)?
                }
            }
        }
        Ok(())
    }

    /// Queue a branch target, rejecting anything that cannot hold code.
    fn enqueue(&mut self, origin: u32, target: u32) -> bool {
        if target % WORD_SIZE != 0 || target < WORD_SIZE || target >= self.byte_len() {
            warn!("Branch at {:x} targets invalid address {:x}", origin, target);
            self.diagnose(
                origin,
                DiagnosticKind::InvalidBranchTarget {
                    destination: target,
                },
            );
            return false;
        }
        self.worklist.push(Probe::Branch(target));
        true
    }

    fn unknowable(&mut self, address: u32, opcode: Opcode) {
        warn!("Skipping {} at {:x} due to unknowable parameter", opcode, address);
        self.diagnose(
            address,
            DiagnosticKind::UnknowableOperand {
                opcode: opcode.name().to_string(),
            },
        );
    }

    fn probe_branch(&mut self, address: u32) -> Result<()> {
        if !self.script.branches.insert(address) {
            return Ok(());
        }
        self.stats.branches_probed += 1;
        debug!("Probing branch {:x}", address);

        let mut cursor = address;
        while ((cursor / WORD_SIZE) as usize) < self.words.len() {
            if cursor != address && self.script.branches.contains(&cursor) {
                break;
            }

            match self.script.entry_at(cursor) {
                Some(Entry::Unset) => {}
                Some(Entry::Instruction(_)) => break,
                _ => {
                    self.diagnose(cursor, DiagnosticKind::OverlappingCode);
                    break;
                }
            }

            let word = self.word_at(cursor);
            self.stats.headers_decoded += 1;
            let header = match isa::decode_header(word) {
                Some(header) => header,
                None => {
                    debug!("Invalid header {:08x} at {:x}", word, cursor);
                    self.diagnose(cursor, DiagnosticKind::InvalidHeader { word });
                    break;
                }
            };

            let method = self.call_method(cursor, &header)?;

            let instruction = match self.decode_operands(cursor, &header) {
                Ok(instruction) => instruction,
                Err(kind) => {
                    warn!("Abandoning branch at {:x}: {}", cursor, kind);
                    self.diagnose(cursor, kind);
                    break;
                }
            };
            trace!("{:x}: {} ({} operands)", cursor, header.opcode, header.operand_count);

            let next = cursor + instruction.width() as u32 * WORD_SIZE;
            let instruction = self.place_instruction(instruction);
            self.handle_operands(&instruction, method)?;

            if self.transfer(&instruction, method, next)? == Flow::Stop {
                break;
            }
            cursor = next;
        }

        Ok(())
    }

    fn call_method(&self, address: u32, header: &Header) -> Result<Option<&'a ScriptMethod>> {
        if header.opcode != Opcode::Call {
            return Ok(None);
        }
        let meta: &'a Meta = self.meta;
        meta.method(header.header_param)
            .map(Some)
            .ok_or(ScriptError::UnknownCall {
                index: header.header_param,
                address,
            })
    }

    /// Decode the operands following a header without touching the model.
    fn decode_operands(
        &mut self,
        header_address: u32,
        header: &Header,
    ) -> std::result::Result<Instruction, DiagnosticKind> {
        let mut operands = Vec::with_capacity(header.operand_count);
        let mut cursor = header_address + WORD_SIZE;
        let byte_len = i64::from(self.byte_len());

        for _ in 0..header.operand_count {
            let index = (cursor / WORD_SIZE) as usize;
            let first = *self
                .words
                .get(index)
                .ok_or(DiagnosticKind::TruncatedInstruction)?;
            let mode = AddressingMode::from_word(first);
            if !mode.is_supported() {
                return Err(DiagnosticKind::UnsupportedMode { tag: mode.tag() });
            }

            let width = mode.width(first);
            let raw_words = self
                .words
                .get(index..index + width)
                .ok_or(DiagnosticKind::TruncatedInstruction)?
                .to_vec();
            if self.script.entries[index..index + width]
                .iter()
                .any(|entry| !entry.is_unset())
            {
                return Err(DiagnosticKind::OverlappingCode);
            }

            let resolved = mode.resolve(header_address, &raw_words);
            let operand = match resolved {
                Some(target) if mode.is_inline() && (target < 0 || target >= byte_len) => {
                    warn!(
                        "Pointer at {:x} destination is past the end of the script, replacing with 0",
                        cursor
                    );
                    self.diagnose(
                        cursor,
                        DiagnosticKind::PointerOutOfRange {
                            destination: target,
                        },
                    );
                    Operand::zeroed(cursor, raw_words)
                }
                _ => Operand {
                    address: cursor,
                    mode,
                    raw_words,
                    resolved: resolved.map(|value| value as u32),
                    label: None,
                },
            };

            cursor += width as u32 * WORD_SIZE;
            operands.push(operand);
        }

        Ok(Instruction {
            address: header_address,
            opcode: header.opcode,
            header_param: header.header_param,
            operands,
        })
    }

    /// Label inline operands and claim the instruction's slots.
    fn place_instruction(&mut self, mut instruction: Instruction) -> Instruction {
        let address = instruction.address;

        for (index, operand) in instruction.operands.iter_mut().enumerate() {
            if operand.mode.is_inline() {
                if let Some(target) = operand.resolved {
                    operand.label = Some(self.script.labels.add(target));
                }
            }

            for slot in 0..operand.width() as u32 {
                self.script.set(
                    operand.address + slot * WORD_SIZE,
                    Entry::OperandSlot {
                        instruction: address,
                        index,
                    },
                );
            }
        }

        self.script
            .set(address, Entry::Instruction(instruction.clone()));
        instruction
    }

    fn call_param(method: Option<&'a ScriptMethod>, index: usize) -> Option<&'a ScriptParam> {
        method.and_then(|method| method.params.get(index))
    }

    /// Follow table operands and queue string operands.
    fn handle_operands(
        &mut self,
        instruction: &Instruction,
        method: Option<&'a ScriptMethod>,
    ) -> Result<()> {
        let is_table_op = matches!(instruction.opcode, Opcode::JmpTable | Opcode::GosubTable);

        for (index, operand) in instruction.operands.iter().enumerate() {
            let param = Self::call_param(method, index);
            let target = match operand.resolved {
                Some(target) if operand.mode.is_inline() => target,
                _ => continue,
            };

            if operand.mode.is_table() && !is_table_op {
                match param.and_then(|param| TableSet::for_branch(param.branch)) {
                    Some(set) => self.probe_table(target, TableKind::Branches, set)?,
                    None => {
                        let strings = param.map_or(false, ScriptParam::is_string);
                        self.handle_pointer_table(instruction.address, target, strings);
                    }
                }
            } else if param.map_or(false, ScriptParam::is_string) {
                self.strings.push(StringRequest::Single(target));
            }
        }

        Ok(())
    }

    /// Opcode-specific control transfer.
    fn transfer(
        &mut self,
        instruction: &Instruction,
        method: Option<&'a ScriptMethod>,
        next: u32,
    ) -> Result<Flow> {
        let address = instruction.address;
        let opcode = instruction.opcode;
        let resolved = |index: usize| {
            instruction
                .operands
                .get(index)
                .and_then(|operand| operand.resolved)
        };

        let flow = match opcode {
            Opcode::Call => {
                if let Some(method) = method {
                    if method.params.len() != instruction.operands.len() {
                        warn!(
                            "Call {} at {:x} has wrong number of args ({}/{})",
                            method.name,
                            address,
                            instruction.operands.len(),
                            method.params.len()
                        );
                        self.diagnose(
                            address,
                            DiagnosticKind::CallArityMismatch {
                                expected: method.params.len(),
                                actual: instruction.operands.len(),
                            },
                        );
                    }

                    for (param, operand) in method.params.iter().zip(&instruction.operands) {
                        if param.branch == BranchKind::None || operand.mode.is_table() {
                            continue;
                        }
                        match operand.resolved {
                            Some(target) => {
                                if self.enqueue(address, target) {
                                    match param.branch {
                                        BranchKind::Gosub | BranchKind::Subroutine => {
                                            self.script.subroutines.insert(target);
                                        }
                                        BranchKind::Reentry => {
                                            self.script.reentry_points.insert(target);
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            None => self.unknowable(address, opcode),
                        }
                    }
                }
                Flow::Continue
            }
            Opcode::Jmp => match resolved(0) {
                Some(target) => {
                    self.enqueue(address, target);
                    Flow::Stop
                }
                None => {
                    self.unknowable(address, opcode);
                    Flow::Continue
                }
            },
            Opcode::JmpCmp | Opcode::JmpCmp0 => {
                match resolved(instruction.operands.len().saturating_sub(1)) {
                    Some(target) => {
                        // Pushed first so the fallthrough is explored first
                        self.enqueue(address, target);
                        self.enqueue(address, next);
                    }
                    None => self.unknowable(address, opcode),
                }
                Flow::Stop
            }
            Opcode::JmpTable | Opcode::GosubTable => {
                let set = if opcode == Opcode::JmpTable {
                    TableSet::JumpDestinations
                } else {
                    TableSet::Subroutines
                };

                match (resolved(1), instruction.operands.get(1)) {
                    (Some(0), _) => {}
                    (Some(table), Some(operand)) => {
                        let kind = if operand.mode.is_table() {
                            TableKind::Tables
                        } else {
                            TableKind::Branches
                        };
                        self.probe_table(table, kind, set)?;
                    }
                    _ => self.unknowable(address, opcode),
                }

                if opcode == Opcode::JmpTable {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            Opcode::Gosub => {
                match resolved(0) {
                    Some(target) => {
                        if self.enqueue(address, target) {
                            self.script.subroutines.insert(target);
                        }
                    }
                    None => self.unknowable(address, opcode),
                }
                Flow::Continue
            }
            Opcode::Fork => {
                match resolved(1) {
                    Some(target) => {
                        if self.enqueue(address, target) {
                            self.script.reentry_points.insert(target);
                        }
                    }
                    None => self.unknowable(address, opcode),
                }
                Flow::Continue
            }
            Opcode::While => {
                match resolved(1) {
                    Some(target) => {
                        self.enqueue(address, target);
                    }
                    None => self.unknowable(address, opcode),
                }
                Flow::Continue
            }
            _ if opcode.is_terminal() => Flow::Stop,
            _ => Flow::Continue,
        };

        Ok(flow)
    }

    fn record_destination(&mut self, set: TableSet, destination: u32) {
        let target = match set {
            TableSet::JumpDestinations => &mut self.script.jump_table_destinations,
            TableSet::Subroutines => &mut self.script.subroutines,
            TableSet::Reentries => &mut self.script.reentry_points,
        };
        target.insert(destination);
    }

    /// Scan a table of branches (or of branch tables) starting at `address`.
    fn probe_table(&mut self, address: u32, kind: TableKind, set: TableSet) -> Result<()> {
        if !self.script.table_addresses.insert(address) {
            return Ok(());
        }
        self.stats.tables_probed += 1;
        debug!("Probing {:?} table at {:x}", kind, address);

        let byte_len = i64::from(self.byte_len());
        let mut earliest = byte_len;
        let mut latest = 0i64;
        let mut destinations = Vec::new();
        let mut labels = Vec::new();

        let mut entry = address;
        while i64::from(entry) <= byte_len - i64::from(WORD_SIZE) {
            if !self.script.is_unset(entry) {
                break;
            }
            if entry != address && self.script.labels.contains_address(entry) {
                break;
            }

            let raw = self.word_at(entry);
            let within = if (raw as i32) > 0 {
                i64::from(entry) < earliest
            } else {
                i64::from(entry) > latest
            };
            if !within {
                break;
            }

            let destination = resolve_table_entry(address, raw);
            if destination < i64::from(WORD_SIZE) || destination > byte_len - i64::from(WORD_SIZE) {
                break;
            }
            let destination = destination as u32;

            if self.is_probably_op(entry) && !heuristics::is_valid_op(self.words, destination) {
                break;
            }

            let accepted = match kind {
                TableKind::Branches => heuristics::is_valid_op(self.words, destination),
                TableKind::Tables => !self.is_probably_op(destination),
            };
            if !accepted {
                break;
            }

            earliest = earliest.min(i64::from(destination));
            latest = latest.max(i64::from(destination));
            if kind == TableKind::Branches {
                self.record_destination(set, destination);
            }
            destinations.push(destination);
            labels.push(self.script.labels.add(destination));
            entry += WORD_SIZE;
        }

        if labels.is_empty() {
            return Err(ScriptError::EmptyTable { address });
        }

        trace!("Table at {:x} has {} entries", address, labels.len());
        self.script
            .set(address, Entry::PointerTable(PointerTable { address, labels }));

        destinations.sort_unstable();
        destinations.dedup();

        // Pushed ascending so the highest destination is explored first
        for destination in destinations {
            let probe = match kind {
                TableKind::Branches => Probe::Branch(destination),
                TableKind::Tables => Probe::BranchTable {
                    address: destination,
                    set,
                },
            };
            self.worklist.push(probe);
        }

        Ok(())
    }

    /// Scan a table of data pointers referenced by an instruction operand.
    fn handle_pointer_table(&mut self, origin: u32, address: u32, strings: bool) {
        if !self.script.is_unset(address) {
            return;
        }

        let byte_len = i64::from(self.byte_len());
        let mut earliest = byte_len;
        let mut latest = 0i64;
        let mut destinations = Vec::new();

        let mut entry = address;
        while i64::from(entry) <= byte_len - i64::from(WORD_SIZE) && self.script.is_unset(entry) {
            let raw = self.word_at(entry);
            let within = if (raw as i32) > 0 {
                i64::from(entry) < earliest
            } else {
                i64::from(entry) > latest
            };
            if !within {
                break;
            }

            let destination = resolve_table_entry(address, raw);
            if destination < 0 || destination >= byte_len - i64::from(WORD_SIZE) {
                break;
            }
            let destination = destination as u32;

            if self.is_probably_op(entry) {
                if !strings {
                    break;
                }
                let terminator = heuristics::find_string_terminator(
                    &self.script,
                    self.words,
                    destination,
                    self.options.string_sentinel_search_words,
                );
                if terminator.is_none() {
                    break;
                }
            }

            earliest = earliest.min(i64::from(destination));
            latest = latest.max(i64::from(destination));
            destinations.push(destination);
            entry += WORD_SIZE;
        }

        if destinations.is_empty() {
            warn!("Op at {:x} points to empty pointer table {:x}", origin, address);
            self.diagnose(address, DiagnosticKind::EmptyDataTable);
            return;
        }

        let labels = destinations
            .iter()
            .map(|destination| self.script.labels.add(*destination))
            .collect();
        self.script
            .set(address, Entry::PointerTable(PointerTable { address, labels }));

        if strings {
            self.strings.push(StringRequest::Table {
                head: address,
                destinations,
            });
        }
    }

    /// Shorten tables that run into entries discovered later, then seal
    /// the surviving tails.
    fn correct_overruns(&mut self) {
        let heads: Vec<u32> = self
            .script
            .heads()
            .filter(|(_, entry)| matches!(entry, Entry::PointerTable(_)))
            .map(|(address, _)| address)
            .collect();

        for head in heads {
            let mut table = match self.script.entry_at(head) {
                Some(Entry::PointerTable(table)) => table.clone(),
                _ => continue,
            };

            let count = table.labels.len();
            let mut keep = count;
            for n in 1..count {
                let slot = head + n as u32 * WORD_SIZE;
                let claimed = match self.script.entry_at(slot) {
                    None => true,
                    Some(Entry::Unset) | Some(Entry::RawData { .. }) => false,
                    Some(Entry::Continuation { head: owner }) => *owner != head,
                    Some(_) => true,
                };
                if claimed || self.script.labels.contains_address(slot) {
                    keep = n;
                    break;
                }
            }

            if keep < count {
                warn!("Jump table overrun at {:x}", head);
                let dropped = table.labels.split_off(keep);
                for name in &dropped {
                    let destination = self.script.labels.address_of(name);
                    self.script.labels.release(name);
                    if let Some(destination) = destination {
                        self.forget_destination(destination);
                    }
                }
                for n in keep..count {
                    let slot = head + n as u32 * WORD_SIZE;
                    if matches!(self.script.entry_at(slot), Some(Entry::Continuation { head: owner }) if *owner == head)
                    {
                        self.script.set(slot, Entry::Unset);
                    }
                }
                self.diagnose(
                    head,
                    DiagnosticKind::TableOverrun {
                        kept: keep,
                        dropped: dropped.len(),
                    },
                );
                self.script.set(head, Entry::PointerTable(table));
            }

            for n in 1..keep {
                self.script.set(
                    head + n as u32 * WORD_SIZE,
                    Entry::Continuation { head },
                );
            }
        }
    }

    /// Drop an address from the exploration sets once nothing labels it.
    fn forget_destination(&mut self, destination: u32) {
        if self.script.labels.contains_address(destination) {
            return;
        }
        debug!("Forgetting destination {:x} of a truncated table", destination);
        self.script.jump_table_destinations.remove(&destination);
        self.script.subroutines.remove(&destination);
        self.script.reentry_points.remove(&destination);
    }

    fn recover_strings(&mut self) {
        let requests = std::mem::take(&mut self.strings);
        if !requests.is_empty() {
            debug!("Recovering {} string groups", requests.len());
        }

        for request in requests {
            match request {
                StringRequest::Single(address) => self.fill_string(address, None),
                StringRequest::Table {
                    head,
                    mut destinations,
                } => {
                    let count = match self.script.entry_at(head) {
                        Some(Entry::PointerTable(table)) => table.labels.len(),
                        _ => 0,
                    };
                    destinations.truncate(count);
                    destinations.sort_unstable();
                    destinations.dedup();

                    for (index, start) in destinations.iter().enumerate() {
                        let max_chars = destinations
                            .get(index + 1)
                            .map(|next| ((next - start) / 2) as usize);
                        self.fill_string(*start, max_chars);
                    }
                }
            }
        }
    }

    /// Decode a packed string at `address`, bounded by `max_chars` half-words.
    fn fill_string(&mut self, address: u32, max_chars: Option<usize>) {
        if !self.script.is_unset(address) {
            return;
        }

        let limit = max_chars.unwrap_or(usize::MAX);
        let mut chars = Vec::new();
        let mut terminated = false;

        let mut half = 0usize;
        while half < limit {
            let slot = address + (half / 2) as u32 * WORD_SIZE;
            if (slot / WORD_SIZE) as usize >= self.words.len() {
                break;
            }
            if half % 2 == 0 && !self.script.is_unset(slot) {
                break;
            }

            let code = (self.word_at(slot) >> ((half % 2) * 16)) as u16;
            if code == STRING_SENTINEL {
                terminated = true;
                break;
            }
            chars.push(code);
            half += 1;
        }

        let string = EncodedString {
            address,
            chars,
            terminated,
        };
        if string.stored_len() == 0 {
            return;
        }

        let width = string.width();
        if string.stored_len() % 2 == 1 {
            let last = address + (width as u32 - 1) * WORD_SIZE;
            if self.word_at(last) >> 16 != 0 {
                warn!("String at {:x} does not end on a word boundary, leaving as data", address);
                self.diagnose(address, DiagnosticKind::StringSkipped);
                return;
            }
        }

        trace!("String at {:x}: {} chars", address, string.chars.len());
        self.script.set(address, Entry::EncodedString(string));
        for slot in 1..width as u32 {
            self.script.set(
                address + slot * WORD_SIZE,
                Entry::Continuation { head: address },
            );
        }
    }

    fn fill_data(&mut self) {
        for index in 0..self.words.len() {
            let address = index as u32 * WORD_SIZE;
            if self.script.is_unset(address) {
                self.script.set(
                    address,
                    Entry::RawData {
                        address,
                        value: self.words[index],
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::encode_header;
    use pretty_assertions::assert_eq;

    const RETURN: Word = 0x49;

    fn inline(displacement: i16) -> Word {
        0x0900_0000 | u32::from(displacement as u16)
    }

    fn disassemble(words: &[Word]) -> (Script, DisassemblyStats) {
        let meta = Meta::new();
        let mut disassembler = Disassembler::new(&meta);
        let script = disassembler.disassemble_words(words).unwrap();
        (script, disassembler.stats().clone())
    }

    fn round_trip(meta: &Meta, words: &[Word]) -> Script {
        let script = Disassembler::new(meta).disassemble_words(words).unwrap();
        assert_eq!(crate::compiler::compile(&script).unwrap(), words.to_vec());
        script
    }

    fn branch_meta(kinds: &[&str]) -> Meta {
        let params: Vec<String> = kinds
            .iter()
            .enumerate()
            .map(|(index, kind)| {
                format!(
                    r#"{{ "direction": "in", "type": "int", "name": "p{index}", "branch": "{kind}" }}"#
                )
            })
            .collect();
        Meta::from_json(&format!(
            r#"{{ "methods": [ {{ "name": "branchy", "params": [ {} ] }} ] }}"#,
            params.join(", ")
        ))
        .unwrap()
    }

    #[test]
    fn test_scenario() {
        let words = [0x4, encode_header(8, 2, 0), 5, 0x0200_0002, RETURN];
        let (script, _) = disassemble(&words);

        assert_eq!(
            script.entries[0],
            Entry::Entrypoint(Entrypoint {
                address: 0,
                destination: "LABEL_0".to_string(),
            })
        );
        let mov = script.instruction_at(4).unwrap();
        assert_eq!(mov.opcode, Opcode::Mov);
        assert_eq!(mov.operands[0].mode, AddressingMode::Immediate);
        assert_eq!(mov.operands[0].resolved, Some(5));
        assert_eq!(mov.operands[1].mode, AddressingMode::Storage);
        assert_eq!(script.instruction_at(16).unwrap().opcode, Opcode::Return);
        assert!(script.diagnostics.is_empty());
    }

    #[test]
    fn test_revisiting_a_branch_decodes_nothing() {
        // yield; jmp back to the yield
        let words = [0x4, 0x0, encode_header(64, 1, 0), inline(-1)];
        let (script, stats) = disassemble(&words);

        assert_eq!(stats.headers_decoded, 2);
        assert_eq!(stats.branches_probed, 1);
        assert_eq!(script.labels.names_at(4), ["LABEL_0"]);
    }

    #[test]
    fn test_shared_entrypoints_decode_once() {
        let (script, stats) = disassemble(&[0x8, 0x8, RETURN]);
        assert_eq!(script.entrypoints, vec![8, 8]);
        assert_eq!(script.labels.names_at(8), ["LABEL_0", "LABEL_1"]);
        assert_eq!(stats.headers_decoded, 1);
    }

    #[test]
    fn test_conditional_jump_explores_both_paths() {
        let words = [
            0x4,
            encode_header(65, 3, 2),
            0x0200_0000,
            0x1,
            inline(6),
            RETURN,
            0xdead_beef,
            RETURN,
        ];
        let (script, _) = disassemble(&words);

        assert_eq!(script.branches.iter().copied().collect::<Vec<_>>(), vec![4, 20, 28]);
        assert_eq!(script.labels.name_at(28), Some("LABEL_1"));
        assert_eq!(script.instruction_at(20).unwrap().opcode, Opcode::Return);
        assert_eq!(
            script.entries[6],
            Entry::RawData {
                address: 24,
                value: 0xdead_beef
            }
        );
    }

    #[test]
    fn test_gosub_records_subroutine() {
        let words = [0x4, encode_header(72, 1, 0), inline(3), RETURN, RETURN];
        let (script, _) = disassemble(&words);

        assert!(script.subroutines.contains(&16));
        assert_eq!(script.instruction_at(12).unwrap().opcode, Opcode::Return);
        assert_eq!(script.instruction_at(16).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_out_of_range_pointer_becomes_zero() {
        let words = [0x4, encode_header(72, 1, 0), inline(0x100), RETURN];
        let (script, _) = disassemble(&words);

        let gosub = script.instruction_at(4).unwrap();
        assert_eq!(gosub.operands[0], Operand::zeroed(8, vec![inline(0x100)]));
        assert_eq!(gosub.operands[0].raw_words, vec![0]);
        assert!(script.diagnostics.iter().any(|d| matches!(
            d.kind,
            DiagnosticKind::PointerOutOfRange { destination: 0x404 }
        )));
        assert!(script.diagnostics.iter().any(|d| matches!(
            d.kind,
            DiagnosticKind::InvalidBranchTarget { destination: 0 }
        )));
        assert!(!script.labels.contains_address(0x404));
        assert!(script.subroutines.is_empty());
        assert_eq!(script.instruction_at(12).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_out_of_range_table_operand_keeps_width() {
        // mov inl[0x404 table], stor[1]; return
        let words = [0x4, encode_header(8, 2, 0), 0x0c00_0100, 0x0000_0102, 0x0200_0001, RETURN];
        let script = Disassembler::new(&Meta::new()).disassemble_words(&words).unwrap();

        let mov = script.instruction_at(4).unwrap();
        assert_eq!(mov.width(), 4);
        assert_eq!(mov.operands[0].raw_words, vec![0, 0x102]);
        assert_eq!(mov.operands[1].address, 16);
        assert_eq!(script.instruction_at(20).unwrap().opcode, Opcode::Return);
        assert_eq!(
            script.diagnostics,
            vec![Diagnostic {
                address: 8,
                kind: DiagnosticKind::PointerOutOfRange { destination: 0x404 },
            }]
        );
        assert_eq!(
            crate::compiler::compile(&script).unwrap(),
            vec![0x4, encode_header(8, 2, 0), 0, 0x102, 0x0200_0001, RETURN]
        );
    }

    #[test]
    fn test_fork_records_reentry_and_falls_through() {
        let words = [0x4, encode_header(86, 3, 0), 0, inline(5), 0, RETURN, RETURN];
        let script = round_trip(&Meta::new(), &words);

        assert_eq!(script.reentry_points.iter().copied().collect::<Vec<_>>(), vec![24]);
        assert_eq!(script.instruction_at(20).unwrap().opcode, Opcode::Return);
        assert_eq!(script.instruction_at(24).unwrap().opcode, Opcode::Return);
        assert!(script.labels.contains_address(24));
        assert!(script.diagnostics.is_empty());
    }

    #[test]
    fn test_call_branch_kinds() {
        let meta = branch_meta(&["jump", "subroutine", "reentry", "GOSUB"]);
        let words = [
            0x4,
            encode_header(56, 4, 0),
            inline(6),
            inline(7),
            inline(8),
            inline(9),
            RETURN,
            RETURN,
            RETURN,
            RETURN,
            RETURN,
        ];
        let script = round_trip(&meta, &words);

        for target in [24, 28, 32, 36, 40] {
            assert_eq!(script.instruction_at(target).unwrap().opcode, Opcode::Return);
        }
        assert!(script.branches.contains(&28));
        assert_eq!(script.subroutines.iter().copied().collect::<Vec<_>>(), vec![32, 40]);
        assert_eq!(script.reentry_points.iter().copied().collect::<Vec<_>>(), vec![36]);
        assert!(script.jump_table_destinations.is_empty());
        assert!(script.diagnostics.is_empty());
    }

    #[test]
    fn test_call_arity_mismatch() {
        let meta = branch_meta(&["subroutine"]);
        let script = round_trip(&meta, &[0x4, encode_header(56, 0, 0), RETURN]);

        assert_eq!(
            script.diagnostics,
            vec![Diagnostic {
                address: 4,
                kind: DiagnosticKind::CallArityMismatch {
                    expected: 1,
                    actual: 0
                },
            }]
        );
        assert_eq!(script.instruction_at(8).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_call_table_param_follows_entries() {
        let meta = branch_meta(&["subroutine"]);
        let words = [0x4, encode_header(56, 1, 0), 0x0b00_0003, RETURN, 2, RETURN, RETURN];
        let script = round_trip(&meta, &words);

        match &script.entries[4] {
            Entry::PointerTable(table) => assert_eq!(table.labels.len(), 1),
            other => panic!("expected a table, got {other:?}"),
        }
        assert!(script.table_addresses.contains(&16));
        assert_eq!(script.subroutines.iter().copied().collect::<Vec<_>>(), vec![24]);
        assert_eq!(script.instruction_at(12).unwrap().opcode, Opcode::Return);
        assert_eq!(script.instruction_at(24).unwrap().opcode, Opcode::Return);
        assert!(matches!(script.entries[5], Entry::RawData { value: RETURN, .. }));
        assert!(script.diagnostics.is_empty());
    }

    #[test]
    fn test_gosub_table_continues() {
        let words = [
            0x4,
            encode_header(74, 2, 0),
            0x0200_0000,
            inline(4),
            RETURN,
            2,
            RETURN,
            RETURN,
        ];
        let script = round_trip(&Meta::new(), &words);

        assert_eq!(script.instruction_at(16).unwrap().opcode, Opcode::Return);
        assert!(script.table_addresses.contains(&20));
        assert_eq!(script.subroutines.iter().copied().collect::<Vec<_>>(), vec![28]);
        assert_eq!(script.instruction_at(28).unwrap().opcode, Opcode::Return);
        assert!(script.jump_table_destinations.is_empty());
    }

    #[test]
    fn test_table_of_tables() {
        // jmp_table stor[0], inl[16[16[stor[0]]]]; outer table at 16, inner at 20
        let words = [
            0x4,
            encode_header(68, 2, 0),
            0x0200_0000,
            0x0b00_0003,
            1,
            2,
            RETURN,
            RETURN,
        ];
        let script = round_trip(&Meta::new(), &words);

        for head in [16, 20] {
            match script.entry_at(head) {
                Some(Entry::PointerTable(table)) => assert_eq!(table.labels.len(), 1),
                other => panic!("expected a table at {head}, got {other:?}"),
            }
        }
        assert_eq!(
            script.table_addresses.iter().copied().collect::<Vec<_>>(),
            vec![16, 20]
        );
        assert_eq!(
            script.jump_table_destinations.iter().copied().collect::<Vec<_>>(),
            vec![28]
        );
        assert_eq!(script.instruction_at(28).unwrap().opcode, Opcode::Return);
        assert!(matches!(script.entries[6], Entry::RawData { value: RETURN, .. }));
    }

    #[test]
    fn test_unsupported_mode_abandons_one_path() {
        // Two entrypoints: incr with a 0x15 operand, and a plain return
        let words = [0x8, 0x10, encode_header(27, 1, 0), 0x1500_0000, RETURN];
        let script = round_trip(&Meta::new(), &words);

        assert_eq!(script.entrypoints, vec![8, 16]);
        assert!(script.diagnostics.iter().any(|d| {
            d.address == 8 && d.kind == DiagnosticKind::UnsupportedMode { tag: 0x15 }
        }));
        assert!(matches!(script.entries[2], Entry::RawData { address: 8, .. }));
        assert!(matches!(script.entries[3], Entry::RawData { value: 0x1500_0000, .. }));
        assert_eq!(script.instruction_at(16).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_unknowable_jump_falls_through() {
        let words = [0x4, encode_header(64, 1, 0), 0x0200_0003, RETURN];
        let (script, _) = disassemble(&words);

        assert_eq!(
            script.diagnostics[0].kind,
            DiagnosticKind::UnknowableOperand {
                opcode: "jmp".to_string()
            }
        );
        assert_eq!(script.instruction_at(12).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_invalid_header_ends_path() {
        let words = [0x4, encode_header(8, 2, 0), 5, 0x0200_0002, 0xffff_ffff];
        let (script, _) = disassemble(&words);

        assert_eq!(script.diagnostics.len(), 1);
        assert_eq!(script.diagnostics[0].address, 16);
        assert!(matches!(script.entries[4], Entry::RawData { value: 0xffff_ffff, .. }));
    }

    #[test]
    fn test_jump_table() {
        let words = [
            0x4,
            encode_header(68, 2, 0),
            0x0200_0000,
            inline(3),
            2,
            3,
            RETURN,
            RETURN,
        ];
        let (script, _) = disassemble(&words);

        match &script.entries[4] {
            Entry::PointerTable(table) => assert_eq!(table.labels, vec!["LABEL_2", "LABEL_3"]),
            other => panic!("expected a table, got {other:?}"),
        }
        assert_eq!(script.entries[5], Entry::Continuation { head: 16 });
        assert!(script.table_addresses.contains(&16));
        assert!(script.jump_table_destinations.contains(&24));
        assert!(script.jump_table_destinations.contains(&28));
        assert_eq!(script.instruction_at(28).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_empty_table_is_fatal() {
        let words = [0x4, encode_header(68, 2, 0), 0x0200_0000, inline(3), 0x100];
        let meta = Meta::new();
        let err = Disassembler::new(&meta).disassemble_words(&words).unwrap_err();
        assert!(matches!(err, ScriptError::EmptyTable { address: 16 }));
    }

    #[test]
    fn test_unknown_call_is_fatal() {
        let words = [0x4, encode_header(56, 0, 3), RETURN];
        let meta = Meta::new();
        let err = Disassembler::new(&meta).disassemble_words(&words).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownCall { index: 3, address: 4 }));
    }

    #[test]
    fn test_extra_branch() {
        let words = [0x4, RETURN, RETURN];
        let meta = Meta::new();

        let plain = Disassembler::new(&meta).disassemble_words(&words).unwrap();
        assert!(matches!(plain.entries[2], Entry::RawData { .. }));

        let options = DisassemblerOptions::new().with_extra_branch(8);
        let script = Disassembler::with_options(&meta, options)
            .disassemble_words(&words)
            .unwrap();
        assert_eq!(script.instruction_at(8).unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn test_no_entrypoints_is_all_data() {
        let (script, _) = disassemble(&[0xffff_ffff, 0x1234]);
        assert!(script
            .entries
            .iter()
            .all(|entry| matches!(entry, Entry::RawData { .. })));
    }

    #[test]
    fn test_misaligned_bytes() {
        let meta = Meta::new();
        let err = Disassembler::new(&meta).disassemble(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, ScriptError::MisalignedImage { length: 3 }));
    }

    #[test]
    fn test_string_with_dangling_half_is_skipped() {
        let meta = Meta::from_json(
            r#"{ "methods": [ { "name": "text", "params": [
                { "direction": "in", "type": "string", "name": "text" } ] } ] }"#,
        )
        .unwrap();
        // call text, inl[16]; return; "ij" <end> with junk in the last half-word
        let words = [0x4, encode_header(56, 1, 0), inline(3), RETURN, 0x0042_0041, 0x5555_a0ff];
        let script = Disassembler::new(&meta).disassemble_words(&words).unwrap();

        assert!(script
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::StringSkipped && d.address == 16));
        assert!(matches!(script.entries[4], Entry::RawData { .. }));
    }
}
