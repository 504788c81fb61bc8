//! End-to-end disassembly and recompilation through the public API.

use lod_script::{
    compile, disassemble, DiagnosticKind, Entry, ListingFormatter, Meta, Opcode, Script,
    ScriptFormatter,
};
use pretty_assertions::assert_eq;
use std::path::Path;

const RETURN: u32 = 0x49;

const META: &str = r#"{
    "methods": [
        {
            "name": "Scus94491BpeSegment_8002::textbox",
            "params": [
                { "direction": "in", "type": "int", "name": "index" },
                { "direction": "in", "type": "string", "name": "text" }
            ]
        },
        {
            "name": "Scus94491BpeSegment_8002::say",
            "params": [
                { "direction": "in", "type": "string", "name": "text" }
            ]
        }
    ]
}"#;

fn image(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn inline(displacement: i16) -> u32 {
    0x0900_0000 | u32::from(displacement as u16)
}

fn round_trip(words: &[u32], meta: &Meta) -> Script {
    let bytes = image(words);
    let script = disassemble(&bytes, meta).unwrap();
    assert_eq!(compile(&script).unwrap(), bytes);
    script
}

fn assert_widths_tile(script: &Script) {
    let mut expected = 0;
    for (address, entry) in script.heads() {
        assert_eq!(address, expected, "gap or overlap before {address:#x}");
        expected += entry.width().unwrap() as u32 * 4;
    }
    assert_eq!(expected, script.byte_len());
}

/// Entrypoint, jump table at 20, a jump back into the table's third slot.
fn overrun_image() -> Vec<u32> {
    let mut words = vec![
        8,
        32,
        0x0244,
        0x0200_0000,
        inline(3),
        5,
        6,
        RETURN,
        0x0140,
        inline(-1),
        RETURN,
        RETURN,
    ];
    words.resize(78, 0xffff_ffff);
    words.push(RETURN);
    words
}

#[test]
fn test_scenario() {
    let script = round_trip(&[0x4, 0x0208, 5, 0x0200_0002, RETURN], &Meta::new());

    assert_eq!(script.entrypoints, vec![4]);
    assert_eq!(script.instruction_at(4).unwrap().opcode, Opcode::Mov);
    assert_eq!(script.instruction_at(16).unwrap().opcode, Opcode::Return);
    assert!(script.diagnostics.is_empty());
    assert_widths_tile(&script);
}

#[test]
fn test_conditional_jump() {
    let words = [
        0x4,
        0x0002_0341,
        0x0200_0000,
        0x1,
        inline(6),
        RETURN,
        0xdead_beef,
        RETURN,
    ];
    let script = round_trip(&words, &Meta::new());

    assert!(script.branches.contains(&20));
    assert!(script.branches.contains(&28));
    assert!(matches!(script.entries[6], Entry::RawData { value: 0xdead_beef, .. }));
}

#[test]
fn test_jump_table() {
    let words = [0x4, 0x0244, 0x0200_0000, inline(3), 2, 3, RETURN, RETURN];
    let script = round_trip(&words, &Meta::new());

    assert!(script.table_addresses.contains(&16));
    assert_eq!(
        script.jump_table_destinations.iter().copied().collect::<Vec<_>>(),
        vec![24, 28]
    );
    assert_widths_tile(&script);
}

#[test]
fn test_table_overrun_is_truncated() {
    let words = overrun_image();
    assert_eq!(words.len(), 79);
    let script = round_trip(&words, &Meta::new());

    match &script.entries[5] {
        Entry::PointerTable(table) => assert_eq!(table.labels.len(), 2),
        other => panic!("expected a table at 20, got {other:?}"),
    }
    assert_eq!(script.entries[6], Entry::Continuation { head: 20 });
    assert_eq!(script.instruction_at(28).unwrap().opcode, Opcode::Return);
    assert!(!script.labels.contains_address(312));
    assert_eq!(
        script.jump_table_destinations.iter().copied().collect::<Vec<_>>(),
        vec![40, 44]
    );
    assert!(script
        .diagnostics
        .iter()
        .any(|d| d.address == 20 && d.kind == DiagnosticKind::TableOverrun { kept: 2, dropped: 1 }));
    assert_widths_tile(&script);
}

#[test]
fn test_string_parameter() {
    let meta = Meta::from_json(META).unwrap();
    let words = [0x4, 0x0238, 1, inline(4), RETURN, 0x0041_0026, 0xa0ff_0006];
    let script = round_trip(&words, &meta);

    match &script.entries[5] {
        Entry::EncodedString(string) => {
            assert_eq!(string.chars, vec![0x26, 0x41, 0x06]);
            assert!(string.terminated);
        }
        other => panic!("expected a string, got {other:?}"),
    }

    let listing = ListingFormatter::new().format_script(&script, &meta, Path::new("s.bin"));
    assert!(listing.contains("data str[Hi!]"));
    assert!(listing.contains("call Scus94491BpeSegment_8002::textbox, 0x1, inl[:LABEL_1]"));
}

#[test]
fn test_single_character_string() {
    let meta = Meta::from_json(META).unwrap();
    let words = [0x4, 0x0001_0138, inline(3), RETURN, 0xa0ff_0041];
    let script = round_trip(&words, &meta);

    match &script.entries[4] {
        Entry::EncodedString(string) => {
            assert_eq!(string.chars, vec![0x41]);
            assert_eq!(string.width(), 1);
        }
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn test_string_table() {
    let meta = Meta::from_json(META).unwrap();
    let words = [
        0x4,
        0x0238,
        0,
        0x0b00_0004,
        RETURN,
        2,
        3,
        0xa0ff_001f,
        0xa0ff_0020,
        0,
    ];
    let script = round_trip(&words, &meta);

    match &script.entries[5] {
        Entry::PointerTable(table) => assert_eq!(table.labels.len(), 2),
        other => panic!("expected a pointer table, got {other:?}"),
    }
    assert!(matches!(&script.entries[7], Entry::EncodedString(s) if s.chars == [0x1f]));
    assert!(matches!(&script.entries[8], Entry::EncodedString(s) if s.chars == [0x20]));
    assert!(matches!(script.entries[9], Entry::RawData { value: 0, .. }));

    let listing = ListingFormatter::bare().format_script(&script, &meta, Path::new("s.bin"));
    assert!(listing.contains("rel :LABEL_2\nrel :LABEL_3\n"));
    assert!(listing.contains("LABEL_2:\ndata str[A]\nLABEL_3:\ndata str[B]\n"));
}

#[test]
fn test_disassembly_is_deterministic() {
    let meta = Meta::new();
    let bytes = image(&overrun_image());

    let first = disassemble(&bytes, &meta).unwrap();
    let second = disassemble(&bytes, &meta).unwrap();
    assert_eq!(first, second);

    let recompiled = compile(&first).unwrap();
    assert_eq!(disassemble(&recompiled, &meta).unwrap(), first);
}

#[test]
fn test_json_model_round_trip() {
    let meta = Meta::from_json(META).unwrap();
    let words = [0x4, 0x0238, 1, inline(4), RETURN, 0x0041_0026, 0xa0ff_0006];
    let script = disassemble(&image(&words), &meta).unwrap();

    let json = script.to_json().unwrap();
    let restored = Script::from_json(&json).unwrap();
    assert_eq!(restored, script);
    assert_eq!(compile(&restored).unwrap(), image(&words));
}

#[test]
fn test_edited_model_compiles() {
    let words = [0x4, 0x0208, 5, 0x0200_0002, RETURN];
    let mut script = disassemble(&image(&words), &Meta::new()).unwrap();

    if let Some(Entry::Instruction(mov)) = script.entries.get_mut(1) {
        mov.operands[0].raw_words = vec![7];
    }
    assert_eq!(
        compile(&script).unwrap(),
        image(&[0x4, 0x0208, 7, 0x0200_0002, RETURN])
    );
}
