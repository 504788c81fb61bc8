//! Game text encoding.
//!
//! Strings are sequences of 16-bit code points. Values below 0x56 are
//! printable glyphs; a handful of high values are control codes, some of
//! which carry an 8-bit parameter in their low byte.

use crate::error::{Result, ScriptError};
use crate::script::STRING_SENTINEL;

/// Printable glyphs, indexed by code point.
const GLYPHS: &[char] = &[
    ' ', ',', '.', '\u{b7}', ':', '?', '!', '_', '/', '\'', '"', '(', ')', '-', '`', '%', '&', '*',
    '@', '+', '~', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
    'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '[', ']', ';',
];

/// A text control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// Name used in listings, e.g. `line`
    pub name: &'static str,
    /// Code point; the low byte is masked off when `has_param` is set
    pub code: u16,
    /// Whether the low byte is a parameter
    pub has_param: bool,
}

/// Known control codes.
pub const CONTROLS: &[Control] = &[
    Control { name: "line", code: 0xa1ff, has_param: false },
    Control { name: "multibox", code: 0xa3ff, has_param: false },
    Control { name: "speed", code: 0xa500, has_param: true },
    Control { name: "colour", code: 0xa700, has_param: true },
    Control { name: "var", code: 0xa800, has_param: true },
    Control { name: "sauto", code: 0xb000, has_param: true },
    Control { name: "element", code: 0xb100, has_param: true },
    Control { name: "arrow", code: 0xb200, has_param: true },
];

/// Marker suppressing the implicit terminator when encoding.
pub const NO_TERMINATOR: &str = "<noterm>";

fn control_for(code: u16) -> Option<&'static Control> {
    if code & 0xff00 == 0 {
        return None;
    }
    CONTROLS.iter().find(|control| {
        if control.has_param {
            control.code & 0xff00 == code & 0xff00
        } else {
            control.code == code
        }
    })
}

/// Render code points as display text.
///
/// Unknown values are kept as `<chr=0x..>` so the text stays lossless.
pub fn decode(chars: &[u16]) -> String {
    let mut out = String::with_capacity(chars.len());

    for &code in chars {
        if let Some(control) = control_for(code) {
            if control.has_param {
                out.push_str(&format!("<{}={}>", control.name, code & 0xff));
            } else {
                out.push_str(&format!("<{}>", control.name));
            }
            continue;
        }

        match GLYPHS.get(usize::from(code)) {
            Some(glyph) => out.push(*glyph),
            None => {
                tracing::warn!("Found invalid character {:x}", code);
                out.push_str(&format!("<chr=0x{code:x}>"));
            }
        }
    }

    out
}

fn parse_number(text: &str) -> Option<u16> {
    match text.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Encode display text into code points.
///
/// The terminator is appended unless the text contains `<noterm>`.
pub fn encode(text: &str) -> Result<Vec<u16>> {
    let mut out = Vec::with_capacity(text.len() + 1);
    let mut terminate = true;
    let mut rest = text;

    while let Some(chr) = rest.chars().next() {
        if chr == '<' {
            let end = rest.find('>').ok_or(ScriptError::IllegalCharacter { character: '<' })?;
            let body = &rest[1..end];
            rest = &rest[end + 1..];

            let (name, param) = match body.split_once('=') {
                Some((name, param)) => (name, Some(param)),
                None => (body, None),
            };

            if name.eq_ignore_ascii_case("noterm") {
                terminate = false;
                continue;
            }

            let param = param.and_then(parse_number);
            if name.eq_ignore_ascii_case("chr") {
                out.push(param.ok_or(ScriptError::IllegalCharacter { character: '<' })?);
                continue;
            }

            let control = CONTROLS
                .iter()
                .find(|control| control.name.eq_ignore_ascii_case(name))
                .ok_or(ScriptError::IllegalCharacter { character: '<' })?;
            let code = match (control.has_param, param) {
                (true, Some(value)) => control.code | (value & 0xff),
                (true, None) => return Err(ScriptError::IllegalCharacter { character: '<' }),
                (false, _) => control.code,
            };
            out.push(code);
            continue;
        }

        let code = GLYPHS
            .iter()
            .position(|glyph| *glyph == chr)
            .ok_or(ScriptError::IllegalCharacter { character: chr })?;
        out.push(code as u16);
        rest = &rest[chr.len_utf8()..];
    }

    if terminate {
        out.push(STRING_SENTINEL);
    }

    Ok(out)
}
