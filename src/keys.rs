// Symbolic key name -> VT terminal byte sequence.

use crate::error::ControlError;

/// Encode a symbolic key name into the bytes a VT-style terminal would
/// transmit for it. Names are case-insensitive and trimmed.
///
/// Resolution order: `ctrl+<letter>` combinations, the named-key table,
/// then a single character passed through verbatim. Anything else is an
/// `UnknownKey` error.
pub fn encode_key(name: &str) -> Result<Vec<u8>, ControlError> {
    let trimmed = name.trim();
    let key = trimmed.to_ascii_lowercase();

    if let Some(letter) = key.strip_prefix("ctrl+") {
        let mut chars = letter.chars();
        if let (Some(c @ 'a'..='z'), None) = (chars.next(), chars.next()) {
            return Ok(vec![c as u8 - b'a' + 1]);
        }
        return Err(ControlError::UnknownKey(trimmed.to_string()));
    }

    if let Some(bytes) = named_key(&key) {
        return Ok(bytes.to_vec());
    }

    // Single character: transmitted as-is, original case preserved.
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(c.to_string().into_bytes());
    }

    Err(ControlError::UnknownKey(trimmed.to_string()))
}

fn named_key(key: &str) -> Option<&'static [u8]> {
    Some(match key {
        "enter" | "return" => b"\r",
        "tab" => b"\t",
        "escape" | "esc" => b"\x1b",
        "backspace" => b"\x7f",
        "space" => b" ",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "insert" => b"\x1b[2~",
        "delete" => b"\x1b[3~",
        "f1" => b"\x1bOP",
        "f2" => b"\x1bOQ",
        "f3" => b"\x1bOR",
        "f4" => b"\x1bOS",
        "f5" => b"\x1b[15~",
        "f6" => b"\x1b[17~",
        "f7" => b"\x1b[18~",
        "f8" => b"\x1b[19~",
        "f9" => b"\x1b[20~",
        "f10" => b"\x1b[21~",
        "f11" => b"\x1b[23~",
        "f12" => b"\x1b[24~",
        _ => return None,
    })
}
