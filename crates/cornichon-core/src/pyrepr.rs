//! Python literal rendering.
//!
//! The disassembler, the reference loader, and the command line all
//! print values the way `repr` would, so the conventions live here.
//! The raw-unicode-escape codec for protocol 0 text lines does too.

/// Renders a float the way `repr` does.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == value.trunc() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Renders a string the way `repr` does: single-quoted unless the text
/// holds single quotes and no double quotes, control characters as
/// backslash escapes.
pub fn str_repr(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if (ch as u32) < 0x20 || (0x7f..=0xa0).contains(&(ch as u32)) => {
                out.push_str(&format!("\\x{:02x}", ch as u32));
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
    out
}

/// Renders a byte string as a Python bytes literal.
pub fn bytes_repr(value: &[u8]) -> String {
    let quote = if value.contains(&b'\'') && !value.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(value.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &byte in value {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            byte if byte == quote => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7e => out.push(byte as char),
            byte => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(quote as char);
    out
}

/// Encodes a string the way protocol 0 UNICODE lines expect: the line
/// breaks and backslash are escaped first, then everything above latin-1
/// becomes a `\u`/`\U` escape. Latin-1 characters pass through as bytes.
pub(crate) fn raw_unicode_escape(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.extend_from_slice(b"\\u005c"),
            '\0' => out.extend_from_slice(b"\\u0000"),
            '\n' => out.extend_from_slice(b"\\u000a"),
            '\r' => out.extend_from_slice(b"\\u000d"),
            '\u{1a}' => out.extend_from_slice(b"\\u001a"),
            ch if (ch as u32) <= 0xff => out.push(ch as u8),
            ch if (ch as u32) <= 0xffff => {
                out.extend_from_slice(format!("\\u{:04x}", ch as u32).as_bytes());
            }
            ch => {
                out.extend_from_slice(format!("\\U{:08x}", ch as u32).as_bytes());
            }
        }
    }
    out
}

/// Decodes a protocol 0 UNICODE line. Bytes are latin-1 except for the
/// `\u` and `\U` escapes; a backslash that starts neither passes
/// through, as the codec's decoder has it.
pub(crate) fn decode_raw_unicode_escape(line: &[u8]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        if byte == b'\\' && i + 1 < line.len() {
            let width = match line[i + 1] {
                b'u' => Some(4),
                b'U' => Some(8),
                _ => None,
            };
            if let Some(width) = width {
                let escape = line.get(i + 2..i + 2 + width);
                let decoded = escape
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .and_then(char::from_u32);
                if let Some(ch) = decoded {
                    out.push(ch);
                    i += 2 + width;
                    continue;
                }
            }
        }
        out.push(byte as char);
        i += 1;
    }
    out
}
