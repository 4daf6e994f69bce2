//! Stream disassembly.
//!
//! [`disassemble`] renders a byte stream the way `pickletools.dis`
//! does: one line per opcode carrying its offset, the opcode byte, the
//! name indented by MARK depth, and the decoded argument, then a
//! trailer naming the highest protocol any opcode requires. Decoding
//! every opcode is a structural check in itself, so the disassembler
//! doubles as a stream validator.

use num_bigint::BigInt;

use crate::compiler::opcode;
use crate::pyrepr;
use crate::stream::{self, Op, OpArg, StreamError};

/// Renders a stream in `pickletools.dis` format.
pub fn disassemble(data: &[u8]) -> Result<String, StreamError> {
    let mut out = String::new();
    let mut marks: Vec<usize> = Vec::new();
    let mut highest: u8 = 0;

    for op in stream::read_all(data)? {
        highest = highest.max(op.info.proto);

        let mut line = format!(
            "{:5}: {:<4} {}{}",
            op.start,
            code_repr(op.info.code),
            "    ".repeat(marks.len()),
            op.info.name,
        );
        let mark_note = if consumes_mark(op.info.code) {
            marks.pop().map(|at| format!("(MARK at {at})"))
        } else {
            None
        };
        if op.info.code == opcode::MARK {
            marks.push(op.start);
        }

        let arg = arg_repr(&op)?;
        if arg.is_some() || mark_note.is_some() {
            line.push_str(&" ".repeat(10usize.saturating_sub(op.info.name.len())));
            if let Some(arg) = arg {
                line.push(' ');
                line.push_str(&arg);
            }
            if let Some(note) = mark_note {
                line.push(' ');
                line.push_str(&note);
            }
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str(&format!("highest protocol among opcodes = {highest}\n"));
    Ok(out)
}

/// The opcode byte the way `repr` shows a one-character string.
fn code_repr(code: u8) -> String {
    if (0x20..=0x7e).contains(&code) {
        (code as char).to_string()
    } else {
        format!("\\x{code:02x}")
    }
}

fn consumes_mark(code: u8) -> bool {
    matches!(
        code,
        opcode::POP_MARK
            | opcode::TUPLE
            | opcode::LIST
            | opcode::DICT
            | opcode::INST
            | opcode::APPENDS
            | opcode::SETITEMS
            | opcode::FROZENSET
            | opcode::ADDITEMS
    )
}

fn arg_repr(op: &Op<'_>) -> Result<Option<String>, StreamError> {
    let text = match (&op.arg, op.info.code) {
        (OpArg::None, _) => return Ok(None),
        (OpArg::Uint(value), _) => value.to_string(),
        (OpArg::Int(value), _) => value.to_string(),
        (OpArg::Float(value), _) => pyrepr::float_repr(*value),
        (OpArg::Line(line), opcode::INT) => int_line_repr(line, op.start)?,
        (OpArg::Line(line), opcode::FLOAT) => std::str::from_utf8(line)
            .ok()
            .and_then(|text| text.parse::<f64>().ok())
            .map(pyrepr::float_repr)
            .ok_or_else(|| malformed("invalid FLOAT line", op.start))?,
        (OpArg::Line(line), opcode::UNICODE) => {
            pyrepr::str_repr(&pyrepr::decode_raw_unicode_escape(line))
        }
        // GET and PUT lines hold a decimal memo index.
        (OpArg::Line(line), _) => std::str::from_utf8(line)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .map(|slot| slot.to_string())
            .ok_or_else(|| malformed("invalid memo index", op.start))?,
        (OpArg::Pair(module, name), _) => pyrepr::str_repr(&format!(
            "{} {}",
            String::from_utf8_lossy(module),
            String::from_utf8_lossy(name),
        )),
        (
            OpArg::Bytes(payload),
            opcode::BINBYTES | opcode::SHORT_BINBYTES | opcode::BINBYTES8,
        ) => pyrepr::bytes_repr(payload),
        (OpArg::Bytes(payload), _) => std::str::from_utf8(payload)
            .map(pyrepr::str_repr)
            .map_err(|_| malformed("invalid utf-8 in string", op.start))?,
    };
    Ok(Some(text))
}

/// Proto 0 INT lines spell booleans as `01` and `00`.
fn int_line_repr(line: &[u8], at: usize) -> Result<String, StreamError> {
    match line {
        b"01" => Ok("True".to_string()),
        b"00" => Ok("False".to_string()),
        _ => BigInt::parse_bytes(line, 10)
            .map(|value| value.to_string())
            .ok_or_else(|| malformed("invalid INT line", at)),
    }
}

fn malformed(message: &str, at: usize) -> StreamError {
    StreamError::Malformed {
        message: message.to_string(),
        at,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_binary_stream() {
        let listing = disassemble(b"\x80\x04K\x01\x940h\x00\x940N.").unwrap();
        let expected = "    0: \\x80 PROTO      4
    2: K    BININT1    1
    4: \\x94 MEMOIZE
    5: 0    POP
    6: h    BINGET     0
    8: \\x94 MEMOIZE
    9: 0    POP
   10: N    NONE
   11: .    STOP
highest protocol among opcodes = 4
";
        assert_eq!(listing, expected);
    }

    #[test]
    fn test_mark_indentation() {
        let listing = disassemble(b"(I1\nI2\nt.").unwrap();
        let expected = "    0: (    MARK
    1: I        INT        1
    4: I        INT        2
    7: t        TUPLE      (MARK at 0)
    8: .    STOP
highest protocol among opcodes = 0
";
        assert_eq!(listing, expected);
    }

    #[test]
    fn test_text_arguments() {
        let listing = disassemble(b"cos\nsystem\nVcaf\\u00e9\nI01\n.").unwrap();
        let expected = "    0: c    GLOBAL     'os system'
   11: V    UNICODE    'caf\u{e9}'
   22: I    INT        True
   26: .    STOP
highest protocol among opcodes = 0
";
        assert_eq!(listing, expected);
    }

    #[test]
    fn test_string_and_float_arguments() {
        let listing =
            disassemble(b"\x80\x04\x8c\x02hiG@\t\x1e\xb8Q\xeb\x85\x1fC\x01\xff.").unwrap();
        let expected = "    0: \\x80 PROTO      4
    2: \\x8c SHORT_BINUNICODE 'hi'
    6: G    BINFLOAT   3.14
   15: C    SHORT_BINBYTES b'\\xff'
   18: .    STOP
highest protocol among opcodes = 4
";
        assert_eq!(listing, expected);
    }

    #[test]
    fn test_rejects_truncated_stream() {
        assert_eq!(
            disassemble(b"\x80").unwrap_err(),
            StreamError::Truncated { at: 1 }
        );
    }
}
