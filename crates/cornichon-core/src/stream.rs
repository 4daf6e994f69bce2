//! Pickle stream scanning.
//!
//! [`StreamReader`] walks a finished byte stream opcode by opcode,
//! decoding each argument according to a static opcode table, the same
//! metadata `pickletools` keeps. The optimizer rewrites streams through
//! it, the disassembler renders them, and the reference loader executes
//! them; a malformed stream surfaces as a [`StreamError`] in all three.

use thiserror::Error;

use crate::compiler::opcode;

/// A malformed or unsupported byte stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The stream ended inside an opcode or its argument.
    #[error("stream truncated at offset {at}")]
    Truncated {
        /// Offset where more input was needed
        at: usize,
    },

    /// A byte that is not a recognized opcode.
    #[error("unknown opcode 0x{code:02x} at offset {at}")]
    UnknownOpcode {
        /// The unrecognized byte
        code: u8,
        /// Its offset
        at: usize,
    },

    /// An argument whose bytes do not decode as their kind requires.
    #[error("{message} at offset {at}")]
    Malformed {
        /// What failed to decode
        message: String,
        /// Offset of the opcode
        at: usize,
    },

    /// A GET-family opcode reading a slot no PUT has stored.
    #[error("memo slot {slot} fetched before it is stored")]
    UnboundSlot {
        /// The slot number
        slot: u64,
    },
}

/// How an opcode's argument is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// No argument bytes
    None,
    /// One unsigned byte
    U1,
    /// Two bytes, little-endian unsigned
    U2,
    /// Four bytes, little-endian signed
    I4,
    /// Four bytes, little-endian unsigned
    U4,
    /// Eight bytes, little-endian unsigned
    U8,
    /// Eight bytes, big-endian float
    F8,
    /// One newline-terminated line
    Line,
    /// Two newline-terminated lines
    TwoLines,
    /// Bytes prefixed by a one-byte length
    Bytes1,
    /// Bytes prefixed by a four-byte length
    Bytes4,
    /// Bytes prefixed by an eight-byte length
    Bytes8,
}

/// Static description of one opcode: wire byte, `pickletools` name,
/// argument encoding, and the protocol that introduced it.
#[derive(Debug)]
pub struct OpcodeInfo {
    /// The wire byte
    pub code: u8,
    /// The name `pickletools` uses
    pub name: &'static str,
    /// The argument encoding
    pub arg: ArgKind,
    /// The protocol that introduced this opcode
    pub proto: u8,
}

const fn op(code: u8, name: &'static str, arg: ArgKind, proto: u8) -> OpcodeInfo {
    OpcodeInfo {
        code,
        name,
        arg,
        proto,
    }
}

/// Every opcode this compiler can emit.
pub static OPCODES: &[OpcodeInfo] = &[
    // Protocol 0
    op(opcode::MARK, "MARK", ArgKind::None, 0),
    op(opcode::STOP, "STOP", ArgKind::None, 0),
    op(opcode::POP, "POP", ArgKind::None, 0),
    op(opcode::POP_MARK, "POP_MARK", ArgKind::None, 0),
    op(opcode::DUP, "DUP", ArgKind::None, 0),
    op(opcode::FLOAT, "FLOAT", ArgKind::Line, 0),
    op(opcode::INT, "INT", ArgKind::Line, 0),
    op(opcode::NONE, "NONE", ArgKind::None, 0),
    op(opcode::REDUCE, "REDUCE", ArgKind::None, 0),
    op(opcode::UNICODE, "UNICODE", ArgKind::Line, 0),
    op(opcode::APPEND, "APPEND", ArgKind::None, 0),
    op(opcode::BUILD, "BUILD", ArgKind::None, 0),
    op(opcode::GLOBAL, "GLOBAL", ArgKind::TwoLines, 0),
    op(opcode::DICT, "DICT", ArgKind::None, 0),
    op(opcode::GET, "GET", ArgKind::Line, 0),
    op(opcode::INST, "INST", ArgKind::TwoLines, 0),
    op(opcode::LIST, "LIST", ArgKind::None, 0),
    op(opcode::PUT, "PUT", ArgKind::Line, 0),
    op(opcode::SETITEM, "SETITEM", ArgKind::None, 0),
    op(opcode::TUPLE, "TUPLE", ArgKind::None, 0),
    // Protocol 1
    op(opcode::BININT, "BININT", ArgKind::I4, 1),
    op(opcode::BININT1, "BININT1", ArgKind::U1, 1),
    op(opcode::BININT2, "BININT2", ArgKind::U2, 1),
    op(opcode::BINUNICODE, "BINUNICODE", ArgKind::Bytes4, 1),
    op(opcode::APPENDS, "APPENDS", ArgKind::None, 1),
    op(opcode::BINGET, "BINGET", ArgKind::U1, 1),
    op(opcode::LONG_BINGET, "LONG_BINGET", ArgKind::U4, 1),
    op(opcode::BINPUT, "BINPUT", ArgKind::U1, 1),
    op(opcode::LONG_BINPUT, "LONG_BINPUT", ArgKind::U4, 1),
    op(opcode::SETITEMS, "SETITEMS", ArgKind::None, 1),
    op(opcode::EMPTY_DICT, "EMPTY_DICT", ArgKind::None, 1),
    op(opcode::EMPTY_LIST, "EMPTY_LIST", ArgKind::None, 1),
    op(opcode::EMPTY_TUPLE, "EMPTY_TUPLE", ArgKind::None, 1),
    op(opcode::BINFLOAT, "BINFLOAT", ArgKind::F8, 1),
    // Protocol 2
    op(opcode::PROTO, "PROTO", ArgKind::U1, 2),
    op(opcode::NEWOBJ, "NEWOBJ", ArgKind::None, 2),
    op(opcode::TUPLE1, "TUPLE1", ArgKind::None, 2),
    op(opcode::TUPLE2, "TUPLE2", ArgKind::None, 2),
    op(opcode::TUPLE3, "TUPLE3", ArgKind::None, 2),
    op(opcode::NEWTRUE, "NEWTRUE", ArgKind::None, 2),
    op(opcode::NEWFALSE, "NEWFALSE", ArgKind::None, 2),
    // Protocol 3
    op(opcode::BINBYTES, "BINBYTES", ArgKind::Bytes4, 3),
    op(opcode::SHORT_BINBYTES, "SHORT_BINBYTES", ArgKind::Bytes1, 3),
    // Protocol 4
    op(opcode::SHORT_BINUNICODE, "SHORT_BINUNICODE", ArgKind::Bytes1, 4),
    op(opcode::BINUNICODE8, "BINUNICODE8", ArgKind::Bytes8, 4),
    op(opcode::BINBYTES8, "BINBYTES8", ArgKind::Bytes8, 4),
    op(opcode::EMPTY_SET, "EMPTY_SET", ArgKind::None, 4),
    op(opcode::FROZENSET, "FROZENSET", ArgKind::None, 4),
    op(opcode::ADDITEMS, "ADDITEMS", ArgKind::None, 4),
    op(opcode::STACK_GLOBAL, "STACK_GLOBAL", ArgKind::None, 4),
    op(opcode::MEMOIZE, "MEMOIZE", ArgKind::None, 4),
    op(opcode::FRAME, "FRAME", ArgKind::U8, 4),
];

/// Looks up the table entry for a wire byte.
pub fn opcode_info(code: u8) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.code == code)
}

/// One decoded opcode argument. Text and byte payloads borrow from the
/// stream; protocol 0 lines may carry latin-1, so they stay raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpArg<'a> {
    /// No argument
    None,
    /// An unsigned fixed-width integer
    Uint(u64),
    /// The four-byte signed integer
    Int(i32),
    /// The eight-byte float
    Float(f64),
    /// One newline-terminated line, newline stripped
    Line(&'a [u8]),
    /// Two newline-terminated lines, newlines stripped
    Pair(&'a [u8], &'a [u8]),
    /// A length-prefixed payload
    Bytes(&'a [u8]),
}

/// One decoded opcode with its span in the stream.
#[derive(Debug)]
pub struct Op<'a> {
    /// Its table entry
    pub info: &'static OpcodeInfo,
    /// Its decoded argument
    pub arg: OpArg<'a>,
    /// Offset of the opcode byte
    pub start: usize,
    /// Offset one past the last argument byte
    pub end: usize,
}

/// Walks a stream one opcode at a time.
#[derive(Debug)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    /// Creates a reader over a complete stream.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The offset the next opcode starts at.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Decodes the opcode at the current offset and advances past it.
    pub fn next_op(&mut self) -> Result<Op<'a>, StreamError> {
        let start = self.pos;
        let code = *self
            .data
            .get(start)
            .ok_or(StreamError::Truncated { at: start })?;
        let info = opcode_info(code).ok_or(StreamError::UnknownOpcode { code, at: start })?;
        self.pos += 1;
        let arg = self.read_arg(info.arg)?;
        Ok(Op {
            info,
            arg,
            start,
            end: self.pos,
        })
    }

    fn read_arg(&mut self, kind: ArgKind) -> Result<OpArg<'a>, StreamError> {
        Ok(match kind {
            ArgKind::None => OpArg::None,
            ArgKind::U1 => OpArg::Uint(self.take_array::<1>()?[0] as u64),
            ArgKind::U2 => OpArg::Uint(u16::from_le_bytes(self.take_array()?) as u64),
            ArgKind::I4 => OpArg::Int(i32::from_le_bytes(self.take_array()?)),
            ArgKind::U4 => OpArg::Uint(u32::from_le_bytes(self.take_array()?) as u64),
            ArgKind::U8 => OpArg::Uint(u64::from_le_bytes(self.take_array()?)),
            ArgKind::F8 => OpArg::Float(f64::from_be_bytes(self.take_array()?)),
            ArgKind::Line => OpArg::Line(self.take_line()?),
            ArgKind::TwoLines => {
                let first = self.take_line()?;
                let second = self.take_line()?;
                OpArg::Pair(first, second)
            }
            ArgKind::Bytes1 => {
                let len = self.take_array::<1>()?[0] as usize;
                OpArg::Bytes(self.take(len)?)
            }
            ArgKind::Bytes4 => {
                let len = u32::from_le_bytes(self.take_array()?) as usize;
                OpArg::Bytes(self.take(len)?)
            }
            ArgKind::Bytes8 => {
                let len = u64::from_le_bytes(self.take_array()?);
                let len = usize::try_from(len).map_err(|_| StreamError::Truncated {
                    at: self.data.len(),
                })?;
                OpArg::Bytes(self.take(len)?)
            }
        })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StreamError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(StreamError::Truncated {
                at: self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_line(&mut self) -> Result<&'a [u8], StreamError> {
        let rest = &self.data[self.pos..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(StreamError::Truncated {
                at: self.data.len(),
            })?;
        let line = &rest[..newline];
        self.pos += newline + 1;
        Ok(line)
    }
}

/// Reads every opcode through STOP, validating the stream structure.
/// Bytes after STOP are ignored, as the reference tools do.
pub fn read_all(data: &[u8]) -> Result<Vec<Op<'_>>, StreamError> {
    let mut reader = StreamReader::new(data);
    let mut ops = Vec::new();
    loop {
        let op = reader.next_op()?;
        let done = op.info.code == opcode::STOP;
        ops.push(op);
        if done {
            return Ok(ops);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(data: &[u8]) -> Vec<&'static str> {
        read_all(data)
            .unwrap()
            .iter()
            .map(|op| op.info.name)
            .collect()
    }

    #[test]
    fn test_table_has_unique_codes() {
        for (i, entry) in OPCODES.iter().enumerate() {
            for other in &OPCODES[i + 1..] {
                assert_ne!(entry.code, other.code, "{} vs {}", entry.name, other.name);
            }
        }
    }

    #[test]
    fn test_reads_a_binary_stream() {
        assert_eq!(
            names(b"\x80\x04K\x01\x940h\x00\x940N."),
            vec![
                "PROTO", "BININT1", "MEMOIZE", "POP", "BINGET", "MEMOIZE", "POP", "NONE", "STOP"
            ]
        );
    }

    #[test]
    fn test_reads_text_lines() {
        let ops = read_all(b"cos\nsystem\np0\n0N.").unwrap();
        assert_eq!(ops[0].info.name, "GLOBAL");
        assert_eq!(ops[0].arg, OpArg::Pair(b"os", b"system"));
        assert_eq!(ops[1].arg, OpArg::Line(b"0"));
        assert_eq!((ops[0].start, ops[0].end), (0, 11));
    }

    #[test]
    fn test_decodes_fixed_width_arguments() {
        let ops = read_all(b"\x80\x04J\xfb\xff\xff\xffG?\xf8\x00\x00\x00\x00\x00\x00\x8c\x02hi.").unwrap();
        assert_eq!(ops[1].arg, OpArg::Int(-5));
        assert_eq!(ops[2].arg, OpArg::Float(1.5));
        assert_eq!(ops[3].arg, OpArg::Bytes(b"hi"));
    }

    #[test]
    fn test_truncated_argument() {
        assert_eq!(
            read_all(b"\x80\x04\x8c\x09hi").unwrap_err(),
            StreamError::Truncated { at: 6 }
        );
        assert_eq!(
            read_all(b"\x80\x04K\x01").unwrap_err(),
            StreamError::Truncated { at: 4 }
        );
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            read_all(b"\x80\x04\x01.").unwrap_err(),
            StreamError::UnknownOpcode { code: 0x01, at: 2 }
        );
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        assert_eq!(names(b"N.garbage"), vec!["NONE", "STOP"]);
    }
}
