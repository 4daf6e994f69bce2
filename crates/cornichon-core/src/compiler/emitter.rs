//! Low-level pickle byte emission.
//!
//! [`Emitter`] owns the output buffer and knows, for each kind of value,
//! which opcode encoding the active protocol calls for: text lines at
//! protocol 0, the fixed-width binary forms at 1 and up, and the short
//! forms and MEMOIZE at 4. Code generation decides *what* to push;
//! this module decides the bytes.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::opcode;
use crate::pyrepr::{float_repr, raw_unicode_escape};

/// Emits pickle opcodes into a byte buffer.
#[derive(Debug)]
pub struct Emitter {
    buf: Vec<u8>,
    proto: u8,
}

impl Emitter {
    /// Creates an emitter targeting the given protocol.
    pub fn new(proto: u8) -> Self {
        Self {
            buf: Vec::new(),
            proto,
        }
    }

    /// The protocol this emitter targets.
    pub fn proto(&self) -> u8 {
        self.proto
    }

    /// Consumes the emitter and returns the produced bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends a bare opcode byte.
    pub fn op(&mut self, op: u8) {
        self.buf.push(op);
    }

    /// Appends a newline-terminated text argument.
    pub fn line(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.push(b'\n');
    }

    /// Writes the PROTO header if the protocol calls for one.
    pub fn proto_header(&mut self) {
        if self.proto >= 2 {
            self.buf.push(opcode::PROTO);
            self.buf.push(self.proto);
        }
    }

    /// Pushes None.
    pub fn none(&mut self) {
        self.op(opcode::NONE);
    }

    /// Pushes a bool.
    pub fn bool(&mut self, value: bool) {
        if self.proto >= 2 {
            self.op(if value {
                opcode::NEWTRUE
            } else {
                opcode::NEWFALSE
            });
        } else {
            // Protocol 0/1 spell booleans as the special INT lines
            self.buf
                .extend_from_slice(if value { b"I01\n" } else { b"I00\n" });
        }
    }

    /// Pushes an integer, choosing the narrowest encoding that holds it.
    ///
    /// Values outside the 32-bit range fall back to the decimal INT line,
    /// which carries arbitrary precision at every protocol.
    pub fn int(&mut self, value: &BigInt) {
        if self.proto == 0 {
            self.int_line(value);
            return;
        }
        match value.to_i32() {
            Some(n @ 0..=255) => {
                self.op(opcode::BININT1);
                self.buf.push(n as u8);
            }
            Some(n @ 256..=65535) => {
                self.op(opcode::BININT2);
                self.buf.extend_from_slice(&(n as u16).to_le_bytes());
            }
            Some(n) => {
                self.op(opcode::BININT);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
            None => self.int_line(value),
        }
    }

    fn int_line(&mut self, value: &BigInt) {
        self.op(opcode::INT);
        self.line(&value.to_string());
    }

    /// Pushes a float.
    pub fn float(&mut self, value: f64) {
        if self.proto >= 1 {
            self.op(opcode::BINFLOAT);
            self.buf.extend_from_slice(&value.to_be_bytes());
        } else {
            self.op(opcode::FLOAT);
            self.line(&float_repr(value));
        }
    }

    /// Pushes a text string.
    pub fn str(&mut self, value: &str) {
        if self.proto == 0 {
            self.op(opcode::UNICODE);
            let escaped = raw_unicode_escape(value);
            self.buf.extend_from_slice(&escaped);
            self.buf.push(b'\n');
            return;
        }
        let len = value.len();
        if self.proto >= 4 && len < 256 {
            self.op(opcode::SHORT_BINUNICODE);
            self.buf.push(len as u8);
        } else if self.proto >= 4 && len > u32::MAX as usize {
            self.op(opcode::BINUNICODE8);
            self.buf.extend_from_slice(&(len as u64).to_le_bytes());
        } else {
            self.op(opcode::BINUNICODE);
            self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Pushes a bytes object. Callers gate on protocol 3.
    pub fn bytes(&mut self, value: &[u8]) {
        let len = value.len();
        if len < 256 {
            self.op(opcode::SHORT_BINBYTES);
            self.buf.push(len as u8);
        } else if self.proto >= 4 && len > u32::MAX as usize {
            self.op(opcode::BINBYTES8);
            self.buf.extend_from_slice(&(len as u64).to_le_bytes());
        } else {
            self.op(opcode::BINBYTES);
            self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.buf.extend_from_slice(value);
    }

    /// Stores the top of stack in the memo at `index`.
    ///
    /// At protocol 4 this emits MEMOIZE, which self-indexes: it relies on
    /// memo indices being bound densely in emission order.
    pub fn put(&mut self, index: u32) {
        match self.proto {
            0 => {
                self.op(opcode::PUT);
                self.line(&index.to_string());
            }
            1..=3 => {
                if index < 256 {
                    self.op(opcode::BINPUT);
                    self.buf.push(index as u8);
                } else {
                    self.op(opcode::LONG_BINPUT);
                    self.buf.extend_from_slice(&index.to_le_bytes());
                }
            }
            _ => self.op(opcode::MEMOIZE),
        }
    }

    /// Pushes the memoized object stored at `index`.
    pub fn get(&mut self, index: u32) {
        if self.proto == 0 {
            self.op(opcode::GET);
            self.line(&index.to_string());
        } else if index < 256 {
            self.op(opcode::BINGET);
            self.buf.push(index as u8);
        } else {
            self.op(opcode::LONG_BINGET);
            self.buf.extend_from_slice(&index.to_le_bytes());
        }
    }

    /// Starts a tuple of the given arity; elements are emitted in between.
    pub fn tuple_begin(&mut self, arity: usize) {
        if arity == 0 {
            return;
        }
        if self.proto >= 2 && arity <= 3 {
            return;
        }
        self.op(opcode::MARK);
    }

    /// Closes a tuple of the given arity.
    pub fn tuple_end(&mut self, arity: usize) {
        match arity {
            0 => {
                if self.proto >= 1 {
                    self.op(opcode::EMPTY_TUPLE);
                } else {
                    self.op(opcode::MARK);
                    self.op(opcode::TUPLE);
                }
            }
            1..=3 if self.proto >= 2 => {
                self.op(match arity {
                    1 => opcode::TUPLE1,
                    2 => opcode::TUPLE2,
                    _ => opcode::TUPLE3,
                });
            }
            _ => self.op(opcode::TUPLE),
        }
    }

    /// Pushes a fresh empty list.
    pub fn list_new(&mut self) {
        if self.proto >= 1 {
            self.op(opcode::EMPTY_LIST);
        } else {
            self.op(opcode::MARK);
            self.op(opcode::LIST);
        }
    }

    /// Pushes a fresh empty dict.
    pub fn dict_new(&mut self) {
        if self.proto >= 1 {
            self.op(opcode::EMPTY_DICT);
        } else {
            self.op(opcode::MARK);
            self.op(opcode::DICT);
        }
    }

    /// Pushes the object `module.name`, resolved by the unpickler.
    pub fn global(&mut self, module: &str, name: &str) {
        if self.proto >= 4 {
            self.str(module);
            self.str(name);
            self.op(opcode::STACK_GLOBAL);
        } else {
            self.op(opcode::GLOBAL);
            self.line(module);
            self.line(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(proto: u8, f: impl FnOnce(&mut Emitter)) -> Vec<u8> {
        let mut emitter = Emitter::new(proto);
        f(&mut emitter);
        emitter.into_bytes()
    }

    #[test]
    fn test_int_width_selection() {
        assert_eq!(
            emitted(2, |e| e.int(&BigInt::from(200))),
            vec![b'K', 200]
        );
        assert_eq!(
            emitted(2, |e| e.int(&BigInt::from(1000))),
            vec![b'M', 0xe8, 0x03]
        );
        assert_eq!(
            emitted(2, |e| e.int(&BigInt::from(-5))),
            vec![b'J', 0xfb, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            emitted(2, |e| e.int(&BigInt::from(70000))),
            vec![b'J', 0x70, 0x11, 0x01, 0x00]
        );
    }

    #[test]
    fn test_int_oversized_falls_back_to_text() {
        let huge = BigInt::from(1u64 << 40);
        assert_eq!(
            emitted(2, |e| e.int(&huge)),
            b"I1099511627776\n".to_vec()
        );
    }

    #[test]
    fn test_int_protocol_zero() {
        assert_eq!(emitted(0, |e| e.int(&BigInt::from(42))), b"I42\n".to_vec());
        assert_eq!(emitted(0, |e| e.int(&BigInt::from(-1))), b"I-1\n".to_vec());
    }

    #[test]
    fn test_bool_by_protocol() {
        assert_eq!(emitted(0, |e| e.bool(true)), b"I01\n".to_vec());
        assert_eq!(emitted(1, |e| e.bool(false)), b"I00\n".to_vec());
        assert_eq!(emitted(2, |e| e.bool(true)), vec![0x88]);
        assert_eq!(emitted(4, |e| e.bool(false)), vec![0x89]);
    }

    #[test]
    fn test_float_binary_is_big_endian() {
        assert_eq!(
            emitted(2, |e| e.float(1.5)),
            vec![b'G', 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_float_protocol_zero() {
        assert_eq!(emitted(0, |e| e.float(1.0)), b"F1.0\n".to_vec());
        assert_eq!(emitted(0, |e| e.float(2.5)), b"F2.5\n".to_vec());
    }

    #[test]
    fn test_str_by_protocol() {
        assert_eq!(emitted(0, |e| e.str("abc")), b"Vabc\n".to_vec());
        assert_eq!(
            emitted(2, |e| e.str("abc")),
            vec![b'X', 3, 0, 0, 0, b'a', b'b', b'c']
        );
        assert_eq!(
            emitted(4, |e| e.str("abc")),
            vec![0x8c, 3, b'a', b'b', b'c']
        );
    }

    #[test]
    fn test_long_str_uses_four_byte_length_at_protocol_four() {
        let long = "x".repeat(300);
        let out = emitted(4, |e| e.str(&long));
        assert_eq!(out[0], b'X');
        assert_eq!(&out[1..5], &300u32.to_le_bytes());
    }

    #[test]
    fn test_unicode_line_escapes() {
        assert_eq!(
            emitted(0, |e| e.str("a\nb\\")),
            b"Va\\u000ab\\u005c\n".to_vec()
        );
        // Latin-1 passes through as raw bytes
        assert_eq!(
            emitted(0, |e| e.str("caf\u{e9}")),
            vec![b'V', b'c', b'a', b'f', 0xe9, b'\n']
        );
        // Beyond latin-1 and beyond the BMP
        assert_eq!(
            emitted(0, |e| e.str("\u{0394}")),
            b"V\\u0394\n".to_vec()
        );
        assert_eq!(
            emitted(0, |e| e.str("\u{1f600}")),
            b"V\\U0001f600\n".to_vec()
        );
    }

    #[test]
    fn test_bytes_by_length() {
        assert_eq!(
            emitted(3, |e| e.bytes(b"hi")),
            vec![b'C', 2, b'h', b'i']
        );
        let long = vec![0u8; 300];
        let out = emitted(3, |e| e.bytes(&long));
        assert_eq!(out[0], b'B');
        assert_eq!(&out[1..5], &300u32.to_le_bytes());
    }

    #[test]
    fn test_put_by_protocol() {
        assert_eq!(emitted(0, |e| e.put(5)), b"p5\n".to_vec());
        assert_eq!(emitted(1, |e| e.put(5)), vec![b'q', 5]);
        assert_eq!(
            emitted(1, |e| e.put(300)),
            vec![b'r', 0x2c, 0x01, 0x00, 0x00]
        );
        assert_eq!(emitted(4, |e| e.put(0)), vec![0x94]);
        assert_eq!(emitted(4, |e| e.put(900)), vec![0x94]);
    }

    #[test]
    fn test_get_by_protocol() {
        assert_eq!(emitted(0, |e| e.get(5)), b"g5\n".to_vec());
        assert_eq!(emitted(1, |e| e.get(7)), vec![b'h', 7]);
        assert_eq!(
            emitted(4, |e| e.get(300)),
            vec![b'j', 0x2c, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_tuple_shapes() {
        // Small tuples use the dedicated opcodes at protocol 2+
        assert_eq!(
            emitted(2, |e| {
                e.tuple_begin(2);
                e.int(&BigInt::from(1));
                e.int(&BigInt::from(2));
                e.tuple_end(2);
            }),
            vec![b'K', 1, b'K', 2, 0x86]
        );
        // Larger tuples fall back to MARK ... TUPLE
        assert_eq!(
            emitted(2, |e| {
                e.tuple_begin(4);
                e.tuple_end(4);
            }),
            vec![b'(', b't']
        );
        // Protocol 0 always marks
        assert_eq!(
            emitted(0, |e| {
                e.tuple_begin(1);
                e.int(&BigInt::from(1));
                e.tuple_end(1);
            }),
            b"(I1\nt".to_vec()
        );
        // Empty tuples
        assert_eq!(emitted(1, |e| e.tuple_end(0)), vec![b')']);
        assert_eq!(emitted(0, |e| e.tuple_end(0)), vec![b'(', b't']);
    }

    #[test]
    fn test_containers_by_protocol() {
        assert_eq!(emitted(1, |e| e.list_new()), vec![b']']);
        assert_eq!(emitted(0, |e| e.list_new()), vec![b'(', b'l']);
        assert_eq!(emitted(1, |e| e.dict_new()), vec![b'}']);
        assert_eq!(emitted(0, |e| e.dict_new()), vec![b'(', b'd']);
    }

    #[test]
    fn test_global_by_protocol() {
        assert_eq!(
            emitted(2, |e| e.global("operator", "add")),
            b"coperator\nadd\n".to_vec()
        );
        let mut expected = vec![0x8c, 8];
        expected.extend_from_slice(b"operator");
        expected.extend_from_slice(&[0x8c, 3]);
        expected.extend_from_slice(b"add");
        expected.push(0x93);
        assert_eq!(emitted(4, |e| e.global("operator", "add")), expected);
    }

    #[test]
    fn test_proto_header() {
        assert_eq!(emitted(0, |e| e.proto_header()), Vec::<u8>::new());
        assert_eq!(emitted(1, |e| e.proto_header()), Vec::<u8>::new());
        assert_eq!(emitted(2, |e| e.proto_header()), vec![0x80, 2]);
        assert_eq!(emitted(5, |e| e.proto_header()), vec![0x80, 5]);
    }
}
