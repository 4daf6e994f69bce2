//! The reference loader.
//!
//! [`Machine`] executes a pickle stream the way the target virtual
//! machine would: a value stack, a mark stack, and a memo table, one
//! opcode at a time off [`crate::stream::StreamReader`]. It exists so
//! the test suite and the CLI's `--run` can observe what a compiled
//! stream builds without a host interpreter; it recognizes every opcode
//! the compiler emits and nothing more, and it is not a hardened
//! unpickler. Host code objects load as opaque values, so streams
//! produced under lambda mode build callables that cannot be called
//! here.
//!
//! ## Structure
//!
//! - `value.rs` - the Python-flavored [`Value`] model
//! - `builtins.rs` - global resolution and the native callables
//!
//! ## Usage
//!
//! ```rust
//! use cornichon_core::vm::Machine;
//!
//! let value = Machine::new().run(b"\x80\x04K*.").unwrap();
//! assert_eq!(value.to_string(), "42");
//! ```

mod builtins;
mod value;

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;
use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use thiserror::Error;

pub use value::{Builtin, ClassRef, Instance, Value};

use crate::compiler::opcode;
use crate::stream::{Op, OpArg, StreamError, StreamReader};

/// A stream the loader cannot execute.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The stream itself is malformed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// An opcode needed more stack values than were present.
    #[error("stack underflow at offset {at}")]
    Underflow {
        /// Offset of the opcode
        at: usize,
    },

    /// An opcode needed a mark no MARK had pushed.
    #[error("no mark on the stack at offset {at}")]
    NoMark {
        /// Offset of the opcode
        at: usize,
    },

    /// A GET-family opcode read a slot no PUT has stored.
    #[error("memo slot {slot} fetched before it is stored")]
    UnboundSlot {
        /// The slot number
        slot: u64,
    },

    /// A value had the wrong type for the operation applied to it.
    #[error("{message}")]
    Type {
        /// What went wrong, in Python's terms
        message: String,
    },
}

/// A pickle virtual machine.
///
/// One machine runs one stream at a time; [`Machine::run`] resets the
/// stacks and the memo, so an instance can be reused across streams.
/// Output written by the `print` builtin accumulates until
/// [`Machine::take_output`] collects it.
#[derive(Default)]
pub struct Machine {
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: FxHashMap<u64, Value>,
    output: String,
}

impl Machine {
    /// Creates an idle machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything `print` wrote since the last call, cleared.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Executes a stream to its STOP and returns the resulting value.
    pub fn run(&mut self, data: &[u8]) -> Result<Value, LoadError> {
        self.stack.clear();
        self.marks.clear();
        self.memo.clear();

        let mut reader = StreamReader::new(data);
        loop {
            let op = reader.next_op()?;
            trace!("{:5}: {}", op.start, op.info.name);
            if op.info.code == opcode::STOP {
                return self.pop(op.start);
            }
            self.step(&op)?;
        }
    }

    fn step(&mut self, op: &Op<'_>) -> Result<(), LoadError> {
        let at = op.start;
        match op.info.code {
            // Framing and versioning carry no stack effect.
            opcode::PROTO | opcode::FRAME => {}

            opcode::MARK => self.marks.push(self.stack.len()),
            opcode::POP => {
                self.pop(at)?;
            }
            opcode::POP_MARK => {
                let mark = self.pop_mark(at)?;
                self.stack.truncate(mark);
            }
            opcode::DUP => {
                let top = self.top(at)?.clone();
                self.stack.push(top);
            }

            // Scalars
            opcode::NONE => self.stack.push(Value::None),
            opcode::NEWTRUE => self.stack.push(Value::Bool(true)),
            opcode::NEWFALSE => self.stack.push(Value::Bool(false)),
            opcode::INT => self.stack.push(int_line(line_arg(op), at)?),
            opcode::BININT | opcode::BININT1 | opcode::BININT2 => {
                let value = match op.arg {
                    OpArg::Int(value) => BigInt::from(value),
                    OpArg::Uint(value) => BigInt::from(value),
                    _ => unreachable!("fixed-width integer argument"),
                };
                self.stack.push(Value::Int(value));
            }
            opcode::FLOAT => {
                let text = String::from_utf8_lossy(line_arg(op));
                let value = text.parse::<f64>().map_err(|_| StreamError::Malformed {
                    message: "invalid FLOAT line".to_string(),
                    at,
                })?;
                self.stack.push(Value::Float(value));
            }
            opcode::BINFLOAT => {
                let OpArg::Float(value) = op.arg else {
                    unreachable!("float argument");
                };
                self.stack.push(Value::Float(value));
            }
            opcode::UNICODE => {
                let text = crate::pyrepr::decode_raw_unicode_escape(line_arg(op));
                self.stack.push(Value::str(text));
            }
            opcode::BINUNICODE | opcode::SHORT_BINUNICODE | opcode::BINUNICODE8 => {
                let text = std::str::from_utf8(bytes_arg(op)).map_err(|_| {
                    StreamError::Malformed {
                        message: "invalid utf-8 in string".to_string(),
                        at,
                    }
                })?;
                self.stack.push(Value::str(text));
            }
            opcode::BINBYTES | opcode::SHORT_BINBYTES | opcode::BINBYTES8 => {
                self.stack
                    .push(Value::Bytes(Rc::new(bytes_arg(op).to_vec())));
            }

            // Tuples
            opcode::EMPTY_TUPLE => self.stack.push(Value::tuple(vec![])),
            opcode::TUPLE => {
                let elements = self.pop_to_mark(at)?;
                self.stack.push(Value::tuple(elements));
            }
            opcode::TUPLE1 => self.fixed_tuple::<1>(at)?,
            opcode::TUPLE2 => self.fixed_tuple::<2>(at)?,
            opcode::TUPLE3 => self.fixed_tuple::<3>(at)?,

            // Lists
            opcode::EMPTY_LIST => self.stack.push(Value::list(vec![])),
            opcode::LIST => {
                let elements = self.pop_to_mark(at)?;
                self.stack.push(Value::list(elements));
            }
            opcode::APPEND => {
                let value = self.pop(at)?;
                self.list_below(at)?.borrow_mut().push(value);
            }
            opcode::APPENDS => {
                let elements = self.pop_to_mark(at)?;
                self.list_below(at)?.borrow_mut().extend(elements);
            }

            // Dicts
            opcode::EMPTY_DICT => self.stack.push(Value::Dict(Rc::default())),
            opcode::DICT => {
                let flat = self.pop_to_mark(at)?;
                let dict: Rc<RefCell<Vec<(Value, Value)>>> = Rc::default();
                for pair in flat.chunks_exact(2) {
                    dict_set(&mut dict.borrow_mut(), pair[0].clone(), pair[1].clone());
                }
                self.stack.push(Value::Dict(dict));
            }
            opcode::SETITEM => {
                let value = self.pop(at)?;
                let key = self.pop(at)?;
                self.set_item(key, value, at)?;
            }
            opcode::SETITEMS => {
                let flat = self.pop_to_mark(at)?;
                for pair in flat.chunks_exact(2) {
                    self.set_item(pair[0].clone(), pair[1].clone(), at)?;
                }
            }

            // Sets
            opcode::EMPTY_SET => self.stack.push(Value::Set(Rc::default())),
            opcode::ADDITEMS | opcode::FROZENSET => {
                let elements = self.pop_to_mark(at)?;
                // The loader has no frozen variant; both build a set.
                if op.info.code == opcode::FROZENSET {
                    self.stack.push(Value::Set(Rc::default()));
                }
                let Value::Set(set) = self.top(at)? else {
                    return Err(LoadError::Type {
                        message: "ADDITEMS needs a set beneath the items".to_string(),
                    });
                };
                let mut set = set.borrow_mut();
                for element in elements {
                    if !set.contains(&element) {
                        set.push(element);
                    }
                }
            }

            // Memo
            opcode::GET | opcode::BINGET | opcode::LONG_BINGET => {
                let slot = slot_arg(op)?;
                let value = self
                    .memo
                    .get(&slot)
                    .cloned()
                    .ok_or(LoadError::UnboundSlot { slot })?;
                self.stack.push(value);
            }
            opcode::PUT | opcode::BINPUT | opcode::LONG_BINPUT => {
                let slot = slot_arg(op)?;
                let top = self.top(at)?.clone();
                self.memo.insert(slot, top);
            }
            opcode::MEMOIZE => {
                let slot = self.memo.len() as u64;
                let top = self.top(at)?.clone();
                self.memo.insert(slot, top);
            }

            // Globals, calls, state
            opcode::GLOBAL => {
                let (module, name) = pair_arg(op);
                self.stack.push(builtins::find_global(&module, &name));
            }
            opcode::STACK_GLOBAL => {
                let name = self.pop_str(at)?;
                let module = self.pop_str(at)?;
                self.stack.push(builtins::find_global(&module, &name));
            }
            opcode::INST => {
                let args = self.pop_to_mark(at)?;
                let (module, name) = pair_arg(op);
                let callee = builtins::find_global(&module, &name);
                let value = self.call_value(callee, args)?;
                self.stack.push(value);
            }
            opcode::REDUCE | opcode::NEWOBJ => {
                let args = self.pop(at)?;
                let callee = self.pop(at)?;
                let Value::Tuple(args) = args else {
                    return Err(LoadError::Type {
                        message: format!(
                            "argument tuple expected, got '{}'",
                            args.type_name()
                        ),
                    });
                };
                let value = self.call_value(callee, args.as_ref().clone())?;
                self.stack.push(value);
            }
            opcode::BUILD => {
                let state = self.pop(at)?;
                let target = self.top(at)?.clone();
                apply_state(&target, state)?;
            }

            opcode::STOP => unreachable!("handled by the run loop"),
            _ => {
                return Err(LoadError::Type {
                    message: format!("opcode {} is not supported by the loader", op.info.name),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Stack plumbing
    // ========================================================================

    fn pop(&mut self, at: usize) -> Result<Value, LoadError> {
        self.stack.pop().ok_or(LoadError::Underflow { at })
    }

    fn top(&mut self, at: usize) -> Result<&Value, LoadError> {
        self.stack.last().ok_or(LoadError::Underflow { at })
    }

    fn pop_mark(&mut self, at: usize) -> Result<usize, LoadError> {
        self.marks.pop().ok_or(LoadError::NoMark { at })
    }

    /// Pops every value above the topmost mark, in push order.
    fn pop_to_mark(&mut self, at: usize) -> Result<Vec<Value>, LoadError> {
        let mark = self.pop_mark(at)?;
        if mark > self.stack.len() {
            return Err(LoadError::Underflow { at });
        }
        Ok(self.stack.split_off(mark))
    }

    fn pop_str(&mut self, at: usize) -> Result<String, LoadError> {
        match self.pop(at)? {
            Value::Str(text) => Ok(text.to_string()),
            other => Err(LoadError::Type {
                message: format!("expected a string, got '{}'", other.type_name()),
            }),
        }
    }

    fn fixed_tuple<const N: usize>(&mut self, at: usize) -> Result<(), LoadError> {
        let mut elements = vec![Value::None; N];
        for slot in elements.iter_mut().rev() {
            *slot = self.pop(at)?;
        }
        self.stack.push(Value::tuple(elements));
        Ok(())
    }

    fn list_below(&mut self, at: usize) -> Result<Rc<RefCell<Vec<Value>>>, LoadError> {
        match self.top(at)? {
            Value::List(list) => Ok(Rc::clone(list)),
            other => Err(LoadError::Type {
                message: format!("cannot append to a '{}' object", other.type_name()),
            }),
        }
    }

    /// `container[key] = value` for the container beneath the pair:
    /// dicts take any key, lists take an integer index.
    fn set_item(&mut self, key: Value, value: Value, at: usize) -> Result<(), LoadError> {
        match self.top(at)? {
            Value::Dict(dict) => {
                dict_set(&mut dict.borrow_mut(), key, value);
                Ok(())
            }
            Value::List(list) => {
                let mut list = list.borrow_mut();
                let len = list.len();
                let at = key
                    .as_int()
                    .and_then(|index| {
                        let index = if index < BigInt::from(0) {
                            index + BigInt::from(len)
                        } else {
                            index
                        };
                        num_traits::ToPrimitive::to_usize(&index)
                    })
                    .filter(|&index| index < len)
                    .ok_or_else(|| LoadError::Type {
                        message: "list assignment index out of range".to_string(),
                    })?;
                list[at] = value;
                Ok(())
            }
            other => Err(LoadError::Type {
                message: format!("'{}' object does not support item assignment", other.type_name()),
            }),
        }
    }
}

/// Replaces an existing key's value or appends a new pair.
fn dict_set(pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    for (existing, slot) in pairs.iter_mut() {
        if *existing == key {
            *slot = value;
            return;
        }
    }
    pairs.push((key, value));
}

/// BUILD: merges state into the instance beneath it. The state is
/// either a dict of attributes or a (dict, slots-dict) pair, either
/// half of which may be None.
fn apply_state(target: &Value, state: Value) -> Result<(), LoadError> {
    let Value::Instance(instance) = target else {
        return Err(LoadError::Type {
            message: format!("cannot BUILD a '{}' object", target.type_name()),
        });
    };
    let (dict_state, slot_state) = match state {
        Value::Tuple(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
        other => (other, Value::None),
    };
    for state in [dict_state, slot_state] {
        match state {
            Value::None => {}
            Value::Dict(pairs) => {
                let mut instance = instance.borrow_mut();
                for (key, value) in pairs.borrow().iter() {
                    let Value::Str(name) = key else {
                        return Err(LoadError::Type {
                            message: "attribute names must be strings".to_string(),
                        });
                    };
                    set_attr(&mut instance, name, value.clone());
                }
            }
            other => {
                return Err(LoadError::Type {
                    message: format!("cannot apply '{}' state", other.type_name()),
                });
            }
        }
    }
    Ok(())
}

fn set_attr(instance: &mut Instance, name: &str, value: Value) {
    for (attr, slot) in instance.attrs.iter_mut() {
        if attr == name {
            *slot = value;
            return;
        }
    }
    instance.attrs.push((name.to_string(), value));
}

// ============================================================================
// Argument decoding
// ============================================================================

fn line_arg<'a>(op: &Op<'a>) -> &'a [u8] {
    match op.arg {
        OpArg::Line(line) => line,
        _ => unreachable!("line argument"),
    }
}

fn bytes_arg<'a>(op: &Op<'a>) -> &'a [u8] {
    match op.arg {
        OpArg::Bytes(payload) => payload,
        _ => unreachable!("bytes argument"),
    }
}

fn pair_arg(op: &Op<'_>) -> (String, String) {
    match op.arg {
        OpArg::Pair(module, name) => (
            String::from_utf8_lossy(module).into_owned(),
            String::from_utf8_lossy(name).into_owned(),
        ),
        _ => unreachable!("two-line argument"),
    }
}

fn slot_arg(op: &Op<'_>) -> Result<u64, LoadError> {
    match op.arg {
        OpArg::Uint(slot) => Ok(slot),
        OpArg::Line(line) => std::str::from_utf8(line)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| {
                StreamError::Malformed {
                    message: "invalid memo index".to_string(),
                    at: op.start,
                }
                .into()
            }),
        _ => unreachable!("memo index argument"),
    }
}

/// Proto 0 INT lines: `01` and `00` are the booleans.
fn int_line(line: &[u8], at: usize) -> Result<Value, LoadError> {
    match line {
        b"01" => Ok(Value::Bool(true)),
        b"00" => Ok(Value::Bool(false)),
        _ => BigInt::parse_bytes(line, 10)
            .map(Value::Int)
            .ok_or_else(|| {
                StreamError::Malformed {
                    message: "invalid INT line".to_string(),
                    at,
                }
                .into()
            }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run(data: &[u8]) -> Value {
        Machine::new().run(data).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(run(b"\x80\x04K*."), Value::int(42));
        assert_eq!(run(b"\x80\x04\x88."), Value::Bool(true));
        assert_eq!(run(b"N."), Value::None);
        assert_eq!(run(b"I-7\n."), Value::int(-7));
        assert_eq!(run(b"I01\n."), Value::Bool(true));
        assert_eq!(run(b"F1.5\n."), Value::Float(1.5));
        assert_eq!(run(b"\x80\x04\x8c\x02hi."), Value::str("hi"));
        assert_eq!(run(b"Vcaf\\u00e9\n."), Value::str("caf\u{e9}"));
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            run(b"\x80\x04K\x01K\x02\x86."),
            Value::tuple(vec![Value::int(1), Value::int(2)])
        );
        assert_eq!(
            run(b"(I1\nI2\nt."),
            Value::tuple(vec![Value::int(1), Value::int(2)])
        );
        assert_eq!(
            run(b"\x80\x04]K\x01aK\x02a."),
            Value::list(vec![Value::int(1), Value::int(2)])
        );
        assert_eq!(run(b"\x80\x04}K\x01K\x02s.").to_string(), "{1: 2}");
        assert_eq!(run(b"\x80\x04\x8f(K\x01K\x02\x91.").to_string(), "{1, 2}");
    }

    #[test]
    fn test_memo_fetches_share_identity() {
        // An empty list is memoized, fetched again, and mutated through
        // the fetch; the mutation shows through the original handle.
        let value = run(b"\x80\x04]\x94h\x00K\x05a0.");
        assert_eq!(value.to_string(), "[5]");
    }

    #[test]
    fn test_reduce_calls_operator_functions() {
        let stream = b"\x80\x04\x8c\x08operator\x8c\x03add\x93\x94K\x01K\x02\x86R.";
        assert_eq!(run(stream), Value::int(3));
    }

    #[test]
    fn test_unknown_class_reduces_to_a_placeholder() {
        let value = run(b"\x80\x04\x8c\x03mod\x8c\x05Thing\x93K\x05\x85R.");
        assert_eq!(value.to_string(), "<mod.Thing object>");
    }

    #[test]
    fn test_inst_builds_an_instance_from_marked_args() {
        let value = run(b"(I1\nimod\nThing\n.");
        let Value::Instance(instance) = &value else {
            panic!("expected an instance, got {value}");
        };
        assert_eq!(instance.borrow().args, vec![Value::int(1)]);
    }

    #[test]
    fn test_build_merges_attribute_state() {
        // Thing() then BUILD({'x': 5}, None)
        let value = run(b"\x80\x04\x8c\x03mod\x8c\x05Thing\x93)R}\x8c\x01xK\x05sN\x86b.");
        assert_eq!(value.to_string(), "<mod.Thing object x=5>");
    }

    #[test]
    fn test_setitem_mutates_lists() {
        let value = run(b"\x80\x04]K\x01aK\x02aK\x00K\x09s.");
        assert_eq!(value, Value::list(vec![Value::int(9), Value::int(2)]));
    }

    #[test]
    fn test_print_output_is_captured() {
        let mut machine = Machine::new();
        let stream = b"\x80\x04\x8c\x08builtins\x8c\x05print\x93\x94K\x01\x8c\x02hi\x86R.";
        let value = machine.run(stream).unwrap();
        assert_eq!(value, Value::None);
        assert_eq!(machine.take_output(), "1 hi\n");
        assert_eq!(machine.take_output(), "");
    }

    #[test]
    fn test_unbound_memo_slot() {
        assert_eq!(
            Machine::new().run(b"h\x05.").unwrap_err(),
            LoadError::UnboundSlot { slot: 5 }
        );
    }

    #[test]
    fn test_stack_underflow() {
        assert_eq!(
            Machine::new().run(b"0N.").unwrap_err(),
            LoadError::Underflow { at: 0 }
        );
    }

    #[test]
    fn test_truncated_stream_is_a_stream_error() {
        assert_eq!(
            Machine::new().run(b"\x80\x04K\x01").unwrap_err(),
            LoadError::Stream(StreamError::Truncated { at: 4 })
        );
    }
}
