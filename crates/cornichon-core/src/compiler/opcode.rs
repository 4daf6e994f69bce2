//! Pickle opcode definitions.
//!
//! Each constant is the single wire byte of one pickle virtual machine
//! instruction. The grouping and names follow CPython's `pickle.py`,
//! which is the reference for this instruction set; the protocol number
//! next to each group is the protocol that introduced it.

// Protocol 0 (text mode)

/// Push a mark onto the stack.
pub const MARK: u8 = b'(';
/// End of the stream; the top of stack is the result.
pub const STOP: u8 = b'.';
/// Discard the top of stack.
pub const POP: u8 = b'0';
/// Discard everything down to and including the topmost mark.
pub const POP_MARK: u8 = b'1';
/// Duplicate the top of stack.
pub const DUP: u8 = b'2';
/// Push a float given as a decimal line.
pub const FLOAT: u8 = b'F';
/// Push an integer given as a decimal line.
pub const INT: u8 = b'I';
/// Push None.
pub const NONE: u8 = b'N';
/// Call the callable under the argument tuple at the top of stack.
pub const REDUCE: u8 = b'R';
/// Push a string given as a raw-unicode-escape line.
pub const UNICODE: u8 = b'V';
/// Append the top of stack to the list below it.
pub const APPEND: u8 = b'a';
/// Apply state to the object below it (via `__setstate__` or dicts).
pub const BUILD: u8 = b'b';
/// Push a global object given as two newline-terminated lines.
pub const GLOBAL: u8 = b'c';
/// Build a dict from marked key/value pairs.
pub const DICT: u8 = b'd';
/// Read an object from the memo, index given as a decimal line.
pub const GET: u8 = b'g';
/// Build a class instance from marked arguments and a two-line name.
pub const INST: u8 = b'i';
/// Build a list from marked items.
pub const LIST: u8 = b'l';
/// Store the top of stack in the memo, index given as a decimal line.
pub const PUT: u8 = b'p';
/// Set a key/value pair on the dict below them.
pub const SETITEM: u8 = b's';
/// Build a tuple from marked items.
pub const TUPLE: u8 = b't';

// Protocol 1 (binary mode)

/// Push a 4-byte little-endian signed integer.
pub const BININT: u8 = b'J';
/// Push a 1-byte unsigned integer.
pub const BININT1: u8 = b'K';
/// Push a 2-byte little-endian unsigned integer.
pub const BININT2: u8 = b'M';
/// Push a UTF-8 string with a 4-byte length prefix.
pub const BINUNICODE: u8 = b'X';
/// Build a list from marked items in one step.
pub const APPENDS: u8 = b'e';
/// Read an object from the memo, 1-byte index.
pub const BINGET: u8 = b'h';
/// Read an object from the memo, 4-byte little-endian index.
pub const LONG_BINGET: u8 = b'j';
/// Store the top of stack in the memo, 1-byte index.
pub const BINPUT: u8 = b'q';
/// Store the top of stack in the memo, 4-byte little-endian index.
pub const LONG_BINPUT: u8 = b'r';
/// Set many key/value pairs on the dict below the mark.
pub const SETITEMS: u8 = b'u';
/// Push an empty dict.
pub const EMPTY_DICT: u8 = b'}';
/// Push an empty list.
pub const EMPTY_LIST: u8 = b']';
/// Push an empty tuple.
pub const EMPTY_TUPLE: u8 = b')';
/// Push an 8-byte big-endian float.
pub const BINFLOAT: u8 = b'G';

// Protocol 2

/// Declare the protocol version of the stream.
pub const PROTO: u8 = 0x80;
/// Build an object by calling `cls.__new__(cls, *args)`.
pub const NEWOBJ: u8 = 0x81;
/// Build a one-tuple from the top of stack.
pub const TUPLE1: u8 = 0x85;
/// Build a two-tuple from the top two stack items.
pub const TUPLE2: u8 = 0x86;
/// Build a three-tuple from the top three stack items.
pub const TUPLE3: u8 = 0x87;
/// Push True.
pub const NEWTRUE: u8 = 0x88;
/// Push False.
pub const NEWFALSE: u8 = 0x89;

// Protocol 3

/// Push a bytes object with a 4-byte length prefix.
pub const BINBYTES: u8 = b'B';
/// Push a bytes object with a 1-byte length prefix.
pub const SHORT_BINBYTES: u8 = b'C';

// Protocol 4

/// Push a UTF-8 string with a 1-byte length prefix.
pub const SHORT_BINUNICODE: u8 = 0x8c;
/// Push a UTF-8 string with an 8-byte length prefix.
pub const BINUNICODE8: u8 = 0x8d;
/// Push a bytes object with an 8-byte length prefix.
pub const BINBYTES8: u8 = 0x8e;
/// Push an empty set.
pub const EMPTY_SET: u8 = 0x8f;
/// Build a frozenset from marked items.
pub const FROZENSET: u8 = 0x90;
/// Add marked items to the set below the mark.
pub const ADDITEMS: u8 = 0x91;
/// Push a global object named by the two strings on the stack.
pub const STACK_GLOBAL: u8 = 0x93;
/// Store the top of stack in the memo at the next free index.
pub const MEMOIZE: u8 = 0x94;
/// Declare a frame of the given 8-byte little-endian length.
pub const FRAME: u8 = 0x95;
