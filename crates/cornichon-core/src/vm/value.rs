//! Loader values.
//!
//! [`Value`] is the Python-flavored object model the reference loader
//! builds streams into. Containers sit behind `Rc<RefCell<...>>` so the
//! memo's sharing is observable: two fetches of one slot yield the same
//! list, and mutating it through either handle shows through both.
//! Equality is structural the way Python's `==` is, with numbers
//! comparing across `bool`/`int`/`float`; instances compare by identity.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::pyrepr;

/// A value the loader can hold on its stack or in its memo.
#[derive(Debug, Clone)]
pub enum Value {
    /// `None`
    None,
    /// The `Ellipsis` singleton
    Ellipsis,
    /// `True` / `False`
    Bool(bool),
    /// An integer of any size
    Int(BigInt),
    /// A float
    Float(f64),
    /// A text string
    Str(Rc<String>),
    /// A byte string
    Bytes(Rc<Vec<u8>>),
    /// An immutable tuple
    Tuple(Rc<Vec<Value>>),
    /// A shared mutable list
    List(Rc<RefCell<Vec<Value>>>),
    /// A shared mutable mapping, insertion-ordered
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    /// A shared mutable set, insertion-ordered
    Set(Rc<RefCell<Vec<Value>>>),
    /// A `slice(start, stop, step)` object
    Slice(Rc<(Value, Value, Value)>),
    /// An imported module, by dotted name
    Module(Rc<String>),
    /// A function the loader implements itself
    Builtin(Builtin),
    /// A class the loader only knows by name
    Class(Rc<ClassRef>),
    /// An instance of a placeholder class
    Instance(Rc<RefCell<Instance>>),
    /// An iterator over already-materialized values
    Iter(Rc<RefCell<VecDeque<Value>>>),
    /// A host code object, held opaquely; the loader cannot run it
    Code(Rc<Vec<Value>>),
}

/// A class the loader recognizes by `module.name` without knowing its
/// behavior. Calling one produces an [`Instance`] carrying the
/// arguments, so REDUCE/INST/BUILD against unknown classes still yield
/// something inspectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    /// The defining module
    pub module: String,
    /// The class name
    pub name: String,
}

/// An instance of a placeholder class: the construction arguments plus
/// whatever state BUILD merged in afterwards.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The class it was constructed from
    pub class: Rc<ClassRef>,
    /// The positional construction arguments
    pub args: Vec<Value>,
    /// Attributes applied by BUILD, insertion-ordered
    pub attrs: Vec<(String, Value)>,
}

/// The functions the loader implements natively: the `operator` module
/// functions the compiler synthesizes calls against, and the `builtins`
/// subset its lowerings lean on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Builtin {
    // operator module
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    Invert,
    Not,
    Pos,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    Contains,
    GetItem,
    // builtins module
    GetAttr,
    Bool,
    All,
    Any,
    Filter,
    Next,
    Iter,
    Len,
    Slice,
    Set,
    Print,
    Import,
}

impl Builtin {
    /// The `module.name` spelling this function loads under.
    pub fn qualname(self) -> (&'static str, &'static str) {
        match self {
            Builtin::Add => ("operator", "add"),
            Builtin::Sub => ("operator", "sub"),
            Builtin::Mul => ("operator", "mul"),
            Builtin::MatMul => ("operator", "matmul"),
            Builtin::TrueDiv => ("operator", "truediv"),
            Builtin::FloorDiv => ("operator", "floordiv"),
            Builtin::Mod => ("operator", "mod"),
            Builtin::Pow => ("operator", "pow"),
            Builtin::LShift => ("operator", "lshift"),
            Builtin::RShift => ("operator", "rshift"),
            Builtin::BitOr => ("operator", "or_"),
            Builtin::BitXor => ("operator", "xor"),
            Builtin::BitAnd => ("operator", "and_"),
            Builtin::Invert => ("operator", "inv"),
            Builtin::Not => ("operator", "not_"),
            Builtin::Pos => ("operator", "pos"),
            Builtin::Neg => ("operator", "neg"),
            Builtin::Eq => ("operator", "eq"),
            Builtin::Ne => ("operator", "ne"),
            Builtin::Lt => ("operator", "lt"),
            Builtin::Le => ("operator", "le"),
            Builtin::Gt => ("operator", "gt"),
            Builtin::Ge => ("operator", "ge"),
            Builtin::Is => ("operator", "is_"),
            Builtin::IsNot => ("operator", "is_not"),
            Builtin::Contains => ("operator", "contains"),
            Builtin::GetItem => ("operator", "getitem"),
            Builtin::GetAttr => ("builtins", "getattr"),
            Builtin::Bool => ("builtins", "bool"),
            Builtin::All => ("builtins", "all"),
            Builtin::Any => ("builtins", "any"),
            Builtin::Filter => ("builtins", "filter"),
            Builtin::Next => ("builtins", "next"),
            Builtin::Iter => ("builtins", "iter"),
            Builtin::Len => ("builtins", "len"),
            Builtin::Slice => ("builtins", "slice"),
            Builtin::Set => ("builtins", "set"),
            Builtin::Print => ("builtins", "print"),
            Builtin::Import => ("builtins", "__import__"),
        }
    }
}

impl Value {
    /// Wraps text.
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(Rc::new(text.into()))
    }

    /// Wraps a machine integer.
    pub fn int(value: i64) -> Self {
        Value::Int(BigInt::from(value))
    }

    /// Wraps element values as a tuple.
    pub fn tuple(elements: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(elements))
    }

    /// Wraps element values as a fresh list.
    pub fn list(elements: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(elements)))
    }

    /// Python truthiness: `None` and empty containers are false, zero
    /// numbers are false, everything else is true.
    pub fn truth(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(value) => *value,
            Value::Int(value) => !value.is_zero(),
            Value::Float(value) => *value != 0.0,
            Value::Str(value) => !value.is_empty(),
            Value::Bytes(value) => !value.is_empty(),
            Value::Tuple(value) => !value.is_empty(),
            Value::List(value) => !value.borrow().is_empty(),
            Value::Dict(value) => !value.borrow().is_empty(),
            Value::Set(value) => !value.borrow().is_empty(),
            _ => true,
        }
    }

    /// Python `is`: identity for shared containers, value identity for
    /// the singletons. Numbers and strings compare by value here, an
    /// approximation of the host's interning that the compiler's own
    /// output never distinguishes.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            _ => self == other,
        }
    }

    /// The value as a float, when it is a number.
    pub(crate) fn as_float(&self) -> Option<f64> {
        match self {
            Value::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Value::Int(value) => value.to_f64(),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as an integer, when it is integral.
    pub(crate) fn as_int(&self) -> Option<BigInt> {
        match self {
            Value::Bool(value) => Some(BigInt::from(*value as u8)),
            Value::Int(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// A short type name for error messages, after Python's.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Ellipsis => "ellipsis",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Slice(_) => "slice",
            Value::Module(_) => "module",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Class(_) => "type",
            Value::Instance(_) => "object",
            Value::Iter(_) => "iterator",
            Value::Code(_) => "code",
        }
    }

    /// The text `print` shows: strings render bare, everything else as
    /// its repr.
    pub(crate) fn display_text(&self) -> String {
        match self {
            Value::Str(text) => text.to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Rc::ptr_eq(a, b),
            // bool == int == float, by numeric value.
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value the way `repr` would.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Ellipsis => write!(f, "Ellipsis"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{}", pyrepr::float_repr(*value)),
            Value::Str(value) => write!(f, "{}", pyrepr::str_repr(value)),
            Value::Bytes(value) => write!(f, "{}", pyrepr::bytes_repr(value)),
            Value::Tuple(elements) => {
                write!(f, "(")?;
                write_joined(f, elements)?;
                if elements.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(elements) => {
                write!(f, "[")?;
                write_joined(f, &elements.borrow())?;
                write!(f, "]")
            }
            Value::Dict(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Set(elements) => {
                let elements = elements.borrow();
                if elements.is_empty() {
                    return write!(f, "set()");
                }
                write!(f, "{{")?;
                write_joined(f, &elements)?;
                write!(f, "}}")
            }
            Value::Slice(bounds) => {
                write!(f, "slice({}, {}, {})", bounds.0, bounds.1, bounds.2)
            }
            Value::Module(name) => write!(f, "<module '{name}'>"),
            Value::Builtin(builtin) => {
                let (_, name) = builtin.qualname();
                write!(f, "<built-in function {name}>")
            }
            Value::Class(class) => write!(f, "<class '{}.{}'>", class.module, class.name),
            Value::Instance(instance) => {
                let instance = instance.borrow();
                write!(f, "<{}.{} object", instance.class.module, instance.class.name)?;
                for (name, value) in &instance.attrs {
                    write!(f, " {name}={value}")?;
                }
                write!(f, ">")
            }
            Value::Iter(_) => write!(f, "<iterator>"),
            Value::Code(_) => write!(f, "<code object <lambda>>"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, elements: &[Value]) -> fmt::Result {
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{element}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truth());
        assert!(!Value::int(0).truth());
        assert!(!Value::Float(0.0).truth());
        assert!(!Value::str("").truth());
        assert!(!Value::list(vec![]).truth());
        assert!(Value::int(-1).truth());
        assert!(Value::str("x").truth());
        assert!(Value::Builtin(Builtin::Add).truth());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Bool(true), Value::int(1));
        assert_eq!(Value::int(2), Value::Float(2.0));
        assert_ne!(Value::int(2), Value::str("2"));
    }

    #[test]
    fn test_list_equality_is_structural() {
        let a = Value::list(vec![Value::int(1)]);
        let b = Value::list(vec![Value::int(1)]);
        assert_eq!(a, b);
        assert!(!a.is_identical(&b));
        assert!(a.is_identical(&a.clone()));
    }

    #[test]
    fn test_repr() {
        assert_eq!(Value::tuple(vec![Value::int(1)]).to_string(), "(1,)");
        assert_eq!(
            Value::tuple(vec![Value::int(1), Value::str("a")]).to_string(),
            "(1, 'a')"
        );
        assert_eq!(
            Value::list(vec![Value::None, Value::Bool(true)]).to_string(),
            "[None, True]"
        );
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(
            Value::Set(Rc::new(RefCell::new(vec![]))).to_string(),
            "set()"
        );
    }

    #[test]
    fn test_instance_repr_shows_attributes() {
        let class = Rc::new(ClassRef {
            module: "mymod".to_string(),
            name: "Thing".to_string(),
        });
        let instance = Value::Instance(Rc::new(RefCell::new(Instance {
            class,
            args: vec![],
            attrs: vec![("x".to_string(), Value::int(5))],
        })));
        assert_eq!(instance.to_string(), "<mymod.Thing object x=5>");
    }
}
