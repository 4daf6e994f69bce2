//! The loader's native callables.
//!
//! Global lookups resolve here. The `operator` functions and the
//! `builtins` subset the compiler synthesizes calls against are
//! implemented natively; any other `module.name` becomes a placeholder
//! [`ClassRef`], so constructing and BUILDing unknown classes still
//! produces inspectable instances. Semantics follow Python where the
//! subset overlaps: floor division and modulo track the divisor's sign,
//! `/` always yields a float, comparisons order numbers across types.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::vm::value::{Builtin, ClassRef, Instance, Value};
use crate::vm::{LoadError, Machine};

/// Resolves a `module.name` pair the way GLOBAL / STACK_GLOBAL / INST
/// need it. Never fails: unknown names become placeholder classes.
pub(crate) fn find_global(module: &str, name: &str) -> Value {
    if module == "builtins" && name == "Ellipsis" {
        return Value::Ellipsis;
    }
    for builtin in BUILTINS {
        let (qual_module, qual_name) = builtin.qualname();
        if module == qual_module && name == qual_name {
            return Value::Builtin(*builtin);
        }
    }
    // `inv` and `invert` are the same operator function.
    if module == "operator" && name == "invert" {
        return Value::Builtin(Builtin::Invert);
    }
    Value::Class(Rc::new(ClassRef {
        module: module.to_string(),
        name: name.to_string(),
    }))
}

const BUILTINS: &[Builtin] = &[
    Builtin::Add,
    Builtin::Sub,
    Builtin::Mul,
    Builtin::MatMul,
    Builtin::TrueDiv,
    Builtin::FloorDiv,
    Builtin::Mod,
    Builtin::Pow,
    Builtin::LShift,
    Builtin::RShift,
    Builtin::BitOr,
    Builtin::BitXor,
    Builtin::BitAnd,
    Builtin::Invert,
    Builtin::Not,
    Builtin::Pos,
    Builtin::Neg,
    Builtin::Eq,
    Builtin::Ne,
    Builtin::Lt,
    Builtin::Le,
    Builtin::Gt,
    Builtin::Ge,
    Builtin::Is,
    Builtin::IsNot,
    Builtin::Contains,
    Builtin::GetItem,
    Builtin::GetAttr,
    Builtin::Bool,
    Builtin::All,
    Builtin::Any,
    Builtin::Filter,
    Builtin::Next,
    Builtin::Iter,
    Builtin::Len,
    Builtin::Slice,
    Builtin::Set,
    Builtin::Print,
    Builtin::Import,
];

fn type_error(message: impl Into<String>) -> LoadError {
    LoadError::Type {
        message: message.into(),
    }
}

fn arity_error(builtin: Builtin, got: usize) -> LoadError {
    let (_, name) = builtin.qualname();
    type_error(format!("{name}() got {got} argument(s)"))
}

impl Machine {
    /// Applies a callable to already-popped positional arguments; this
    /// is what REDUCE, INST, and NEWOBJ all bottom out in.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<Value, LoadError> {
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, args),
            Value::Class(class) => Ok(instantiate(class, args)),
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Value, LoadError> {
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(Value::display_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push_str(&line);
                self.output.push('\n');
                return Ok(Value::None);
            }
            Builtin::Filter => {
                let [predicate, iterable] = take_args(builtin, args)?;
                let mut kept = VecDeque::new();
                for element in iterate(&iterable)? {
                    if self
                        .call_value(predicate.clone(), vec![element.clone()])?
                        .truth()
                    {
                        kept.push_back(element);
                    }
                }
                return Ok(Value::Iter(Rc::new(RefCell::new(kept))));
            }
            _ => {}
        }
        call_pure(builtin, args)
    }
}

/// Everything that needs neither output capture nor a callback into
/// the machine.
fn call_pure(builtin: Builtin, args: Vec<Value>) -> Result<Value, LoadError> {
    match builtin {
        Builtin::Add => {
            let [a, b] = take_args(builtin, args)?;
            add(&a, &b)
        }
        Builtin::Sub => binary_numeric(builtin, args, |a, b| a - b, |a, b| Ok(a - b)),
        Builtin::Mul => binary_numeric(builtin, args, |a, b| a * b, |a, b| Ok(a * b)),
        Builtin::MatMul => Err(type_error("the loader does not implement matmul")),
        Builtin::TrueDiv => {
            let [a, b] = take_args(builtin, args)?;
            let (a, b) = both_floats(&a, &b)?;
            if b == 0.0 {
                return Err(type_error("division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        Builtin::FloorDiv => binary_numeric(
            builtin,
            args,
            |a, b| (a / b).floor(),
            |a, b| {
                if b.is_zero() {
                    return Err(type_error("division by zero"));
                }
                Ok(floor_div(a, b))
            },
        ),
        Builtin::Mod => binary_numeric(
            builtin,
            args,
            |a, b| a - (a / b).floor() * b,
            |a, b| {
                if b.is_zero() {
                    return Err(type_error("division by zero"));
                }
                Ok(a.clone() - floor_div(a, b.clone()) * b)
            },
        ),
        Builtin::Pow => {
            let [a, b] = take_args(builtin, args)?;
            power(&a, &b)
        }
        Builtin::LShift => binary_shift(builtin, args, |a, n| a << n),
        Builtin::RShift => binary_shift(builtin, args, |a, n| a >> n),
        Builtin::BitOr => binary_bits(builtin, args, |a, b| a | b),
        Builtin::BitXor => binary_bits(builtin, args, |a, b| a ^ b),
        Builtin::BitAnd => binary_bits(builtin, args, |a, b| a & b),
        Builtin::Invert => {
            let [a] = take_args(builtin, args)?;
            let a = int_operand(&a)?;
            Ok(Value::Int(-a - 1))
        }
        Builtin::Not => {
            let [a] = take_args(builtin, args)?;
            Ok(Value::Bool(!a.truth()))
        }
        Builtin::Pos => {
            let [a] = take_args(builtin, args)?;
            match a {
                Value::Bool(value) => Ok(Value::Int(BigInt::from(value as u8))),
                Value::Int(_) | Value::Float(_) => Ok(a),
                other => Err(type_error(format!("bad operand type: {}", other.type_name()))),
            }
        }
        Builtin::Neg => {
            let [a] = take_args(builtin, args)?;
            match a {
                Value::Bool(value) => Ok(Value::Int(BigInt::from(-(value as i8)))),
                Value::Int(value) => Ok(Value::Int(-value)),
                Value::Float(value) => Ok(Value::Float(-value)),
                other => Err(type_error(format!("bad operand type: {}", other.type_name()))),
            }
        }
        Builtin::Eq => {
            let [a, b] = take_args(builtin, args)?;
            Ok(Value::Bool(a == b))
        }
        Builtin::Ne => {
            let [a, b] = take_args(builtin, args)?;
            Ok(Value::Bool(a != b))
        }
        Builtin::Lt => compare(builtin, args, Ordering::is_lt),
        Builtin::Le => compare(builtin, args, Ordering::is_le),
        Builtin::Gt => compare(builtin, args, Ordering::is_gt),
        Builtin::Ge => compare(builtin, args, Ordering::is_ge),
        Builtin::Is => {
            let [a, b] = take_args(builtin, args)?;
            Ok(Value::Bool(a.is_identical(&b)))
        }
        Builtin::IsNot => {
            let [a, b] = take_args(builtin, args)?;
            Ok(Value::Bool(!a.is_identical(&b)))
        }
        Builtin::Contains => {
            let [container, item] = take_args(builtin, args)?;
            contains(&container, &item)
        }
        Builtin::GetItem => {
            let [container, index] = take_args(builtin, args)?;
            get_item(&container, &index)
        }
        Builtin::GetAttr => {
            let [object, name] = take_args(builtin, args)?;
            let Value::Str(name) = name else {
                return Err(type_error("attribute name must be a string"));
            };
            get_attr(&object, &name)
        }
        Builtin::Bool => {
            let [a] = take_args(builtin, args)?;
            Ok(Value::Bool(a.truth()))
        }
        Builtin::All => {
            let [iterable] = take_args(builtin, args)?;
            Ok(Value::Bool(iterate(&iterable)?.iter().all(Value::truth)))
        }
        Builtin::Any => {
            let [iterable] = take_args(builtin, args)?;
            Ok(Value::Bool(iterate(&iterable)?.iter().any(Value::truth)))
        }
        Builtin::Next => match args.len() {
            1 | 2 => {
                let mut args = args;
                let default = if args.len() == 2 { args.pop() } else { None };
                let Value::Iter(queue) = &args[0] else {
                    return Err(type_error(format!(
                        "'{}' object is not an iterator",
                        args[0].type_name()
                    )));
                };
                match queue.borrow_mut().pop_front() {
                    Some(value) => Ok(value),
                    None => default.ok_or_else(|| type_error("iterator is exhausted")),
                }
            }
            n => Err(arity_error(builtin, n)),
        },
        Builtin::Iter => {
            let [iterable] = take_args(builtin, args)?;
            let elements: VecDeque<Value> = iterate(&iterable)?.into();
            Ok(Value::Iter(Rc::new(RefCell::new(elements))))
        }
        Builtin::Len => {
            let [container] = take_args(builtin, args)?;
            let len = match &container {
                Value::Str(text) => text.chars().count(),
                Value::Bytes(bytes) => bytes.len(),
                Value::Tuple(elements) => elements.len(),
                Value::List(elements) => elements.borrow().len(),
                Value::Dict(pairs) => pairs.borrow().len(),
                Value::Set(elements) => elements.borrow().len(),
                other => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(BigInt::from(len)))
        }
        Builtin::Slice => {
            let [start, stop, step] = take_args(builtin, args)?;
            Ok(Value::Slice(Rc::new((start, stop, step))))
        }
        Builtin::Set => {
            let [iterable] = take_args(builtin, args)?;
            let mut elements: Vec<Value> = Vec::new();
            for element in iterate(&iterable)? {
                if !elements.contains(&element) {
                    elements.push(element);
                }
            }
            Ok(Value::Set(Rc::new(RefCell::new(elements))))
        }
        Builtin::Import => {
            let [name] = take_args(builtin, args)?;
            let Value::Str(name) = name else {
                return Err(type_error("__import__ needs a module name string"));
            };
            // A dotted import resolves the top-level module, like the
            // host function.
            let top = name.split('.').next().unwrap_or(&name).to_string();
            Ok(Value::Module(Rc::new(top)))
        }
        Builtin::Print | Builtin::Filter => unreachable!("handled on the machine"),
    }
}

fn instantiate(class: Rc<ClassRef>, args: Vec<Value>) -> Value {
    if class.module == "types" && class.name == "CodeType" {
        return Value::Code(Rc::new(args));
    }
    Value::Instance(Rc::new(RefCell::new(Instance {
        class,
        args,
        attrs: Vec::new(),
    })))
}

fn take_args<const N: usize>(builtin: Builtin, args: Vec<Value>) -> Result<[Value; N], LoadError> {
    let got = args.len();
    args.try_into().map_err(|_| arity_error(builtin, got))
}

// ============================================================================
// Numbers
// ============================================================================

fn int_operand(value: &Value) -> Result<BigInt, LoadError> {
    value
        .as_int()
        .ok_or_else(|| type_error(format!("expected an integer, got {}", value.type_name())))
}

fn both_floats(a: &Value, b: &Value) -> Result<(f64, f64), LoadError> {
    match (a.as_float(), b.as_float()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(type_error(format!(
            "unsupported operand types: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Dispatches a two-argument numeric operator: integer math when both
/// operands are integral, float math when either is a float.
fn binary_numeric(
    builtin: Builtin,
    args: Vec<Value>,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(BigInt, BigInt) -> Result<BigInt, LoadError>,
) -> Result<Value, LoadError> {
    let [a, b] = take_args(builtin, args)?;
    if let (Some(a), Some(b)) = (a.as_int(), b.as_int()) {
        return Ok(Value::Int(int_op(a, b)?));
    }
    let (a, b) = both_floats(&a, &b)?;
    if matches!(builtin, Builtin::FloorDiv | Builtin::Mod) && b == 0.0 {
        return Err(type_error("division by zero"));
    }
    Ok(Value::Float(float_op(a, b)))
}

fn binary_bits(
    builtin: Builtin,
    args: Vec<Value>,
    op: impl Fn(BigInt, BigInt) -> BigInt,
) -> Result<Value, LoadError> {
    let [a, b] = take_args(builtin, args)?;
    Ok(Value::Int(op(int_operand(&a)?, int_operand(&b)?)))
}

fn binary_shift(
    builtin: Builtin,
    args: Vec<Value>,
    op: impl Fn(BigInt, usize) -> BigInt,
) -> Result<Value, LoadError> {
    let [a, b] = take_args(builtin, args)?;
    let a = int_operand(&a)?;
    let by = int_operand(&b)?
        .to_usize()
        .ok_or_else(|| type_error("shift count is negative or too large"))?;
    Ok(Value::Int(op(a, by)))
}

/// Floor division on integers, rounding toward negative infinity.
fn floor_div(a: BigInt, b: BigInt) -> BigInt {
    let quotient = &a / &b;
    let remainder = &a - &quotient * &b;
    if !remainder.is_zero() && (remainder.is_negative() != b.is_negative()) {
        quotient - 1
    } else {
        quotient
    }
}

fn add(a: &Value, b: &Value) -> Result<Value, LoadError> {
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut out = a.as_ref().clone();
            out.extend_from_slice(b);
            Ok(Value::Bytes(Rc::new(out)))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            let mut out = a.as_ref().clone();
            out.extend(b.iter().cloned());
            Ok(Value::tuple(out))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        _ => {
            if let (Some(a), Some(b)) = (a.as_int(), b.as_int()) {
                return Ok(Value::Int(a + b));
            }
            let (a, b) = both_floats(a, b)?;
            Ok(Value::Float(a + b))
        }
    }
}

fn power(a: &Value, b: &Value) -> Result<Value, LoadError> {
    if let (Some(base), Some(exponent)) = (a.as_int(), b.as_int()) {
        if !exponent.is_negative() {
            let exponent = exponent
                .to_u32()
                .ok_or_else(|| type_error("exponent is too large"))?;
            return Ok(Value::Int(num_traits::Pow::pow(&base, exponent)));
        }
    }
    let (base, exponent) = both_floats(a, b)?;
    Ok(Value::Float(base.powf(exponent)))
}

// ============================================================================
// Comparison and containment
// ============================================================================

fn compare(
    builtin: Builtin,
    args: Vec<Value>,
    accept: impl Fn(Ordering) -> bool,
) -> Result<Value, LoadError> {
    let [a, b] = take_args(builtin, args)?;
    Ok(Value::Bool(accept(ordering(&a, &b)?)))
}

/// Python's `<` ordering for the types the loader holds: numbers across
/// numeric types, strings, bytes, and sequences element by element.
fn ordering(a: &Value, b: &Value) -> Result<Ordering, LoadError> {
    let ordered = match (a, b) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Tuple(a), Value::Tuple(b)) => return sequence_ordering(a, b),
        (Value::List(a), Value::List(b)) => {
            return sequence_ordering(&a.borrow(), &b.borrow());
        }
        _ => {
            let (a_num, b_num) = both_floats(a, b).map_err(|_| {
                type_error(format!(
                    "'{}' and '{}' are not orderable",
                    a.type_name(),
                    b.type_name()
                ))
            })?;
            a_num
                .partial_cmp(&b_num)
                .ok_or_else(|| type_error("nan is not orderable"))?
        }
    };
    Ok(ordered)
}

fn sequence_ordering(a: &[Value], b: &[Value]) -> Result<Ordering, LoadError> {
    for (left, right) in a.iter().zip(b) {
        if left != right {
            return ordering(left, right);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn contains(container: &Value, item: &Value) -> Result<Value, LoadError> {
    let found = match container {
        Value::Str(text) => match item {
            Value::Str(needle) => text.contains(needle.as_str()),
            _ => return Err(type_error("'in <string>' requires a string operand")),
        },
        Value::Tuple(elements) => elements.contains(item),
        Value::List(elements) => elements.borrow().contains(item),
        Value::Set(elements) => elements.borrow().contains(item),
        Value::Dict(pairs) => pairs.borrow().iter().any(|(key, _)| key == item),
        Value::Iter(queue) => queue.borrow().contains(item),
        other => {
            return Err(type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(Value::Bool(found))
}

/// Snapshots an iterable's elements in order.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, LoadError> {
    let elements = match value {
        Value::Tuple(elements) => elements.as_ref().clone(),
        Value::List(elements) => elements.borrow().clone(),
        Value::Set(elements) => elements.borrow().clone(),
        Value::Iter(queue) => queue.borrow_mut().drain(..).collect(),
        Value::Str(text) => text.chars().map(|ch| Value::str(ch.to_string())).collect(),
        Value::Dict(pairs) => pairs.borrow().iter().map(|(key, _)| key.clone()).collect(),
        other => {
            return Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(elements)
}

// ============================================================================
// Subscripts and attributes
// ============================================================================

fn get_item(container: &Value, index: &Value) -> Result<Value, LoadError> {
    if let Value::Slice(bounds) = index {
        return get_slice(container, bounds);
    }
    match container {
        Value::Dict(pairs) => pairs
            .borrow()
            .iter()
            .find(|(key, _)| key == index)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| type_error(format!("key {index} is not in the dict"))),
        Value::List(elements) => {
            let elements = elements.borrow();
            Ok(elements[sequence_index(index, elements.len())?].clone())
        }
        Value::Tuple(elements) => Ok(elements[sequence_index(index, elements.len())?].clone()),
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let at = sequence_index(index, chars.len())?;
            Ok(Value::str(chars[at].to_string()))
        }
        Value::Bytes(bytes) => {
            let at = sequence_index(index, bytes.len())?;
            Ok(Value::int(bytes[at] as i64))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Resolves an index against a sequence length, counting negative
/// indices from the end.
fn sequence_index(index: &Value, len: usize) -> Result<usize, LoadError> {
    let index = index
        .as_int()
        .ok_or_else(|| type_error("sequence index must be an integer"))?;
    let index = if index.is_negative() {
        index + BigInt::from(len)
    } else {
        index
    };
    index
        .to_usize()
        .filter(|&at| at < len)
        .ok_or_else(|| type_error("sequence index out of range"))
}

fn get_slice(container: &Value, bounds: &(Value, Value, Value)) -> Result<Value, LoadError> {
    match container {
        Value::List(elements) => {
            let taken = slice_elements(&elements.borrow(), bounds)?;
            Ok(Value::list(taken))
        }
        Value::Tuple(elements) => Ok(Value::tuple(slice_elements(elements, bounds)?)),
        Value::Str(text) => {
            let chars: Vec<Value> = text.chars().map(|ch| Value::str(ch.to_string())).collect();
            let text: String = slice_elements(&chars, bounds)?
                .iter()
                .map(Value::display_text)
                .collect();
            Ok(Value::str(text))
        }
        other => Err(type_error(format!(
            "'{}' object cannot be sliced",
            other.type_name()
        ))),
    }
}

fn slice_elements(elements: &[Value], bounds: &(Value, Value, Value)) -> Result<Vec<Value>, LoadError> {
    let (start, stop, step) = slice_indices(bounds, elements.len())?;
    let mut out = Vec::new();
    let mut at = start;
    if step > 0 {
        while at < stop {
            out.push(elements[at as usize].clone());
            at += step;
        }
    } else {
        while at > stop {
            out.push(elements[at as usize].clone());
            at += step;
        }
    }
    Ok(out)
}

/// `slice.indices`: clamps the written bounds to the sequence length,
/// filling absent bounds per the step's direction.
fn slice_indices(
    bounds: &(Value, Value, Value),
    len: usize,
) -> Result<(i64, i64, i64), LoadError> {
    let len = len as i64;
    let bound = |value: &Value| -> Result<Option<i64>, LoadError> {
        match value {
            Value::None => Ok(None),
            other => other
                .as_int()
                .and_then(|index| index.to_i64())
                .map(Some)
                .ok_or_else(|| type_error("slice bounds must be integers or None")),
        }
    };
    let step = bound(&bounds.2)?.unwrap_or(1);
    if step == 0 {
        return Err(type_error("slice step cannot be zero"));
    }
    let clamp = |index: i64, low: i64, high: i64| -> i64 {
        let index = if index < 0 { index + len } else { index };
        index.clamp(low, high)
    };
    let (low, high) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let start = match bound(&bounds.0)? {
        Some(index) => clamp(index, low, high),
        None => {
            if step > 0 {
                0
            } else {
                len - 1
            }
        }
    };
    let stop = match bound(&bounds.1)? {
        Some(index) => clamp(index, low, high),
        None => {
            if step > 0 {
                len
            } else {
                -1
            }
        }
    };
    Ok((start, stop, step))
}

fn get_attr(object: &Value, name: &str) -> Result<Value, LoadError> {
    match object {
        Value::Instance(instance) => instance
            .borrow()
            .attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                type_error(format!(
                    "'{}' object has no attribute '{name}'",
                    object.type_name()
                ))
            }),
        // Module attributes go through the global registry, so
        // `operator.add` read off an imported module is the same native
        // function GLOBAL would load.
        Value::Module(module) => Ok(find_global(module, name)),
        other => Err(type_error(format!(
            "the loader cannot read attribute '{name}' of a '{}' object",
            other.type_name()
        ))),
    }
}
