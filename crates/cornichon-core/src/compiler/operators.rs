//! Mapping from AST operators to Python `operator` module functions.
//!
//! The pickle machine has no arithmetic, so every operator becomes a
//! REDUCE call against a function from the `operator` module. These
//! tables give the function name for each operator; the code generator
//! loads `operator.<name>` and calls it.

use crate::ast::{BinOpKind, BoolOpKind, CmpOp, UnaryOpKind};

/// The module every operator function is imported from.
pub const MODULE: &str = "operator";

/// The `operator` function implementing a binary operator.
pub fn binop_function(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "add",
        BinOpKind::Sub => "sub",
        BinOpKind::Mult => "mul",
        BinOpKind::MatMult => "matmul",
        BinOpKind::Div => "truediv",
        BinOpKind::FloorDiv => "floordiv",
        BinOpKind::Mod => "mod",
        BinOpKind::Pow => "pow",
        BinOpKind::LShift => "lshift",
        BinOpKind::RShift => "rshift",
        BinOpKind::BitAnd => "and_",
        BinOpKind::BitOr => "or_",
        BinOpKind::BitXor => "xor",
    }
}

/// The `operator` function implementing a unary operator.
pub fn unaryop_function(op: UnaryOpKind) -> &'static str {
    match op {
        UnaryOpKind::Neg => "neg",
        UnaryOpKind::Pos => "pos",
        UnaryOpKind::Invert => "invert",
        UnaryOpKind::Not => "not_",
    }
}

/// The `operator` function implementing a comparison.
///
/// `In` and `NotIn` both map to `contains`, whose parameter order is
/// (container, item): the caller swaps the operands, and `NotIn`
/// additionally wraps the result in `not_`.
pub fn cmpop_function(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::NotEq => "ne",
        CmpOp::Lt => "lt",
        CmpOp::LtE => "le",
        CmpOp::Gt => "gt",
        CmpOp::GtE => "ge",
        CmpOp::Is => "is_",
        CmpOp::IsNot => "is_not",
        CmpOp::In | CmpOp::NotIn => "contains",
    }
}

/// The predicate `filter` uses when short-circuiting a boolean chain:
/// `or` scans for the first truthy operand, `and` for the first falsy.
pub fn boolop_predicate(op: BoolOpKind) -> (&'static str, &'static str) {
    match op {
        BoolOpKind::Or => ("builtins", "bool"),
        BoolOpKind::And => (MODULE, "not_"),
    }
}
