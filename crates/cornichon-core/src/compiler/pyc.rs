//! Lambda bodies lowered to CPython 3.8 code objects.
//!
//! A lambda cannot run on the pickle machine, which has no call frames.
//! Instead the parameter list and body compile here, at pickle-compile
//! time, into host wordcode; the stream then rebuilds a live callable at
//! load time by chaining `types.CodeType(...)` into
//! `types.FunctionType(...)`.
//!
//! The emitted wordcode is version-locked to CPython 3.8, exactly like a
//! `.pyc` file: two bytes per instruction, arguments over 255 carried by
//! `EXTENDED_ARG` prefixes, jump arguments counted in byte offsets.
//! Loading such a stream under any other interpreter version fails.
//!
//! Names resolve in three tiers. A parameter becomes `LOAD_FAST`. A name
//! the surrounding program has memoized is captured by value: the
//! function's globals dict gets a copy from the memo slot, and the body
//! reads it with `LOAD_GLOBAL`. A built-in name also becomes
//! `LOAD_GLOBAL` but is not captured; the loading interpreter supplies
//! its own `builtins`. Anything else is a name error at compile time.

use crate::ast::*;
use crate::compiler::codegen::{RESULT_MISUSE, RESULT_NAME, is_ambient_builtin};
use crate::compiler::memo::{MemoKey, MemoTable};
use crate::error::CompileError;
use crate::lexer::Span;

/// `co_flags` for every lowered lambda:
/// `CO_OPTIMIZED | CO_NEWLOCALS | CO_NOFREE`.
pub(crate) const CO_FLAGS: usize = 0x43;

const MAX_NODE_DEPTH: usize = 1_000;

// ============================================================================
// CPython 3.8 opcodes (Include/opcode.h)
// ============================================================================

const DUP_TOP: u8 = 4;
const UNARY_POSITIVE: u8 = 10;
const UNARY_NEGATIVE: u8 = 11;
const UNARY_NOT: u8 = 12;
const UNARY_INVERT: u8 = 15;
const BINARY_MATRIX_MULTIPLY: u8 = 16;
const BINARY_POWER: u8 = 19;
const BINARY_MULTIPLY: u8 = 20;
const BINARY_MODULO: u8 = 22;
const BINARY_ADD: u8 = 23;
const BINARY_SUBTRACT: u8 = 24;
const BINARY_SUBSCR: u8 = 25;
const BINARY_FLOOR_DIVIDE: u8 = 26;
const BINARY_TRUE_DIVIDE: u8 = 27;
const BINARY_LSHIFT: u8 = 62;
const BINARY_RSHIFT: u8 = 63;
const BINARY_AND: u8 = 64;
const BINARY_XOR: u8 = 65;
const BINARY_OR: u8 = 66;
const RETURN_VALUE: u8 = 83;
const LOAD_CONST: u8 = 100;
const BUILD_TUPLE: u8 = 102;
const BUILD_LIST: u8 = 103;
const BUILD_SET: u8 = 104;
const BUILD_MAP: u8 = 105;
const LOAD_ATTR: u8 = 106;
const COMPARE_OP: u8 = 107;
const JUMP_IF_FALSE_OR_POP: u8 = 111;
const JUMP_IF_TRUE_OR_POP: u8 = 112;
const LOAD_GLOBAL: u8 = 116;
const LOAD_FAST: u8 = 124;
const STORE_FAST: u8 = 125;
const CALL_FUNCTION: u8 = 131;
const BUILD_SLICE: u8 = 133;
const EXTENDED_ARG: u8 = 144;

fn binary_opcode(op: BinOpKind) -> u8 {
    match op {
        BinOpKind::Add => BINARY_ADD,
        BinOpKind::Sub => BINARY_SUBTRACT,
        BinOpKind::Mult => BINARY_MULTIPLY,
        BinOpKind::MatMult => BINARY_MATRIX_MULTIPLY,
        BinOpKind::Div => BINARY_TRUE_DIVIDE,
        BinOpKind::FloorDiv => BINARY_FLOOR_DIVIDE,
        BinOpKind::Mod => BINARY_MODULO,
        BinOpKind::Pow => BINARY_POWER,
        BinOpKind::LShift => BINARY_LSHIFT,
        BinOpKind::RShift => BINARY_RSHIFT,
        BinOpKind::BitAnd => BINARY_AND,
        BinOpKind::BitOr => BINARY_OR,
        BinOpKind::BitXor => BINARY_XOR,
    }
}

fn unary_opcode(op: UnaryOpKind) -> u8 {
    match op {
        UnaryOpKind::Neg => UNARY_NEGATIVE,
        UnaryOpKind::Pos => UNARY_POSITIVE,
        UnaryOpKind::Invert => UNARY_INVERT,
        UnaryOpKind::Not => UNARY_NOT,
    }
}

/// `COMPARE_OP` argument: index into the interpreter's `cmp_op` table.
fn compare_index(op: CmpOp) -> u32 {
    match op {
        CmpOp::Lt => 0,
        CmpOp::LtE => 1,
        CmpOp::Eq => 2,
        CmpOp::NotEq => 3,
        CmpOp::Gt => 4,
        CmpOp::GtE => 5,
        CmpOp::In => 6,
        CmpOp::NotIn => 7,
        CmpOp::Is => 8,
        CmpOp::IsNot => 9,
    }
}

// ============================================================================
// Lowering
// ============================================================================

/// The pieces of a lowered lambda, ready for the stream writer to pack
/// into a `types.CodeType` call.
#[derive(Debug)]
pub(crate) struct Lowered {
    /// The wordcode, ending in `RETURN_VALUE`
    pub(crate) code: Vec<u8>,
    /// `co_consts`, deduplicated by type and value
    pub(crate) consts: Vec<Constant>,
    /// `co_names`: globals and attribute names, in first-use order
    pub(crate) names: Vec<String>,
    /// `co_varnames`: the parameters, then hidden comparison temporaries
    pub(crate) varnames: Vec<String>,
    /// Memoized free variables to copy into the function's globals,
    /// as (name, memo slot) pairs in first-use order
    pub(crate) captures: Vec<(String, u32)>,
    /// Computed `co_stacksize`
    pub(crate) stacksize: usize,
}

/// Lowers one lambda. `memo` is the surrounding program's memo table,
/// consulted read-only to resolve free names.
pub(crate) fn lower(
    params: &[Param],
    body: &Expr,
    memo: &MemoTable,
) -> Result<Lowered, CompileError> {
    let mut builder = CodeBuilder::new(params, memo);
    builder.lower_expression(body)?;
    Ok(builder.finish())
}

struct CodeBuilder<'a> {
    memo: &'a MemoTable,
    code: Vec<u8>,
    consts: Vec<Constant>,
    names: Vec<String>,
    varnames: Vec<String>,
    captures: Vec<(String, u32)>,
    /// Leading entries of `varnames` that are real parameters.
    params: usize,
    temps: u32,
    /// Simulated operand stack depth on the fall-through path.
    stack: usize,
    stacksize: usize,
    nesting: usize,
}

impl<'a> CodeBuilder<'a> {
    fn new(params: &[Param], memo: &'a MemoTable) -> Self {
        Self {
            memo,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: params.iter().map(|param| param.name.clone()).collect(),
            captures: Vec::new(),
            params: params.len(),
            temps: 0,
            stack: 0,
            stacksize: 0,
            nesting: 0,
        }
    }

    fn finish(mut self) -> Lowered {
        self.emit(RETURN_VALUE, 0);
        Lowered {
            code: self.code,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
            captures: self.captures,
            stacksize: self.stacksize,
        }
    }

    fn lower_expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.nesting += 1;
        if self.nesting > MAX_NODE_DEPTH {
            return Err(CompileError::TooDeep {
                message: "node nesting is too deep".to_string(),
                span: expr.span,
            });
        }
        match &expr.kind {
            ExprKind::Constant(value) => {
                let index = self.const_index(value);
                self.emit(LOAD_CONST, index);
            }
            ExprKind::Name(name) => self.lower_name(name, expr.span)?,
            ExprKind::Tuple(elements) => self.lower_elements(elements, BUILD_TUPLE)?,
            ExprKind::List(elements) => self.lower_elements(elements, BUILD_LIST)?,
            ExprKind::Set(elements) => self.lower_elements(elements, BUILD_SET)?,
            ExprKind::Dict { keys, values } => {
                for (key, value) in keys.iter().zip(values) {
                    self.lower_expression(key)?;
                    self.lower_expression(value)?;
                }
                self.emit(BUILD_MAP, keys.len() as u32);
            }
            ExprKind::BinOp { op, left, right } => {
                self.lower_expression(left)?;
                self.lower_expression(right)?;
                self.emit(binary_opcode(*op), 0);
            }
            ExprKind::UnaryOp { op, operand } => {
                self.lower_expression(operand)?;
                self.emit(unary_opcode(*op), 0);
            }
            ExprKind::BoolOp { op, values } => self.lower_boolop(*op, values, expr.span)?,
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.lower_compare(left, ops, comparators, expr.span)?,
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                if let Some(keyword) = keywords.first() {
                    return Err(CompileError::UnsupportedConstruct {
                        message: "keyword arguments are not supported".to_string(),
                        span: keyword.span,
                    });
                }
                self.lower_expression(func)?;
                for arg in args {
                    self.lower_expression(arg)?;
                }
                self.emit(CALL_FUNCTION, args.len() as u32);
            }
            ExprKind::Subscript { value, index } => {
                self.lower_expression(value)?;
                self.lower_expression(index)?;
                self.emit(BINARY_SUBSCR, 0);
            }
            ExprKind::Slice { lower, upper, step } => {
                for bound in [lower, upper, step] {
                    match bound {
                        Some(expr) => self.lower_expression(expr)?,
                        None => {
                            let index = self.const_index(&Constant::None);
                            self.emit(LOAD_CONST, index);
                        }
                    }
                }
                self.emit(BUILD_SLICE, 3);
            }
            ExprKind::Attribute { value, attr } => {
                self.lower_expression(value)?;
                let index = self.name_index(attr);
                self.emit(LOAD_ATTR, index);
            }
            ExprKind::Lambda { .. } => {
                return Err(CompileError::UnsupportedConstruct {
                    message: "nested lambdas are not supported".to_string(),
                    span: expr.span,
                });
            }
        }
        self.nesting -= 1;
        Ok(())
    }

    fn lower_name(&mut self, name: &str, span: Span) -> Result<(), CompileError> {
        if name == RESULT_NAME {
            return Err(CompileError::ReservedName {
                message: RESULT_MISUSE.to_string(),
                span,
            });
        }
        if let Some(index) = self.varnames[..self.params]
            .iter()
            .position(|param| param == name)
        {
            self.emit(LOAD_FAST, index as u32);
            return Ok(());
        }
        if let Some(slot) = self.memo.slot(&MemoKey::Name(name.to_string())) {
            if !self.captures.iter().any(|(captured, _)| captured == name) {
                self.captures.push((name.to_string(), slot));
            }
            let index = self.name_index(name);
            self.emit(LOAD_GLOBAL, index);
            return Ok(());
        }
        if is_ambient_builtin(name) {
            let index = self.name_index(name);
            self.emit(LOAD_GLOBAL, index);
            return Ok(());
        }
        Err(CompileError::NameResolution {
            message: format!("name '{name}' is not defined"),
            span,
        })
    }

    fn lower_elements(&mut self, elements: &[Expr], build: u8) -> Result<(), CompileError> {
        for element in elements {
            self.lower_expression(element)?;
        }
        self.emit(build, elements.len() as u32);
        Ok(())
    }

    /// `and`/`or` short-circuit natively here: each operand but the last
    /// conditionally jumps to the end, leaving itself as the result when
    /// it decides the outcome.
    fn lower_boolop(
        &mut self,
        op: BoolOpKind,
        values: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        let jump = match op {
            BoolOpKind::And => JUMP_IF_FALSE_OR_POP,
            BoolOpKind::Or => JUMP_IF_TRUE_OR_POP,
        };
        let mut jumps = Vec::new();
        for (i, value) in values.iter().enumerate() {
            self.lower_expression(value)?;
            if i + 1 < values.len() {
                jumps.push(self.emit_jump(jump));
            }
        }
        self.patch_jumps(&jumps, span)
    }

    /// A comparison chain `a < b <= c` evaluates each middle operand
    /// once: `DUP_TOP` plus a hidden local keeps it for the next pair,
    /// and a failed pair short-circuits to the end with `False` on the
    /// stack.
    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        let mut jumps = Vec::new();
        let mut prev: Option<u32> = None;
        for (i, (op, comparator)) in ops.iter().zip(comparators).enumerate() {
            match prev {
                Some(index) => self.emit(LOAD_FAST, index),
                None => self.lower_expression(left)?,
            }
            self.lower_expression(comparator)?;
            if i + 1 < ops.len() {
                let temp = self.temp();
                self.emit(DUP_TOP, 0);
                self.emit(STORE_FAST, temp);
                prev = Some(temp);
            }
            self.emit(COMPARE_OP, compare_index(*op));
            if i + 1 < ops.len() {
                jumps.push(self.emit_jump(JUMP_IF_FALSE_OR_POP));
            }
        }
        self.patch_jumps(&jumps, span)
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    fn const_index(&mut self, value: &Constant) -> u32 {
        if let Some(index) = self.consts.iter().position(|c| c == value) {
            return index as u32;
        }
        self.consts.push(value.clone());
        (self.consts.len() - 1) as u32
    }

    fn name_index(&mut self, name: &str) -> u32 {
        if let Some(index) = self.names.iter().position(|n| n == name) {
            return index as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    /// Allocates a hidden local for a comparison chain. The dot prefix
    /// keeps it out of every identifier namespace.
    fn temp(&mut self) -> u32 {
        let index = self.varnames.len() as u32;
        self.varnames.push(format!(".cmp{}", self.temps));
        self.temps += 1;
        index
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    fn emit(&mut self, op: u8, arg: u32) {
        if arg >= 1 << 24 {
            self.word(EXTENDED_ARG, (arg >> 24) as u8);
        }
        if arg >= 1 << 16 {
            self.word(EXTENDED_ARG, (arg >> 16) as u8);
        }
        if arg >= 1 << 8 {
            self.word(EXTENDED_ARG, (arg >> 8) as u8);
        }
        self.word(op, arg as u8);
        self.track(op, arg);
    }

    /// Emits a forward jump with a placeholder target. The jump always
    /// carries one `EXTENDED_ARG` so patching never resizes the code.
    /// Returns the byte offset of the placeholder for [`Self::patch_jumps`].
    fn emit_jump(&mut self, op: u8) -> usize {
        let at = self.code.len();
        self.word(EXTENDED_ARG, 0);
        self.word(op, 0);
        self.track(op, 0);
        at
    }

    /// Points every placeholder in `jumps` at the current end of code.
    fn patch_jumps(&mut self, jumps: &[usize], span: Span) -> Result<(), CompileError> {
        let target = self.code.len();
        if target > 0xFFFF {
            // One EXTENDED_ARG prefix caps jump targets at 16 bits.
            return Err(CompileError::UnsupportedConstruct {
                message: "lambda body is too large".to_string(),
                span,
            });
        }
        for &at in jumps {
            self.code[at + 1] = (target >> 8) as u8;
            self.code[at + 3] = (target & 0xFF) as u8;
        }
        Ok(())
    }

    fn word(&mut self, op: u8, arg: u8) {
        self.code.push(op);
        self.code.push(arg);
    }

    /// Replays the interpreter's stack effect for `op` to maintain the
    /// running depth and its high-water mark. Conditional jumps follow
    /// the fall-through path, which pops; the jump path keeps the value
    /// and lands at a merge point where both paths agree.
    fn track(&mut self, op: u8, arg: u32) {
        let n = arg as usize;
        let (pops, pushes) = match op {
            LOAD_CONST | LOAD_FAST | LOAD_GLOBAL | DUP_TOP => (0, 1),
            STORE_FAST | RETURN_VALUE | JUMP_IF_FALSE_OR_POP | JUMP_IF_TRUE_OR_POP => (1, 0),
            UNARY_POSITIVE | UNARY_NEGATIVE | UNARY_NOT | UNARY_INVERT | LOAD_ATTR => (1, 1),
            BUILD_TUPLE | BUILD_LIST | BUILD_SET | BUILD_SLICE => (n, 1),
            BUILD_MAP => (2 * n, 1),
            CALL_FUNCTION => (n + 1, 1),
            EXTENDED_ARG => (0, 0),
            // The binary operators and COMPARE_OP.
            _ => (2, 1),
        };
        self.stack = self.stack - pops + pushes;
        self.stacksize = self.stacksize.max(self.stack);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::Parser;

    fn lambda_parts(source: &str) -> (Vec<Param>, Expr) {
        let module = Parser::new(source).unwrap().parse_module().unwrap();
        let StmtKind::Expr { value } = &module.body[0].kind else {
            panic!("expected a bare expression statement");
        };
        let ExprKind::Lambda { params, body } = &value.kind else {
            panic!("expected a lambda");
        };
        (params.clone(), (**body).clone())
    }

    fn lower_with(source: &str, memo: &MemoTable) -> Result<Lowered, CompileError> {
        let (params, body) = lambda_parts(source);
        lower(&params, &body, memo)
    }

    fn lower_source(source: &str) -> Lowered {
        lower_with(source, &MemoTable::new()).unwrap()
    }

    #[test]
    fn test_identity() {
        let lowered = lower_source("lambda x: x");
        assert_eq!(lowered.code, b"\x7c\x00\x53\x00");
        assert_eq!(lowered.varnames, vec!["x"]);
        assert!(lowered.names.is_empty());
        assert!(lowered.consts.is_empty());
        assert!(lowered.captures.is_empty());
        assert_eq!(lowered.stacksize, 1);
    }

    #[test]
    fn test_binary_add() {
        let lowered = lower_source("lambda a, b: a + b");
        assert_eq!(lowered.code, b"\x7c\x00\x7c\x01\x17\x00\x53\x00");
        assert_eq!(lowered.varnames, vec!["a", "b"]);
        assert_eq!(lowered.stacksize, 2);
    }

    #[test]
    fn test_constants_deduplicate_by_type_and_value() {
        let lowered = lower_source("lambda: 1 + 1");
        assert_eq!(lowered.consts, vec![Constant::Int(1.into())]);
        assert_eq!(lowered.code, b"\x64\x00\x64\x00\x17\x00\x53\x00");

        let lowered = lower_source("lambda: (True, 1)");
        assert_eq!(
            lowered.consts,
            vec![Constant::Bool(true), Constant::Int(1.into())]
        );
    }

    #[test]
    fn test_memoized_free_name_is_captured() {
        let mut memo = MemoTable::new();
        let slot = memo.bind(MemoKey::Name("y".to_string()));
        let lowered = lower_with("lambda: y", &memo).unwrap();
        assert_eq!(lowered.captures, vec![("y".to_string(), slot)]);
        assert_eq!(lowered.names, vec!["y"]);
        assert_eq!(lowered.code, b"\x74\x00\x53\x00");
    }

    #[test]
    fn test_builtin_name_is_not_captured() {
        let lowered = lower_source("lambda x: len(x)");
        assert_eq!(lowered.names, vec!["len"]);
        assert!(lowered.captures.is_empty());
        assert_eq!(lowered.code, b"\x74\x00\x7c\x00\x83\x01\x53\x00");
        assert_eq!(lowered.stacksize, 2);
    }

    #[test]
    fn test_parameter_shadows_memoized_name() {
        let mut memo = MemoTable::new();
        memo.bind(MemoKey::Name("x".to_string()));
        let lowered = lower_with("lambda x: x", &memo).unwrap();
        assert!(lowered.captures.is_empty());
        assert_eq!(lowered.code, b"\x7c\x00\x53\x00");
    }

    #[test]
    fn test_unknown_name_errors() {
        let err = lower_with("lambda: zzz", &MemoTable::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "name error: name 'zzz' is not defined"
        );
    }

    #[test]
    fn test_reserved_name_in_body_errors() {
        let err = lower_with("lambda: RESULT", &MemoTable::new()).unwrap_err();
        assert!(matches!(err, CompileError::ReservedName { .. }));
    }

    #[test]
    fn test_nested_lambda_errors() {
        let err = lower_with("lambda: lambda: 1", &MemoTable::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported construct: nested lambdas are not supported"
        );
    }

    #[test]
    fn test_keyword_argument_errors() {
        let err = lower_with("lambda: len(x=1)", &MemoTable::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported construct: keyword arguments are not supported"
        );
    }

    #[test]
    fn test_boolop_short_circuits() {
        let lowered = lower_source("lambda a, b: a or b");
        assert_eq!(lowered.code, b"\x7c\x00\x90\x00\x70\x08\x7c\x01\x53\x00");
        assert_eq!(lowered.stacksize, 1);

        let lowered = lower_source("lambda a, b: a and b");
        assert_eq!(lowered.code, b"\x7c\x00\x90\x00\x6f\x08\x7c\x01\x53\x00");
    }

    #[test]
    fn test_chained_comparison_uses_hidden_local() {
        let lowered = lower_source("lambda a, b, c: a < b < c");
        assert_eq!(lowered.varnames, vec!["a", "b", "c", ".cmp0"]);
        assert_eq!(
            lowered.code,
            b"\x7c\x00\x7c\x01\x04\x00\x7d\x03\x6b\x00\x90\x00\x6f\x14\x7c\x03\x7c\x02\x6b\x00\x53\x00"
        );
        assert_eq!(lowered.stacksize, 3);
    }

    #[test]
    fn test_single_comparison_has_no_jump() {
        let lowered = lower_source("lambda a, b: a in b");
        assert_eq!(lowered.code, b"\x7c\x00\x7c\x01\x6b\x06\x53\x00");
        assert_eq!(lowered.varnames, vec!["a", "b"]);
    }

    #[test]
    fn test_displays_and_slices() {
        let lowered = lower_source("lambda x: x[1:2]");
        // x, 1, 2, None, BUILD_SLICE 3, BINARY_SUBSCR.
        assert_eq!(
            lowered.code,
            b"\x7c\x00\x64\x00\x64\x01\x64\x02\x85\x03\x19\x00\x53\x00"
        );
        assert_eq!(
            lowered.consts,
            vec![
                Constant::Int(1.into()),
                Constant::Int(2.into()),
                Constant::None
            ]
        );
        assert_eq!(lowered.stacksize, 4);

        let lowered = lower_source("lambda: {1: 2}");
        assert_eq!(lowered.code, b"\x64\x00\x64\x01\x69\x01\x53\x00");
    }

    #[test]
    fn test_attribute_access() {
        let lowered = lower_source("lambda x: x.upper()");
        assert_eq!(lowered.names, vec!["upper"]);
        assert_eq!(lowered.code, b"\x7c\x00\x6a\x00\x83\x00\x53\x00");
    }
}
