//! Expression compilation.
//!
//! The target machine has no arithmetic, comparison, or branch opcodes, so
//! every computing construct lowers to data built on the stack plus REDUCE
//! calls against `operator` and `builtins` functions:
//!
//! | Expression | Lowering |
//! |------------|----------|
//! | Constant | direct opcode per type (§ emitter) |
//! | Name | GET of its memo slot, or `builtins.<name>` in extended mode |
//! | Tuple/List/Dict/Set | display opcodes, elements in source order |
//! | `a + b` etc. | `operator.add(a, b)` via REDUCE |
//! | `-a` etc. | `operator.neg(a)` via REDUCE |
//! | `a < b <= c` | `builtins.all((lt(a, b), le(b, c)))`, middles cached |
//! | `a or b` | `next(filter(bool, [a, b]), b)`, last operand cached |
//! | `a and b` | `next(filter(operator.not_, [a, b]), b)` |
//! | `f(x)` | callee, argument tuple, REDUCE |
//! | `a[i]` | `operator.getitem(a, i)` |
//! | `a[i:j]` | `operator.getitem(a, builtins.slice(i, j, None))` |
//! | `a.b` | `builtins.getattr(a, "b")` |
//! | `lambda` | `types.FunctionType(types.CodeType(...), captures)` |
//!
//! Boolean operators and chained comparisons evaluate every operand; the
//! branchless target cannot short-circuit. Lambda bodies run as host
//! bytecode and do short-circuit.

use num_bigint::BigInt;

use crate::ast::*;
use crate::compiler::LambdaMode;
use crate::compiler::codegen::{Codegen, RESULT_MISUSE, RESULT_NAME, is_ambient_builtin};
use crate::compiler::macros::{self, MacroSpec};
use crate::compiler::memo::MemoKey;
use crate::compiler::opcode;
use crate::compiler::operators;
use crate::compiler::pyc;
use crate::error::CompileError;
use crate::lexer::Span;

impl Codegen<'_> {
    /// Compiles one expression; the executed result is exactly one new
    /// value on the machine's stack.
    pub(super) fn compile_expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.enter_node(expr.span)?;
        match &expr.kind {
            ExprKind::Constant(value) => self.compile_constant(value, expr.span)?,
            ExprKind::Name(name) => self.compile_name(name, expr.span)?,
            ExprKind::Tuple(elements) => self.compile_tuple(elements)?,
            ExprKind::List(elements) => self.compile_list(elements)?,
            ExprKind::Dict { keys, values } => self.compile_dict(keys, values)?,
            ExprKind::Set(elements) => self.compile_set(elements, expr.span)?,
            ExprKind::BinOp { op, left, right } => self.compile_binop(*op, left, right)?,
            ExprKind::UnaryOp { op, operand } => self.compile_unaryop(*op, operand)?,
            ExprKind::BoolOp { op, values } => self.compile_boolop(*op, values)?,
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compile_compare(left, ops, comparators)?,
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.compile_call(func, args, keywords, expr.span)?,
            ExprKind::Subscript { value, index } => self.compile_subscript(value, index)?,
            ExprKind::Slice { lower, upper, step } => {
                self.compile_slice(lower.as_deref(), upper.as_deref(), step.as_deref())?;
            }
            ExprKind::Attribute { value, attr } => self.compile_attribute(value, attr)?,
            ExprKind::Lambda { params, body } => self.compile_lambda(params, body, expr.span)?,
        }
        self.depth -= 1;
        Ok(())
    }

    fn compile_constant(&mut self, value: &Constant, span: Span) -> Result<(), CompileError> {
        match value {
            Constant::None => self.emitter.none(),
            Constant::Bool(value) => self.emitter.bool(*value),
            Constant::Int(value) => self.emitter.int(value),
            Constant::Float(value) => self.emitter.float(*value),
            Constant::Str(value) => self.emitter.str(value),
            Constant::Bytes(value) => {
                if self.emitter.proto() < 3 {
                    return Err(CompileError::ProtocolRequirement {
                        message: format!(
                            "bytes literals require protocol 3 but current protocol is {}",
                            self.emitter.proto()
                        ),
                        span,
                    });
                }
                self.emitter.bytes(value);
            }
            // `...` has no opcode of its own; it is the interpreter's
            // `builtins.Ellipsis` singleton.
            Constant::Ellipsis => self.load_global("builtins", "Ellipsis"),
        }
        Ok(())
    }

    fn compile_name(&mut self, name: &str, span: Span) -> Result<(), CompileError> {
        if name == RESULT_NAME {
            return Err(CompileError::ReservedName {
                message: RESULT_MISUSE.to_string(),
                span,
            });
        }
        if let Some(slot) = self.memo.slot(&MemoKey::Name(name.to_string())) {
            self.emitter.get(slot);
            return Ok(());
        }
        if self.options.extended && is_ambient_builtin(name) {
            self.emitter.global("builtins", name);
            let slot = self.memo.bind(MemoKey::Name(name.to_string()));
            self.emitter.put(slot);
            return Ok(());
        }
        Err(CompileError::NameResolution {
            message: format!("name '{name}' is not defined"),
            span,
        })
    }

    // ========================================================================
    // Displays
    // ========================================================================

    fn compile_tuple(&mut self, elements: &[Expr]) -> Result<(), CompileError> {
        self.emitter.tuple_begin(elements.len());
        for element in elements {
            self.compile_expression(element)?;
        }
        self.emitter.tuple_end(elements.len());
        Ok(())
    }

    fn compile_list(&mut self, elements: &[Expr]) -> Result<(), CompileError> {
        self.emitter.list_new();
        for element in elements {
            self.compile_expression(element)?;
            self.emitter.op(opcode::APPEND);
        }
        Ok(())
    }

    fn compile_dict(&mut self, keys: &[Expr], values: &[Expr]) -> Result<(), CompileError> {
        self.emitter.dict_new();
        for (key, value) in keys.iter().zip(values) {
            self.compile_expression(key)?;
            self.compile_expression(value)?;
            self.emitter.op(opcode::SETITEM);
        }
        Ok(())
    }

    fn compile_set(&mut self, elements: &[Expr], span: Span) -> Result<(), CompileError> {
        if self.emitter.proto() < 4 {
            return Err(CompileError::ProtocolRequirement {
                message: format!(
                    "set literals require protocol 4 but current protocol is {}",
                    self.emitter.proto()
                ),
                span,
            });
        }
        self.emitter.op(opcode::EMPTY_SET);
        self.emitter.op(opcode::MARK);
        for element in elements {
            self.compile_expression(element)?;
        }
        self.emitter.op(opcode::ADDITEMS);
        Ok(())
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn compile_binop(
        &mut self,
        op: BinOpKind,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CompileError> {
        self.load_global(operators::MODULE, operators::binop_function(op));
        self.emitter.tuple_begin(2);
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        self.emitter.tuple_end(2);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    fn compile_unaryop(&mut self, op: UnaryOpKind, operand: &Expr) -> Result<(), CompileError> {
        self.load_global(operators::MODULE, operators::unaryop_function(op));
        self.emitter.tuple_begin(1);
        self.compile_expression(operand)?;
        self.emitter.tuple_end(1);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    /// Chained comparisons become `builtins.all((pair, pair, ...))`; every
    /// pair evaluates, because the target cannot branch. A single
    /// comparison skips the aggregation.
    fn compile_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
    ) -> Result<(), CompileError> {
        let chained = ops.len() > 1;
        if chained {
            self.load_global("builtins", "all");
            self.emitter.tuple_begin(1);
            self.emitter.tuple_begin(ops.len());
        }

        // Each middle comparator is cached in a scratch slot when first
        // built, then re-fetched as the next pair's left operand.
        let mut prev: Option<u32> = None;
        for (i, (op, comparator)) in ops.iter().zip(comparators).enumerate() {
            let middle = i + 1 < ops.len();
            let negated = *op == CmpOp::NotIn;
            if negated {
                self.load_global(operators::MODULE, "not_");
                self.emitter.tuple_begin(1);
            }
            self.load_global(operators::MODULE, operators::cmpop_function(*op));
            self.emitter.tuple_begin(2);
            if matches!(op, CmpOp::In | CmpOp::NotIn) {
                // contains(container, item): the container is the
                // right-hand operand in source, so it builds first.
                let cached = self.push_comparator(comparator, middle)?;
                self.push_chain_left(left, prev)?;
                prev = cached;
            } else {
                self.push_chain_left(left, prev)?;
                prev = self.push_comparator(comparator, middle)?;
            }
            self.emitter.tuple_end(2);
            self.emitter.op(opcode::REDUCE);
            if negated {
                self.emitter.tuple_end(1);
                self.emitter.op(opcode::REDUCE);
            }
        }

        if chained {
            self.emitter.tuple_end(ops.len());
            self.emitter.tuple_end(1);
            self.emitter.op(opcode::REDUCE);
        }
        Ok(())
    }

    /// Pushes a pair's left operand: the chain head for the first pair, the
    /// cached previous comparator afterwards.
    fn push_chain_left(&mut self, left: &Expr, prev: Option<u32>) -> Result<(), CompileError> {
        match prev {
            Some(slot) => {
                self.emitter.get(slot);
                Ok(())
            }
            None => self.compile_expression(left),
        }
    }

    /// Compiles a comparator, caching it in a scratch slot when a later
    /// pair will read it again.
    fn push_comparator(
        &mut self,
        comparator: &Expr,
        middle: bool,
    ) -> Result<Option<u32>, CompileError> {
        self.compile_expression(comparator)?;
        if !middle {
            return Ok(None);
        }
        let slot = self.bind_scratch();
        self.emitter.put(slot);
        Ok(Some(slot))
    }

    /// `and`/`or` become "first operand passing a truthiness test, else the
    /// last operand": the operands go into a list, `builtins.filter` sifts
    /// them, and `builtins.next` takes the first hit with the cached last
    /// operand as its default. Everything evaluates; no short-circuit.
    fn compile_boolop(&mut self, op: BoolOpKind, values: &[Expr]) -> Result<(), CompileError> {
        let (module, predicate) = operators::boolop_predicate(op);

        self.load_global("builtins", "next");
        self.emitter.tuple_begin(2);

        self.load_global("builtins", "filter");
        self.emitter.tuple_begin(2);
        self.load_global(module, predicate);
        self.emitter.list_new();
        let mut last_slot = 0;
        for (i, value) in values.iter().enumerate() {
            self.compile_expression(value)?;
            if i + 1 == values.len() {
                last_slot = self.bind_scratch();
                self.emitter.put(last_slot);
            }
            self.emitter.op(opcode::APPEND);
        }
        self.emitter.tuple_end(2);
        self.emitter.op(opcode::REDUCE);

        self.emitter.get(last_slot);
        self.emitter.tuple_end(2);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    // ========================================================================
    // Calls and Accessors
    // ========================================================================

    fn compile_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
    ) -> Result<(), CompileError> {
        // Macro names shadow user bindings in call position.
        if let ExprKind::Name(name) = &func.kind {
            if let Some(spec) = macros::lookup(name) {
                spec.validate(args, keywords, self.emitter.proto(), span)?;
                return self.compile_macro(spec, args);
            }
        }
        if let Some(keyword) = keywords.first() {
            return Err(CompileError::UnsupportedConstruct {
                message: "keyword arguments are not supported".to_string(),
                span: keyword.span,
            });
        }
        self.compile_expression(func)?;
        self.emitter.tuple_begin(args.len());
        for arg in args {
            self.compile_expression(arg)?;
        }
        self.emitter.tuple_end(args.len());
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    /// Expands a validated macro call to its opcode sequence.
    fn compile_macro(&mut self, spec: &MacroSpec, args: &[Expr]) -> Result<(), CompileError> {
        match spec.name {
            "BUILD" => {
                self.compile_expression(&args[0])?;
                self.emitter.tuple_begin(2);
                self.compile_expression(&args[1])?;
                self.compile_expression(&args[2])?;
                self.emitter.tuple_end(2);
                self.emitter.op(opcode::BUILD);
            }
            "GLOBAL" => {
                // Always the text-encoded legacy form, whatever the
                // protocol; that is the macro's point.
                self.emitter.op(opcode::GLOBAL);
                self.emitter.line(const_str(&args[0]));
                self.emitter.line(const_str(&args[1]));
            }
            "INST" => {
                let ExprKind::Tuple(elements) = &args[2].kind else {
                    unreachable!("validated as a tuple literal");
                };
                self.emitter.op(opcode::MARK);
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emitter.op(opcode::INST);
                self.emitter.line(const_str(&args[0]));
                self.emitter.line(const_str(&args[1]));
            }
            _ => {
                self.compile_expression(&args[0])?;
                self.compile_expression(&args[1])?;
                self.emitter.op(opcode::STACK_GLOBAL);
            }
        }
        Ok(())
    }

    fn compile_subscript(&mut self, value: &Expr, index: &Expr) -> Result<(), CompileError> {
        self.load_global(operators::MODULE, "getitem");
        self.emitter.tuple_begin(2);
        self.compile_expression(value)?;
        self.compile_expression(index)?;
        self.emitter.tuple_end(2);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    fn compile_slice(
        &mut self,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
        step: Option<&Expr>,
    ) -> Result<(), CompileError> {
        self.load_global("builtins", "slice");
        self.emitter.tuple_begin(3);
        for bound in [lower, upper, step] {
            match bound {
                Some(expr) => self.compile_expression(expr)?,
                None => self.emitter.none(),
            }
        }
        self.emitter.tuple_end(3);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    fn compile_attribute(&mut self, value: &Expr, attr: &str) -> Result<(), CompileError> {
        self.load_global("builtins", "getattr");
        self.emitter.tuple_begin(2);
        self.compile_expression(value)?;
        self.emitter.str(attr);
        self.emitter.tuple_end(2);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    // ========================================================================
    // Lambdas
    // ========================================================================

    /// Lowers a lambda to a host code object rebuilt at load time:
    /// `types.FunctionType(types.CodeType(...), globals, "<lambda>"
    /// [, defaults])`. The globals dict captures each memoized free
    /// variable by value, read from its slot here at compile time.
    fn compile_lambda(
        &mut self,
        params: &[Param],
        body: &Expr,
        span: Span,
    ) -> Result<(), CompileError> {
        if self.options.lambdas == LambdaMode::Disabled {
            return Err(CompileError::UnsupportedConstruct {
                message: "lambda compilation is not enabled".to_string(),
                span,
            });
        }
        if self.emitter.proto() < 3 {
            return Err(CompileError::ProtocolRequirement {
                message: format!(
                    "lambda lowering requires protocol 3 but current protocol is {}",
                    self.emitter.proto()
                ),
                span,
            });
        }
        for param in params {
            if param.name == RESULT_NAME {
                return Err(CompileError::ReservedName {
                    message: RESULT_MISUSE.to_string(),
                    span: param.span,
                });
            }
        }

        let lowered = pyc::lower(params, body, &self.memo)?;
        let defaults: Vec<&Expr> = params.iter().filter_map(|p| p.default.as_ref()).collect();
        let fn_arity = if defaults.is_empty() { 3 } else { 4 };

        self.load_global("types", "FunctionType");
        self.emitter.tuple_begin(fn_arity);

        // Argument 1: the code object.
        self.load_global("types", "CodeType");
        self.emitter.tuple_begin(14);
        self.push_usize(params.len()); // argcount
        self.push_usize(0); // posonlyargcount
        self.push_usize(0); // kwonlyargcount
        self.push_usize(lowered.varnames.len()); // nlocals
        self.push_usize(lowered.stacksize); // stacksize
        self.push_usize(pyc::CO_FLAGS); // flags
        self.emitter.bytes(&lowered.code);
        self.emitter.tuple_begin(lowered.consts.len());
        for value in &lowered.consts {
            self.compile_constant(value, span)?;
        }
        self.emitter.tuple_end(lowered.consts.len());
        self.push_name_tuple(&lowered.names);
        self.push_name_tuple(&lowered.varnames);
        self.emitter.str("<pickle>"); // filename
        self.emitter.str("<lambda>"); // name
        self.push_usize(1); // firstlineno
        self.emitter.bytes(b""); // lnotab
        self.emitter.tuple_end(14);
        self.emitter.op(opcode::REDUCE);

        // Argument 2: the by-value captured globals.
        self.emitter.dict_new();
        for (name, slot) in &lowered.captures {
            self.emitter.str(name);
            self.emitter.get(*slot);
            self.emitter.op(opcode::SETITEM);
        }

        // Argument 3 (and 4): name and default values.
        self.emitter.str("<lambda>");
        if !defaults.is_empty() {
            self.emitter.tuple_begin(defaults.len());
            for default in &defaults {
                self.compile_expression(default)?;
            }
            self.emitter.tuple_end(defaults.len());
        }

        self.emitter.tuple_end(fn_arity);
        self.emitter.op(opcode::REDUCE);
        Ok(())
    }

    fn push_usize(&mut self, value: usize) {
        self.emitter.int(&BigInt::from(value));
    }

    fn push_name_tuple(&mut self, names: &[String]) {
        self.emitter.tuple_begin(names.len());
        for name in names {
            self.emitter.str(name);
        }
        self.emitter.tuple_end(names.len());
    }
}

/// The literal text of a macro argument already validated as a string
/// constant.
fn const_str(expr: &Expr) -> &str {
    match &expr.kind {
        ExprKind::Constant(Constant::Str(text)) => text,
        _ => unreachable!("validated as a string constant"),
    }
}
