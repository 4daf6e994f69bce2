//! Code generation from AST to pickle opcodes.
//!
//! This module contains the [`Codegen`] which transforms the parsed source
//! AST into an opcode stream for the pickle virtual machine. The target has
//! no arithmetic or branch opcodes, so most constructs lower to global
//! lookups and REDUCE calls; see `expressions` for the per-node rules.

mod expressions;

#[cfg(test)]
mod tests;

use log::debug;

use crate::ast::*;
use crate::compiler::Options;
use crate::compiler::emitter::Emitter;
use crate::compiler::memo::{MemoKey, MemoTable};
use crate::compiler::opcode;
use crate::error::CompileError;
use crate::lexer::Span;

/// The identifier whose final assignment designates the stream's value.
pub(crate) const RESULT_NAME: &str = "RESULT";

/// The one complaint every misuse of [`RESULT_NAME`] gets.
pub(crate) const RESULT_MISUSE: &str =
    "'RESULT' is only allowed as the sole target of the final statement";

/// Recursion ceiling for node compilation.
///
/// Source that comes through the parser is already capped well below this;
/// the ceiling protects against externally constructed ASTs.
const MAX_NODE_DEPTH: usize = 1_000;

/// Compiles AST nodes to pickle opcodes.
pub(crate) struct Codegen<'a> {
    /// Compile options, fixed for the duration of one run
    options: &'a Options,
    /// The opcode stream being generated
    emitter: Emitter,
    /// Name-to-slot bindings backing PUT/GET emission
    memo: MemoTable,
    /// Number of compiler-internal scratch keys handed out so far
    scratch: u32,
    /// Current node nesting depth
    depth: usize,
}

impl<'a> Codegen<'a> {
    /// Creates a code generator for one compilation run.
    pub(crate) fn new(options: &'a Options) -> Self {
        Self {
            emitter: Emitter::new(options.protocol),
            memo: MemoTable::new(),
            options,
            scratch: 0,
            depth: 0,
        }
    }

    /// Compiles a module into a complete pickle stream.
    ///
    /// The stream carries the protocol preamble, one opcode run per
    /// statement, and a STOP terminator. A program that does not end in a
    /// `RESULT` assignment evaluates to None.
    pub(crate) fn compile(mut self, module: &Module) -> Result<Vec<u8>, CompileError> {
        debug!(
            "compiling {} statement(s) at protocol {}",
            module.body.len(),
            self.options.protocol
        );
        self.emitter.proto_header();

        let mut sealed = false;
        let last = module.body.len().saturating_sub(1);
        for (i, stmt) in module.body.iter().enumerate() {
            sealed = self.compile_statement(stmt, i == last)?;
        }

        if !sealed {
            self.emitter.none();
            self.emitter.op(opcode::STOP);
        }
        Ok(self.emitter.into_bytes())
    }

    // ========================================================================
    // Statement Compilation
    // ========================================================================

    /// Compiles one top-level statement. Returns true when the statement
    /// sealed the stream with STOP, which only a final `RESULT` assignment
    /// does.
    fn compile_statement(&mut self, stmt: &Stmt, is_final: bool) -> Result<bool, CompileError> {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                return self.compile_assign(targets, value, is_final);
            }
            StmtKind::Expr { value } => {
                self.compile_expression(value)?;
                self.emitter.op(opcode::POP);
            }
            StmtKind::Import { names } => self.compile_import(names)?,
            StmtKind::ImportFrom { module, names } => self.compile_import_from(module, names)?,
        }
        Ok(false)
    }

    fn compile_assign(
        &mut self,
        targets: &[Expr],
        value: &Expr,
        is_final: bool,
    ) -> Result<bool, CompileError> {
        // `RESULT = expr` as the last statement seals the stream: the value
        // stays on the stack and STOP makes it the program's result.
        if let [target] = targets {
            if matches!(&target.kind, ExprKind::Name(name) if name == RESULT_NAME) {
                if !is_final {
                    return Err(CompileError::ReservedName {
                        message: RESULT_MISUSE.to_string(),
                        span: target.span,
                    });
                }
                self.compile_expression(value)?;
                self.emitter.op(opcode::STOP);
                return Ok(true);
            }
        }
        for target in targets {
            if matches!(&target.kind, ExprKind::Name(name) if name == RESULT_NAME) {
                return Err(CompileError::ReservedName {
                    message: RESULT_MISUSE.to_string(),
                    span: target.span,
                });
            }
        }

        // The value is built once into a scratch slot; every target
        // re-fetches it from there, so chained assignment shares one object.
        self.compile_expression(value)?;
        let slot = self.bind_scratch();
        self.emitter.put(slot);
        self.emitter.op(opcode::POP);

        for target in targets {
            self.compile_target(target, slot)?;
        }
        Ok(false)
    }

    /// Stores the cached value into one assignment target, leaving the
    /// stack balanced.
    fn compile_target(&mut self, target: &Expr, slot: u32) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.emitter.get(slot);
                let index = self.memo.bind(MemoKey::Name(name.clone()));
                self.emitter.put(index);
                self.emitter.op(opcode::POP);
            }
            ExprKind::Subscript { value, index } => {
                // container[index] = value, then drop the container.
                self.compile_expression(value)?;
                self.compile_expression(index)?;
                self.emitter.get(slot);
                self.emitter.op(opcode::SETITEM);
                self.emitter.op(opcode::POP);
            }
            ExprKind::Attribute { value, attr } => {
                // BUILD merges {attr: value} into the object's state.
                self.compile_expression(value)?;
                self.emitter.dict_new();
                self.emitter.str(attr);
                self.emitter.get(slot);
                self.emitter.op(opcode::SETITEM);
                self.emitter.op(opcode::BUILD);
                self.emitter.op(opcode::POP);
            }
            ExprKind::Tuple(_) | ExprKind::List(_) => {
                return Err(CompileError::UnsupportedConstruct {
                    message: "unpacking assignment is not supported".to_string(),
                    span: target.span,
                });
            }
            _ => {
                return Err(CompileError::UnsupportedConstruct {
                    message: "assignment to this target is not supported".to_string(),
                    span: target.span,
                });
            }
        }
        Ok(())
    }

    fn compile_import(&mut self, names: &[ImportAlias]) -> Result<(), CompileError> {
        for alias in names {
            let binding = alias.asname.as_ref().unwrap_or(&alias.name);
            self.check_binding(binding, alias.span)?;

            // __import__("a.b") resolves the top-level module, yet an
            // unaliased `import a.b` binds it under the dotted name. That
            // matches the host language's own handling of the same call.
            self.load_global("builtins", "__import__");
            self.emitter.tuple_begin(1);
            self.emitter.str(&alias.name);
            self.emitter.tuple_end(1);
            self.emitter.op(opcode::REDUCE);

            let slot = self.memo.bind(MemoKey::Name(binding.clone()));
            self.emitter.put(slot);
            self.emitter.op(opcode::POP);
        }
        Ok(())
    }

    fn compile_import_from(
        &mut self,
        module: &str,
        names: &[ImportAlias],
    ) -> Result<(), CompileError> {
        for alias in names {
            let binding = alias.asname.as_ref().unwrap_or(&alias.name);
            self.check_binding(binding, alias.span)?;

            self.emitter.global(module, &alias.name);
            let slot = self.memo.bind(MemoKey::Name(binding.clone()));
            self.emitter.put(slot);
            self.emitter.op(opcode::POP);
        }
        Ok(())
    }

    fn check_binding(&self, name: &str, span: Span) -> Result<(), CompileError> {
        if name == RESULT_NAME {
            return Err(CompileError::ReservedName {
                message: RESULT_MISUSE.to_string(),
                span,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Utilities
    // ========================================================================

    /// Pushes the object `module.name`, memoized under its pair key so the
    /// lookup bytes are emitted once per compilation.
    fn load_global(&mut self, module: &str, name: &str) {
        let key = MemoKey::Global {
            module: module.to_string(),
            name: name.to_string(),
        };
        if let Some(slot) = self.memo.slot(&key) {
            self.emitter.get(slot);
        } else {
            self.emitter.global(module, name);
            let slot = self.memo.bind(key);
            self.emitter.put(slot);
        }
    }

    /// Allocates a compiler-internal memo slot.
    fn bind_scratch(&mut self) -> u32 {
        let key = MemoKey::Scratch(self.scratch);
        self.scratch += 1;
        self.memo.bind(key)
    }

    fn enter_node(&mut self, span: Span) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NODE_DEPTH {
            return Err(CompileError::TooDeep {
                message: "node nesting is too deep".to_string(),
                span,
            });
        }
        Ok(())
    }
}

/// Whether `name` belongs to the ambient built-in namespace the extended
/// mode may resolve against.
///
/// The table mirrors the host's public `builtins` members (plus
/// `__import__`, which import statements lean on); it is sorted so lookup
/// can binary-search.
pub(crate) fn is_ambient_builtin(name: &str) -> bool {
    AMBIENT_BUILTINS.binary_search(&name).is_ok()
}

pub(crate) const AMBIENT_BUILTINS: &[&str] = &[
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BaseException",
    "BlockingIOError",
    "BrokenPipeError",
    "BufferError",
    "BytesWarning",
    "ChildProcessError",
    "ConnectionAbortedError",
    "ConnectionError",
    "ConnectionRefusedError",
    "ConnectionResetError",
    "DeprecationWarning",
    "EOFError",
    "Ellipsis",
    "EnvironmentError",
    "Exception",
    "FileExistsError",
    "FileNotFoundError",
    "FloatingPointError",
    "FutureWarning",
    "GeneratorExit",
    "IOError",
    "ImportError",
    "ImportWarning",
    "IndentationError",
    "IndexError",
    "InterruptedError",
    "IsADirectoryError",
    "KeyError",
    "KeyboardInterrupt",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotADirectoryError",
    "NotImplemented",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "PendingDeprecationWarning",
    "PermissionError",
    "ProcessLookupError",
    "RecursionError",
    "ReferenceError",
    "ResourceWarning",
    "RuntimeError",
    "RuntimeWarning",
    "StopAsyncIteration",
    "StopIteration",
    "SyntaxError",
    "SyntaxWarning",
    "SystemError",
    "SystemExit",
    "TabError",
    "TimeoutError",
    "TypeError",
    "UnboundLocalError",
    "UnicodeDecodeError",
    "UnicodeEncodeError",
    "UnicodeError",
    "UnicodeTranslateError",
    "UnicodeWarning",
    "UserWarning",
    "ValueError",
    "Warning",
    "ZeroDivisionError",
    "__import__",
    "abs",
    "all",
    "any",
    "ascii",
    "bin",
    "bool",
    "breakpoint",
    "bytearray",
    "bytes",
    "callable",
    "chr",
    "classmethod",
    "compile",
    "complex",
    "copyright",
    "credits",
    "delattr",
    "dict",
    "dir",
    "divmod",
    "enumerate",
    "eval",
    "exec",
    "exit",
    "filter",
    "float",
    "format",
    "frozenset",
    "getattr",
    "globals",
    "hasattr",
    "hash",
    "help",
    "hex",
    "id",
    "input",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "license",
    "list",
    "locals",
    "map",
    "max",
    "memoryview",
    "min",
    "next",
    "object",
    "oct",
    "open",
    "ord",
    "pow",
    "print",
    "property",
    "quit",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "setattr",
    "slice",
    "sorted",
    "staticmethod",
    "str",
    "sum",
    "super",
    "tuple",
    "type",
    "vars",
    "zip",
];
