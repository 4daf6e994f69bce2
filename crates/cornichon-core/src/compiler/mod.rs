//! The pickle compiler: AST in, bytecode stream out.
//!
//! # Module Structure
//!
//! - `codegen`: translation of statements and expressions into opcode runs
//! - `emitter`: the opcode-level stream writer
//! - `macros`: the registry of direct-opcode macro call forms
//! - `memo`: memo slot allocation and lookup
//! - `opcode`: pickle opcode bytes
//! - `operators`: operator-to-function tables for the branchless lowering
//! - `pyc`: lambda bodies lowered to host code objects

pub(crate) mod codegen;
mod emitter;
mod macros;
mod memo;
pub(crate) mod opcode;
mod operators;
mod pyc;

use crate::ast::Module;
use crate::error::CompileError;
use crate::lexer::Span;
use crate::parser::Parser;
use codegen::Codegen;

/// The highest pickle protocol this compiler can target.
pub const HIGHEST_PROTOCOL: u8 = 5;

/// How `lambda` expressions are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LambdaMode {
    /// Reject lambdas at compile time (the default).
    #[default]
    Disabled,
    /// Lower lambda bodies to CPython 3.8 code objects, rebuilt at load
    /// time through `types.FunctionType`. Streams compiled this way only
    /// load under that interpreter version.
    Python,
}

/// Compilation options.
#[derive(Debug, Clone)]
pub struct Options {
    /// The pickle protocol to target, 0 through [`HIGHEST_PROTOCOL`].
    pub protocol: u8,
    /// Resolve otherwise-unbound names as `builtins` attributes.
    pub extended: bool,
    /// Whether and how `lambda` expressions compile.
    pub lambdas: LambdaMode,
    /// Strip unread memo writes from the finished stream.
    pub optimize: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol: 4,
            extended: false,
            lambdas: LambdaMode::default(),
            optimize: false,
        }
    }
}

/// The compiler driver. One instance compiles any number of programs
/// against a fixed set of options; each program gets a fresh memo table.
pub struct Compiler {
    options: Options,
}

impl Compiler {
    /// Creates a compiler that targets the given options.
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Compiles a parsed module into a pickle stream.
    pub fn compile(&self, module: &Module) -> Result<Vec<u8>, CompileError> {
        if self.options.protocol > HIGHEST_PROTOCOL {
            return Err(CompileError::ProtocolRequirement {
                message: format!(
                    "protocol {} is not supported; the highest is {HIGHEST_PROTOCOL}",
                    self.options.protocol
                ),
                span: Span::new(0, 0),
            });
        }
        let stream = Codegen::new(&self.options).compile(module)?;
        if !self.options.optimize {
            return Ok(stream);
        }
        match crate::optimize(&stream) {
            Ok(optimized) => Ok(optimized),
            Err(err) => {
                // A stream this compiler just produced always rescans.
                debug_assert!(false, "optimizer rejected a fresh stream: {err}");
                log::warn!("optimizer rejected a fresh stream: {err}");
                Ok(stream)
            }
        }
    }
}

/// Compiles source text into a pickle stream: lex, parse, compile.
pub fn compile_source(source: &str, options: &Options) -> Result<Vec<u8>, CompileError> {
    let module = Parser::new(source)?.parse_module()?;
    Compiler::new(options.clone()).compile(&module)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.protocol, 4);
        assert!(!options.extended);
        assert_eq!(options.lambdas, LambdaMode::Disabled);
        assert!(!options.optimize);
    }

    #[test]
    fn test_unknown_protocol_is_rejected() {
        let options = Options {
            protocol: 6,
            ..Options::default()
        };
        let err = compile_source("RESULT = 1", &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "protocol error: protocol 6 is not supported; the highest is 5"
        );
    }

    #[test]
    fn test_compile_source_round_trip() {
        let stream = compile_source("RESULT = 42", &Options::default()).unwrap();
        assert_eq!(stream, b"\x80\x04K*.");
    }
}
