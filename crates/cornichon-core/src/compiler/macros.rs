//! The registry of opcode macros.
//!
//! A handful of call-looking names compile straight to pickle opcodes
//! instead of REDUCE calls, giving source-level access to machine
//! features that have no Python expression form: BUILD for object
//! state, GLOBAL/STACK_GLOBAL for raw global references, and INST for
//! the legacy instance opcode. This module owns their descriptors and
//! argument validation; emission lives with the code generator.

use crate::ast::{Expr, ExprKind, Keyword};
use crate::error::CompileError;
use crate::lexer::Span;

/// What a macro accepts in one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// Any expression.
    Any,
    /// A string literal, required at compile time.
    ConstStr,
    /// A tuple literal, so the elements can be emitted individually.
    TupleLiteral,
}

/// A macro descriptor: its name, argument shape, and protocol floor.
#[derive(Debug)]
pub struct MacroSpec {
    /// The name recognized in call position
    pub name: &'static str,
    /// Constraint for each argument, in order
    pub args: &'static [ArgSpec],
    /// The lowest protocol whose opcode set can express this macro
    pub min_proto: u8,
}

/// All recognized macros.
pub const MACROS: &[MacroSpec] = &[
    MacroSpec {
        name: "BUILD",
        args: &[ArgSpec::Any, ArgSpec::Any, ArgSpec::Any],
        min_proto: 0,
    },
    MacroSpec {
        name: "GLOBAL",
        args: &[ArgSpec::ConstStr, ArgSpec::ConstStr],
        min_proto: 0,
    },
    MacroSpec {
        name: "INST",
        args: &[ArgSpec::ConstStr, ArgSpec::ConstStr, ArgSpec::TupleLiteral],
        min_proto: 0,
    },
    MacroSpec {
        name: "STACK_GLOBAL",
        args: &[ArgSpec::Any, ArgSpec::Any],
        min_proto: 4,
    },
];

/// Finds the macro descriptor for a name, if that name is a macro.
pub fn lookup(name: &str) -> Option<&'static MacroSpec> {
    MACROS.iter().find(|spec| spec.name == name)
}

impl MacroSpec {
    /// Checks a call against this descriptor.
    pub fn validate(
        &self,
        args: &[Expr],
        keywords: &[Keyword],
        proto: u8,
        call_span: Span,
    ) -> Result<(), CompileError> {
        if let Some(keyword) = keywords.first() {
            return Err(CompileError::MacroArgument {
                message: format!("{} does not accept keyword arguments", self.name),
                span: keyword.span,
            });
        }
        if proto < self.min_proto {
            return Err(CompileError::ProtocolRequirement {
                message: format!(
                    "Macro {} requires protocol {} but current protocol is {}",
                    self.name, self.min_proto, proto
                ),
                span: call_span,
            });
        }
        if args.len() != self.args.len() {
            let message = if args.len() < self.args.len() {
                format!(
                    "{} expected {} arguments but only got {}",
                    self.name,
                    self.args.len(),
                    args.len()
                )
            } else {
                format!(
                    "{} expected {} arguments but got {}",
                    self.name,
                    self.args.len(),
                    args.len()
                )
            };
            return Err(CompileError::MacroArgument {
                message,
                span: call_span,
            });
        }
        for (spec, arg) in self.args.iter().zip(args) {
            let wanted = match spec {
                ArgSpec::Any => continue,
                ArgSpec::ConstStr => {
                    if matches!(arg.kind, ExprKind::Constant(crate::ast::Constant::Str(_))) {
                        continue;
                    }
                    "str constant"
                }
                ArgSpec::TupleLiteral => {
                    if matches!(arg.kind, ExprKind::Tuple(_)) {
                        continue;
                    }
                    "tuple literal"
                }
            };
            return Err(CompileError::MacroArgument {
                message: format!(
                    "{} expected({}) but got({})",
                    self.name,
                    wanted,
                    describe(arg)
                ),
                span: arg.span,
            });
        }
        Ok(())
    }
}

/// A short name for an expression kind, for macro error messages.
fn describe(expr: &Expr) -> &'static str {
    use crate::ast::Constant;
    match &expr.kind {
        ExprKind::Constant(Constant::None) => "None",
        ExprKind::Constant(Constant::Bool(_)) => "bool constant",
        ExprKind::Constant(Constant::Int(_)) => "int constant",
        ExprKind::Constant(Constant::Float(_)) => "float constant",
        ExprKind::Constant(Constant::Str(_)) => "str constant",
        ExprKind::Constant(Constant::Bytes(_)) => "bytes constant",
        ExprKind::Constant(Constant::Ellipsis) => "Ellipsis",
        ExprKind::Name(_) => "name",
        ExprKind::Tuple(_) => "tuple",
        ExprKind::List(_) => "list",
        ExprKind::Dict { .. } => "dict",
        ExprKind::Set(_) => "set",
        ExprKind::Call { .. } => "call",
        ExprKind::Lambda { .. } => "lambda",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Constant;

    fn str_arg(text: &str) -> Expr {
        Expr::new(
            ExprKind::Constant(Constant::Str(text.to_string())),
            Span::new(0, text.len()),
        )
    }

    fn int_arg(n: i32) -> Expr {
        Expr::new(
            ExprKind::Constant(Constant::Int(n.into())),
            Span::new(0, 1),
        )
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("BUILD").is_some());
        assert!(lookup("STACK_GLOBAL").is_some());
        assert!(lookup("build").is_none());
        assert!(lookup("REDUCE").is_none());
    }

    #[test]
    fn test_arity_errors() {
        let spec = lookup("BUILD").unwrap();
        let err = spec
            .validate(&[int_arg(1)], &[], 2, Span::new(0, 5))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "macro error: BUILD expected 3 arguments but only got 1"
        );

        let args = [int_arg(1), int_arg(2), int_arg(3), int_arg(4)];
        let err = spec.validate(&args, &[], 2, Span::new(0, 5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "macro error: BUILD expected 3 arguments but got 4"
        );
    }

    #[test]
    fn test_argument_type_errors() {
        let spec = lookup("GLOBAL").unwrap();
        let err = spec
            .validate(&[str_arg("os"), int_arg(3)], &[], 2, Span::new(0, 5))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "macro error: GLOBAL expected(str constant) but got(int constant)"
        );

        let spec = lookup("INST").unwrap();
        let args = [str_arg("m"), str_arg("n"), int_arg(1)];
        let err = spec.validate(&args, &[], 2, Span::new(0, 5)).unwrap_err();
        assert!(err.to_string().contains("expected(tuple literal)"));
    }

    #[test]
    fn test_protocol_floor() {
        let spec = lookup("STACK_GLOBAL").unwrap();
        let args = [str_arg("os"), str_arg("sep")];
        let err = spec.validate(&args, &[], 2, Span::new(0, 5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "protocol error: Macro STACK_GLOBAL requires protocol 4 but current protocol is 2"
        );
        assert!(spec.validate(&args, &[], 4, Span::new(0, 5)).is_ok());
    }

    #[test]
    fn test_keywords_rejected() {
        let spec = lookup("BUILD").unwrap();
        let keywords = [Keyword {
            name: "state".to_string(),
            value: int_arg(1),
            span: Span::new(6, 13),
        }];
        let err = spec
            .validate(&[], &keywords, 2, Span::new(0, 5))
            .unwrap_err();
        assert!(err.to_string().contains("keyword arguments"));
    }
}
