//! The main parser implementation.

use crate::ast::*;
use crate::error::CompileError;
use crate::lexer::{Scanner, Span, Token, TokenKind};

/// Maximum expression nesting depth before parsing is abandoned.
const MAX_NESTING_DEPTH: usize = 500;

/// A recursive descent parser for the Python subset.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Token,
    previous: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code.
    ///
    /// Fails if the very first token is already malformed.
    pub fn new(source: &'a str) -> Result<Self, CompileError> {
        let mut scanner = Scanner::new(source);
        let current = scanner.next_token()?;
        Ok(Self {
            scanner,
            current,
            previous: Token::new(TokenKind::Eof, Span::new(0, 0)),
            depth: 0,
        })
    }

    /// Parses the source code into a [`Module`].
    pub fn parse_module(&mut self) -> Result<Module, CompileError> {
        let mut body = Vec::new();

        self.skip_line_breaks()?;
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
            self.expect_statement_end()?;
        }

        Ok(Module { body })
    }

    /// Parses a single statement.
    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        match &self.current.kind {
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_import_from(),
            TokenKind::Reserved(kw) => Err(CompileError::UnsupportedConstruct {
                message: format!("the '{kw}' statement is not supported"),
                span: self.current.span,
            }),
            _ => self.parse_assign_or_expr(),
        }
    }

    /// Parses `import a.b, c as d`.
    fn parse_import(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current.span;
        self.advance()?; // consume 'import'

        let mut names = Vec::new();
        loop {
            names.push(self.parse_import_alias(true)?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        Ok(Stmt::new(
            StmtKind::Import { names },
            start.to(self.previous.span),
        ))
    }

    /// Parses `from mod import a, b as c`, with an optional parenthesized
    /// name list.
    fn parse_import_from(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current.span;
        self.advance()?; // consume 'from'

        if self.check(&TokenKind::Dot) || self.check(&TokenKind::Ellipsis) {
            return Err(CompileError::UnsupportedConstruct {
                message: "relative imports are not supported".to_string(),
                span: self.current.span,
            });
        }
        let (module, _) = self.parse_dotted_name()?;
        self.expect(&TokenKind::Import)?;

        if self.check(&TokenKind::Star) {
            return Err(CompileError::UnsupportedConstruct {
                message: "wildcard imports are not supported".to_string(),
                span: self.current.span,
            });
        }

        let mut names = Vec::new();
        if self.check(&TokenKind::LeftParen) {
            self.advance()?;
            loop {
                names.push(self.parse_import_alias(false)?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance()?;
                if self.check(&TokenKind::RightParen) {
                    break;
                }
            }
            self.expect(&TokenKind::RightParen)?;
        } else {
            loop {
                names.push(self.parse_import_alias(false)?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance()?;
            }
        }

        Ok(Stmt::new(
            StmtKind::ImportFrom { module, names },
            start.to(self.previous.span),
        ))
    }

    fn parse_import_alias(&mut self, dotted: bool) -> Result<ImportAlias, CompileError> {
        let start = self.current.span;
        let name = if dotted {
            self.parse_dotted_name()?.0
        } else {
            self.expect_name()?
        };
        let asname = if self.check(&TokenKind::As) {
            self.advance()?;
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(ImportAlias {
            name,
            asname,
            span: start.to(self.previous.span),
        })
    }

    fn parse_dotted_name(&mut self) -> Result<(String, Span), CompileError> {
        let start = self.current.span;
        let mut name = self.expect_name()?;
        while self.check(&TokenKind::Dot) {
            self.advance()?;
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok((name, start.to(self.previous.span)))
    }

    /// Parses an expression statement or a (possibly chained) assignment.
    fn parse_assign_or_expr(&mut self) -> Result<Stmt, CompileError> {
        let start = self.current.span;
        let first = self.parse_testlist()?;

        if let TokenKind::AugAssign(op) = &self.current.kind {
            return Err(CompileError::UnsupportedConstruct {
                message: format!("augmented assignment ('{op}') is not supported"),
                span: self.current.span,
            });
        }
        if self.check(&TokenKind::Colon) {
            return Err(CompileError::UnsupportedConstruct {
                message: "variable annotations are not supported".to_string(),
                span: self.current.span,
            });
        }

        let mut targets = Vec::new();
        let mut value = first;
        while self.check(&TokenKind::Equal) {
            self.advance()?;
            targets.push(std::mem::replace(&mut value, self.parse_testlist()?));
        }

        if targets.is_empty() {
            let span = value.span;
            return Ok(Stmt::new(StmtKind::Expr { value }, span));
        }

        for target in &targets {
            validate_assign_target(target)?;
        }

        Ok(Stmt::new(
            StmtKind::Assign { targets, value },
            start.to(self.previous.span),
        ))
    }

    /// Parses a comma-separated expression list, producing a tuple when
    /// more than one element (or a trailing comma) is present.
    fn parse_testlist(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let first = self.parse_expression()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(&TokenKind::Comma) {
            self.advance()?;
            if !self.current.kind.starts_expression() {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::new(
            ExprKind::Tuple(items),
            start.to(self.previous.span),
        ))
    }

    /// Parses a single expression (`test` in the Python grammar).
    pub fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.enter_nesting()?;
        let result = self.parse_expression_inner();
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self) -> Result<Expr, CompileError> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }

        let expr = self.parse_or_test()?;

        if self.check_reserved("if") {
            return Err(CompileError::UnsupportedConstruct {
                message: "conditional expressions are not supported".to_string(),
                span: self.current.span,
            });
        }
        if self.check(&TokenKind::ColonEqual) {
            return Err(CompileError::UnsupportedConstruct {
                message: "assignment expressions are not supported".to_string(),
                span: self.current.span,
            });
        }
        Ok(expr)
    }

    fn parse_lambda(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        self.advance()?; // consume 'lambda'

        let params = self.parse_lambda_params()?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_expression()?;

        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            start.to(self.previous.span),
        ))
    }

    fn parse_lambda_params(&mut self) -> Result<Vec<Param>, CompileError> {
        let mut params: Vec<Param> = Vec::new();
        let mut seen_default = false;

        while !self.check(&TokenKind::Colon) {
            if self.check(&TokenKind::Star) || self.check(&TokenKind::StarStar) {
                return Err(CompileError::UnsupportedConstruct {
                    message: "starred parameters are not supported".to_string(),
                    span: self.current.span,
                });
            }
            let span = self.current.span;
            let name = self.expect_name()?;
            if params.iter().any(|param| param.name == name) {
                return Err(CompileError::Syntax {
                    message: format!("duplicate argument '{name}' in function definition"),
                    span,
                });
            }

            let default = if self.check(&TokenKind::Equal) {
                self.advance()?;
                seen_default = true;
                Some(self.parse_expression()?)
            } else {
                if seen_default {
                    return Err(CompileError::Syntax {
                        message: "non-default argument follows default argument".to_string(),
                        span,
                    });
                }
                None
            };

            params.push(Param {
                name,
                default,
                span: span.to(self.previous.span),
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        Ok(params)
    }

    fn parse_or_test(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let first = self.parse_and_test()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }

        let mut values = vec![first];
        while self.check(&TokenKind::Or) {
            self.advance()?;
            values.push(self.parse_and_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOpKind::Or,
                values,
            },
            start.to(self.previous.span),
        ))
    }

    fn parse_and_test(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let first = self.parse_not_test()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }

        let mut values = vec![first];
        while self.check(&TokenKind::And) {
            self.advance()?;
            values.push(self.parse_not_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOpKind::And,
                values,
            },
            start.to(self.previous.span),
        ))
    }

    fn parse_not_test(&mut self) -> Result<Expr, CompileError> {
        if !self.check(&TokenKind::Not) {
            return self.parse_comparison();
        }

        self.enter_nesting()?;
        let start = self.current.span;
        self.advance()?; // consume 'not'
        let operand = self.parse_not_test()?;
        self.depth -= 1;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(operand),
            },
            start.to(self.previous.span),
        ))
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let left = self.parse_bitor()?;

        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match &self.current.kind {
                TokenKind::Less => CmpOp::Lt,
                TokenKind::LessEqual => CmpOp::LtE,
                TokenKind::Greater => CmpOp::Gt,
                TokenKind::GreaterEqual => CmpOp::GtE,
                TokenKind::EqualEqual => CmpOp::Eq,
                TokenKind::NotEqual => CmpOp::NotEq,
                TokenKind::In => CmpOp::In,
                TokenKind::Is => {
                    self.advance()?;
                    let op = if self.check(&TokenKind::Not) {
                        self.advance()?;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    };
                    ops.push(op);
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                // After a complete operand, `not` can only begin `not in`
                TokenKind::Not => {
                    self.advance()?;
                    self.expect(&TokenKind::In)?;
                    ops.push(CmpOp::NotIn);
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                _ => break,
            };
            self.advance()?;
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }

        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            start.to(self.previous.span),
        ))
    }

    fn parse_bitor(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_bitxor()?;

        while self.check(&TokenKind::Pipe) {
            self.advance()?;
            let right = self.parse_bitxor()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op: BinOpKind::BitOr,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_bitand()?;

        while self.check(&TokenKind::Caret) {
            self.advance()?;
            let right = self.parse_bitand()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op: BinOpKind::BitXor,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_shift()?;

        while self.check(&TokenKind::Ampersand) {
            self.advance()?;
            let right = self.parse_shift()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op: BinOpKind::BitAnd,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_arith()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::LeftShift => BinOpKind::LShift,
                TokenKind::RightShift => BinOpKind::RShift,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_arith()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_term()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::Plus => BinOpKind::Add,
                TokenKind::Minus => BinOpKind::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_term()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut left = self.parse_factor()?;

        loop {
            let op = match &self.current.kind {
                TokenKind::Star => BinOpKind::Mult,
                TokenKind::At => BinOpKind::MatMult,
                TokenKind::Slash => BinOpKind::Div,
                TokenKind::SlashSlash => BinOpKind::FloorDiv,
                TokenKind::Percent => BinOpKind::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_factor()?;
            left = Expr::new(
                ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start.to(self.previous.span),
            );
        }

        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let op = match &self.current.kind {
            TokenKind::Plus => UnaryOpKind::Pos,
            TokenKind::Minus => UnaryOpKind::Neg,
            TokenKind::Tilde => UnaryOpKind::Invert,
            _ => return self.parse_power(),
        };

        self.enter_nesting()?;
        let start = self.current.span;
        self.advance()?;
        let operand = self.parse_factor()?;
        self.depth -= 1;
        let span = start.to(self.previous.span);

        // Fold a minus applied directly to a numeric literal, so negative
        // constants stay constants.
        if op == UnaryOpKind::Neg {
            if let ExprKind::Constant(constant) = &operand.kind {
                match constant {
                    Constant::Int(n) => {
                        return Ok(Expr::new(ExprKind::Constant(Constant::Int(-n.clone())), span));
                    }
                    Constant::Float(f) => {
                        return Ok(Expr::new(ExprKind::Constant(Constant::Float(-f)), span));
                    }
                    _ => {}
                }
            }
        }

        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let base = self.parse_postfix()?;

        if self.check(&TokenKind::StarStar) {
            self.advance()?;
            // Right-associative, and the exponent may itself be signed
            let exponent = self.parse_factor()?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    op: BinOpKind::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                start.to(self.previous.span),
            ));
        }

        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;
        let mut expr = self.parse_atom()?;

        loop {
            if self.check(&TokenKind::LeftParen) {
                self.advance()?;
                let (args, keywords) = self.parse_call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    start.to(self.previous.span),
                );
            } else if self.check(&TokenKind::LeftBracket) {
                self.advance()?;
                let index = self.parse_subscript_index()?;
                self.expect(&TokenKind::RightBracket)?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    start.to(self.previous.span),
                );
            } else if self.check(&TokenKind::Dot) {
                self.advance()?;
                let attr = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    start.to(self.previous.span),
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), CompileError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.check(&TokenKind::Star) {
                    return Err(CompileError::UnsupportedConstruct {
                        message: "star-argument unpacking is not supported".to_string(),
                        span: self.current.span,
                    });
                }
                if self.check(&TokenKind::StarStar) {
                    return Err(CompileError::UnsupportedConstruct {
                        message: "keyword-argument unpacking is not supported".to_string(),
                        span: self.current.span,
                    });
                }

                let arg_start = self.current.span;
                let arg = self.parse_expression()?;
                self.reject_comprehension()?;

                if self.check(&TokenKind::Equal) {
                    let name = match arg.kind {
                        ExprKind::Name(name) => name,
                        _ => {
                            return Err(CompileError::Syntax {
                                message:
                                    "expression cannot contain assignment, perhaps you meant \"==\"?"
                                        .to_string(),
                                span: arg.span,
                            });
                        }
                    };
                    self.advance()?;
                    let value = self.parse_expression()?;
                    keywords.push(Keyword {
                        name,
                        value,
                        span: arg_start.to(self.previous.span),
                    });
                } else {
                    if !keywords.is_empty() {
                        return Err(CompileError::Syntax {
                            message: "positional argument follows keyword argument".to_string(),
                            span: arg.span,
                        });
                    }
                    args.push(arg);
                }

                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance()?;
                if self.check(&TokenKind::RightParen) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightParen)?;
        Ok((args, keywords))
    }

    /// Parses what is between `[` and `]` of a subscript: a plain index,
    /// a slice, or a tuple index.
    fn parse_subscript_index(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;

        if self.check(&TokenKind::RightBracket) {
            return Err(CompileError::Syntax {
                message: "invalid syntax".to_string(),
                span: self.current.span,
            });
        }
        if self.check(&TokenKind::Colon) {
            return self.parse_slice(None, start);
        }

        let first = self.parse_expression()?;
        if self.check(&TokenKind::Colon) {
            return self.parse_slice(Some(Box::new(first)), start);
        }

        if self.check(&TokenKind::Comma) {
            let mut items = vec![first];
            while self.check(&TokenKind::Comma) {
                self.advance()?;
                if self.check(&TokenKind::RightBracket) {
                    break;
                }
                if self.check(&TokenKind::Colon) {
                    return Err(self.multidim_slice_error());
                }
                items.push(self.parse_expression()?);
                if self.check(&TokenKind::Colon) {
                    return Err(self.multidim_slice_error());
                }
            }
            return Ok(Expr::new(
                ExprKind::Tuple(items),
                start.to(self.previous.span),
            ));
        }

        Ok(first)
    }

    fn parse_slice(
        &mut self,
        lower: Option<Box<Expr>>,
        start: Span,
    ) -> Result<Expr, CompileError> {
        self.advance()?; // consume ':'

        let upper = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RightBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        let step = if self.check(&TokenKind::Colon) {
            self.advance()?;
            if self.check(&TokenKind::RightBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };

        if self.check(&TokenKind::Comma) {
            return Err(self.multidim_slice_error());
        }

        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            start.to(self.previous.span),
        ))
    }

    fn multidim_slice_error(&self) -> CompileError {
        CompileError::UnsupportedConstruct {
            message: "multidimensional slicing is not supported".to_string(),
            span: self.current.span,
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, CompileError> {
        let start = self.current.span;

        match &self.current.kind {
            TokenKind::Int(value) => {
                let value = value.clone();
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::Int(value)),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::Float(value) => {
                let value = *value;
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::Float(value)),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::Str(_) => self.parse_string_literal(start),
            TokenKind::Bytes(_) => self.parse_bytes_literal(start),
            TokenKind::True => {
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::Bool(true)),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::Bool(false)),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::None => {
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::None),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::Ellipsis => {
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Constant(Constant::Ellipsis),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Name(name),
                    start.to(self.previous.span),
                ))
            }
            TokenKind::LeftParen => self.parse_paren_atom(start),
            TokenKind::LeftBracket => self.parse_list_atom(start),
            TokenKind::LeftBrace => self.parse_brace_atom(start),
            TokenKind::Star => Err(CompileError::UnsupportedConstruct {
                message: "starred expressions are not supported".to_string(),
                span: self.current.span,
            }),
            TokenKind::Reserved(kw) => Err(CompileError::UnsupportedConstruct {
                message: format!("'{kw}' is not supported"),
                span: self.current.span,
            }),
            TokenKind::Eof => Err(CompileError::Syntax {
                message: "unexpected EOF while parsing".to_string(),
                span: self.current.span,
            }),
            _ => Err(CompileError::Syntax {
                message: "invalid syntax".to_string(),
                span: self.current.span,
            }),
        }
    }

    /// Parses a run of adjacent string literals into one constant.
    fn parse_string_literal(&mut self, start: Span) -> Result<Expr, CompileError> {
        let mut text = String::new();
        loop {
            match &self.current.kind {
                TokenKind::Str(s) => {
                    text.push_str(s);
                    self.advance()?;
                }
                TokenKind::Bytes(_) => {
                    return Err(CompileError::Syntax {
                        message: "cannot mix bytes and nonbytes literals".to_string(),
                        span: self.current.span,
                    });
                }
                _ => break,
            }
        }
        Ok(Expr::new(
            ExprKind::Constant(Constant::Str(text)),
            start.to(self.previous.span),
        ))
    }

    fn parse_bytes_literal(&mut self, start: Span) -> Result<Expr, CompileError> {
        let mut data = Vec::new();
        loop {
            match &self.current.kind {
                TokenKind::Bytes(b) => {
                    data.extend_from_slice(b);
                    self.advance()?;
                }
                TokenKind::Str(_) => {
                    return Err(CompileError::Syntax {
                        message: "cannot mix bytes and nonbytes literals".to_string(),
                        span: self.current.span,
                    });
                }
                _ => break,
            }
        }
        Ok(Expr::new(
            ExprKind::Constant(Constant::Bytes(data)),
            start.to(self.previous.span),
        ))
    }

    fn parse_paren_atom(&mut self, start: Span) -> Result<Expr, CompileError> {
        self.advance()?; // consume '('

        if self.check(&TokenKind::RightParen) {
            self.advance()?;
            return Ok(Expr::new(
                ExprKind::Tuple(Vec::new()),
                start.to(self.previous.span),
            ));
        }

        let first = self.parse_expression()?;
        self.reject_comprehension()?;

        if self.check(&TokenKind::Comma) {
            let mut items = vec![first];
            while self.check(&TokenKind::Comma) {
                self.advance()?;
                if self.check(&TokenKind::RightParen) {
                    break;
                }
                items.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::RightParen)?;
            return Ok(Expr::new(
                ExprKind::Tuple(items),
                start.to(self.previous.span),
            ));
        }

        self.expect(&TokenKind::RightParen)?;
        Ok(first)
    }

    fn parse_list_atom(&mut self, start: Span) -> Result<Expr, CompileError> {
        self.advance()?; // consume '['

        let mut items = Vec::new();
        if !self.check(&TokenKind::RightBracket) {
            loop {
                items.push(self.parse_expression()?);
                self.reject_comprehension()?;
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance()?;
                if self.check(&TokenKind::RightBracket) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightBracket)?;

        Ok(Expr::new(
            ExprKind::List(items),
            start.to(self.previous.span),
        ))
    }

    fn parse_brace_atom(&mut self, start: Span) -> Result<Expr, CompileError> {
        self.advance()?; // consume '{'

        if self.check(&TokenKind::RightBrace) {
            self.advance()?;
            return Ok(Expr::new(
                ExprKind::Dict {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                start.to(self.previous.span),
            ));
        }
        if self.check(&TokenKind::StarStar) {
            return Err(CompileError::UnsupportedConstruct {
                message: "dict unpacking is not supported".to_string(),
                span: self.current.span,
            });
        }

        let first = self.parse_expression()?;

        if self.check(&TokenKind::Colon) {
            // Dict display
            self.advance()?;
            let first_value = self.parse_expression()?;
            self.reject_comprehension()?;

            let mut keys = vec![first];
            let mut values = vec![first_value];
            while self.check(&TokenKind::Comma) {
                self.advance()?;
                if self.check(&TokenKind::RightBrace) {
                    break;
                }
                if self.check(&TokenKind::StarStar) {
                    return Err(CompileError::UnsupportedConstruct {
                        message: "dict unpacking is not supported".to_string(),
                        span: self.current.span,
                    });
                }
                keys.push(self.parse_expression()?);
                self.expect(&TokenKind::Colon)?;
                values.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::RightBrace)?;

            Ok(Expr::new(
                ExprKind::Dict { keys, values },
                start.to(self.previous.span),
            ))
        } else {
            // Set display
            self.reject_comprehension()?;

            let mut items = vec![first];
            while self.check(&TokenKind::Comma) {
                self.advance()?;
                if self.check(&TokenKind::RightBrace) {
                    break;
                }
                items.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::RightBrace)?;

            Ok(Expr::new(
                ExprKind::Set(items),
                start.to(self.previous.span),
            ))
        }
    }

    fn reject_comprehension(&self) -> Result<(), CompileError> {
        if self.check_reserved("for") || self.check_reserved("async") {
            return Err(CompileError::UnsupportedConstruct {
                message: "comprehensions are not supported".to_string(),
                span: self.current.span,
            });
        }
        Ok(())
    }

    // Helper methods

    fn advance(&mut self) -> Result<(), CompileError> {
        let next = self.scanner.next_token()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn check_reserved(&self, keyword: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Reserved(kw) if *kw == keyword)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), CompileError> {
        if self.check(kind) {
            self.advance()?;
            Ok(())
        } else {
            Err(CompileError::Syntax {
                message: format!("expected {:?}, found {:?}", kind, self.current.kind),
                span: self.current.span,
            })
        }
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(CompileError::Syntax {
                message: format!("expected a name, found {:?}", self.current.kind),
                span: self.current.span,
            })
        }
    }

    fn expect_statement_end(&mut self) -> Result<(), CompileError> {
        match self.current.kind {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance()?;
                self.skip_line_breaks()
            }
            TokenKind::Eof => Ok(()),
            _ => Err(CompileError::Syntax {
                message: "invalid syntax".to_string(),
                span: self.current.span,
            }),
        }
    }

    fn skip_line_breaks(&mut self) -> Result<(), CompileError> {
        while matches!(
            self.current.kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.advance()?;
        }
        Ok(())
    }

    fn enter_nesting(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CompileError::TooDeep {
                message: "expression nesting is too deep".to_string(),
                span: self.current.span,
            });
        }
        Ok(())
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }
}

fn validate_assign_target(target: &Expr) -> Result<(), CompileError> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. } => Ok(()),
        ExprKind::Constant(_) => Err(CompileError::Syntax {
            message: "cannot assign to literal".to_string(),
            span: target.span,
        }),
        ExprKind::Call { .. } => Err(CompileError::Syntax {
            message: "cannot assign to function call".to_string(),
            span: target.span,
        }),
        ExprKind::Tuple(_) | ExprKind::List(_) => Err(CompileError::UnsupportedConstruct {
            message: "unpacking assignment is not supported".to_string(),
            span: target.span,
        }),
        _ => Err(CompileError::Syntax {
            message: "cannot assign to expression".to_string(),
            span: target.span,
        }),
    }
}
