//! Abstract syntax tree definitions for the Python subset.
//!
//! Shapes and field names follow Python's own `ast` module where the
//! subset overlaps with it, so the tree reads familiarly next to
//! CPython documentation. Every statement and expression carries the
//! byte span of its source text for diagnostics.

use num_bigint::BigInt;

use crate::lexer::Span;

/// A complete parsed program.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// The statements in the program
    pub body: Vec<Stmt>,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// What kind of statement this is
    pub kind: StmtKind,
    /// Source location
    pub span: Span,
}

impl Stmt {
    /// Creates a statement with the given kind and span.
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Assignment: `a = b = value`
    Assign {
        /// The targets, left to right
        targets: Vec<Expr>,
        /// The assigned value
        value: Expr,
    },
    /// A bare expression evaluated for effect
    Expr {
        /// The expression
        value: Expr,
    },
    /// `import a, b as c`
    Import {
        /// The imported modules
        names: Vec<ImportAlias>,
    },
    /// `from mod import a, b as c`
    ImportFrom {
        /// The module imported from
        module: String,
        /// The imported symbols
        names: Vec<ImportAlias>,
    },
}

/// One name in an import statement, with its optional `as` rename.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportAlias {
    /// The dotted name as written
    pub name: String,
    /// The `as` alias, if any
    pub asname: Option<String>,
    /// Source location of the name
    pub span: Span,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// What kind of expression this is
    pub kind: ExprKind,
    /// Source location
    pub span: Span,
}

impl Expr {
    /// Creates an expression with the given kind and span.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal constant
    Constant(Constant),
    /// An identifier reference
    Name(String),
    /// Tuple display: `(a, b)` or a bare `a, b`
    Tuple(Vec<Expr>),
    /// List display: `[a, b]`
    List(Vec<Expr>),
    /// Dict display: `{k: v}`
    Dict {
        /// The keys, in source order
        keys: Vec<Expr>,
        /// The values, parallel to `keys`
        values: Vec<Expr>,
    },
    /// Set display: `{a, b}`
    Set(Vec<Expr>),
    /// Binary operation: `a + b`
    BinOp {
        /// The operator
        op: BinOpKind,
        /// The left operand
        left: Box<Expr>,
        /// The right operand
        right: Box<Expr>,
    },
    /// Unary operation: `-a`, `not a`
    UnaryOp {
        /// The operator
        op: UnaryOpKind,
        /// The operand
        operand: Box<Expr>,
    },
    /// Boolean operation: `a and b and c`
    BoolOp {
        /// `and` or `or`
        op: BoolOpKind,
        /// The operands, two or more
        values: Vec<Expr>,
    },
    /// Comparison chain: `a < b <= c`
    Compare {
        /// The leftmost operand
        left: Box<Expr>,
        /// The operators, left to right
        ops: Vec<CmpOp>,
        /// The operands after each operator
        comparators: Vec<Expr>,
    },
    /// Call: `f(a, b, key=c)`
    Call {
        /// The callee
        func: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        keywords: Vec<Keyword>,
    },
    /// Subscript: `a[b]`
    Subscript {
        /// The container
        value: Box<Expr>,
        /// The index or slice
        index: Box<Expr>,
    },
    /// Slice inside a subscript: `a[lo:hi:step]`
    Slice {
        /// The lower bound, if written
        lower: Option<Box<Expr>>,
        /// The upper bound, if written
        upper: Option<Box<Expr>>,
        /// The step, if written
        step: Option<Box<Expr>>,
    },
    /// Attribute access: `a.b`
    Attribute {
        /// The object
        value: Box<Expr>,
        /// The attribute name
        attr: String,
    },
    /// Lambda: `lambda a, b=1: a + b`
    Lambda {
        /// The parameters
        params: Vec<Param>,
        /// The body expression
        body: Box<Expr>,
    },
}

/// A lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// The parameter name
    pub name: String,
    /// The default value, if any
    pub default: Option<Expr>,
    /// Source location of the name
    pub span: Span,
}

/// A keyword argument in a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// The argument name
    pub name: String,
    /// The argument value
    pub value: Expr,
    /// Source location of the whole `name=value`
    pub span: Span,
}

/// A literal constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `None`
    None,
    /// `True` or `False`
    Bool(bool),
    /// An integer of any size
    Int(BigInt),
    /// A float
    Float(f64),
    /// A text string
    Str(String),
    /// A bytes literal
    Bytes(Vec<u8>),
    /// `...`
    Ellipsis,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mult,
    /// `@`
    MatMult,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `~`
    Invert,
    /// `not`
    Not,
}

/// Boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `is`
    Is,
    /// `is not`
    IsNot,
    /// `in`
    In,
    /// `not in`
    NotIn,
}
