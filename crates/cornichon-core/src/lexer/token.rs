//! Token definitions for the Python-subset lexer.

use num_bigint::BigInt;

/// A span in the source code, representing a range of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the length of this span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if this span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the smallest span covering both `self` and `other`.
    pub fn to(&self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The span in the source code
    pub span: Span,
}

impl Token {
    /// Creates a new token.
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The different kinds of tokens in the supported Python subset.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    /// Integer literal of arbitrary precision
    Int(BigInt),
    /// Floating point literal
    Float(f64),
    /// String literal (prefix and escapes already resolved)
    Str(String),
    /// Bytes literal
    Bytes(Vec<u8>),
    /// True
    True,
    /// False
    False,
    /// None
    None,

    // Identifiers and keywords
    /// Identifier
    Identifier(String),
    /// A reserved Python keyword that has no meaning in this subset
    /// (`while`, `class`, `def`, ...). Carried through so the parser can
    /// report what was written rather than a bare "unexpected token".
    Reserved(&'static str),
    /// import
    Import,
    /// from
    From,
    /// as
    As,
    /// lambda
    Lambda,
    /// and
    And,
    /// or
    Or,
    /// not
    Not,
    /// in
    In,
    /// is
    Is,

    // Punctuation
    /// (
    LeftParen,
    /// )
    RightParen,
    /// [
    LeftBracket,
    /// ]
    RightBracket,
    /// {
    LeftBrace,
    /// }
    RightBrace,
    /// ,
    Comma,
    /// :
    Colon,
    /// ;
    Semicolon,
    /// .
    Dot,
    /// ...
    Ellipsis,
    /// =
    Equal,
    /// := (recognized so it can be rejected with a useful message)
    ColonEqual,

    // Operators
    /// +
    Plus,
    /// -
    Minus,
    /// *
    Star,
    /// **
    StarStar,
    /// /
    Slash,
    /// //
    SlashSlash,
    /// %
    Percent,
    /// @
    At,
    /// <<
    LeftShift,
    /// >>
    RightShift,
    /// &
    Ampersand,
    /// |
    Pipe,
    /// ^
    Caret,
    /// ~
    Tilde,
    /// <
    Less,
    /// >
    Greater,
    /// <=
    LessEqual,
    /// >=
    GreaterEqual,
    /// ==
    EqualEqual,
    /// !=
    NotEqual,
    /// Augmented assignment operator (`+=`, `//=`, ...), recognized as a
    /// unit so the parser can reject it with its spelling.
    AugAssign(&'static str),

    // Layout
    /// End of a logical line
    Newline,
    /// End of file
    Eof,
}

impl TokenKind {
    /// Returns true if this token is a keyword with meaning in the subset.
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Import
                | TokenKind::From
                | TokenKind::As
                | TokenKind::Lambda
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::In
                | TokenKind::Is
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
        )
    }

    /// Returns true if this token is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Bytes(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
        )
    }

    /// Returns true if this token can begin an expression.
    pub fn starts_expression(&self) -> bool {
        self.is_literal()
            || matches!(
                self,
                TokenKind::Identifier(_)
                    | TokenKind::Lambda
                    | TokenKind::Not
                    | TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Tilde
                    | TokenKind::LeftParen
                    | TokenKind::LeftBracket
                    | TokenKind::LeftBrace
                    | TokenKind::Ellipsis
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_new() {
        let span = Span::new(0, 10);
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 10);
    }

    #[test]
    fn test_span_len() {
        let span = Span::new(5, 15);
        assert_eq!(span.len(), 10);
    }

    #[test]
    fn test_span_is_empty() {
        let empty = Span::new(5, 5);
        let non_empty = Span::new(5, 10);

        assert!(empty.is_empty());
        assert!(!non_empty.is_empty());
    }

    #[test]
    fn test_span_to() {
        let a = Span::new(2, 5);
        let b = Span::new(8, 12);
        assert_eq!(a.to(b), Span::new(2, 12));
        assert_eq!(b.to(a), Span::new(2, 12));
    }

    #[test]
    fn test_token_new() {
        let token = Token::new(TokenKind::Float(42.0), Span::new(0, 4));
        assert_eq!(token.kind, TokenKind::Float(42.0));
        assert_eq!(token.span, Span::new(0, 4));
    }

    #[test]
    fn test_is_keyword() {
        assert!(TokenKind::Import.is_keyword());
        assert!(TokenKind::Lambda.is_keyword());
        assert!(TokenKind::And.is_keyword());
        assert!(TokenKind::Not.is_keyword());
        assert!(TokenKind::In.is_keyword());
        assert!(TokenKind::None.is_keyword());

        assert!(!TokenKind::Plus.is_keyword());
        assert!(!TokenKind::Identifier("x".to_string()).is_keyword());
        assert!(!TokenKind::Reserved("while").is_keyword());
        assert!(!TokenKind::Eof.is_keyword());
    }

    #[test]
    fn test_is_literal() {
        assert!(TokenKind::Int(BigInt::from(42)).is_literal());
        assert!(TokenKind::Str("hi".to_string()).is_literal());
        assert!(TokenKind::Bytes(vec![1, 2]).is_literal());
        assert!(TokenKind::True.is_literal());
        assert!(TokenKind::None.is_literal());

        assert!(!TokenKind::Identifier("x".to_string()).is_literal());
        assert!(!TokenKind::Newline.is_literal());
    }

    #[test]
    fn test_starts_expression() {
        assert!(TokenKind::Int(BigInt::from(1)).starts_expression());
        assert!(TokenKind::Identifier("x".to_string()).starts_expression());
        assert!(TokenKind::Lambda.starts_expression());
        assert!(TokenKind::Minus.starts_expression());
        assert!(TokenKind::LeftParen.starts_expression());

        assert!(!TokenKind::Comma.starts_expression());
        assert!(!TokenKind::Equal.starts_expression());
        assert!(!TokenKind::Reserved("if").starts_expression());
    }
}
