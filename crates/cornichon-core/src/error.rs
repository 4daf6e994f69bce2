//! Compile-time error reporting.
//!
//! Every stage that rejects source text (lexer, parser, code generator)
//! reports through [`CompileError`], so callers handle a single type. Each
//! variant carries a human-readable message and the byte span of the
//! offending source; [`CompileError::render`] turns that into a caret
//! diagnostic against the original text.

use thiserror::Error;

use crate::lexer::Span;

/// Any failure produced while turning source text into a pickle stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Malformed input rejected by the lexer or parser.
    #[error("syntax error: {message}")]
    Syntax {
        /// What was malformed
        message: String,
        /// Where in the source
        span: Span,
    },

    /// An identifier that is neither memoized nor resolvable.
    #[error("name error: {message}")]
    NameResolution {
        /// Which name failed to resolve
        message: String,
        /// Where in the source
        span: Span,
    },

    /// A recognized Python construct that is outside the supported subset.
    #[error("unsupported construct: {message}")]
    UnsupportedConstruct {
        /// What was recognized
        message: String,
        /// Where in the source
        span: Span,
    },

    /// A macro invoked with the wrong arity or argument types.
    #[error("macro error: {message}")]
    MacroArgument {
        /// What the macro expected and what it got
        message: String,
        /// Where in the source
        span: Span,
    },

    /// Misuse of the reserved result identifier.
    #[error("reserved name: {message}")]
    ReservedName {
        /// How the reserved name was misused
        message: String,
        /// Where in the source
        span: Span,
    },

    /// A construct that needs a newer pickle protocol than the one selected.
    #[error("protocol error: {message}")]
    ProtocolRequirement {
        /// Which construct and which protocols are involved
        message: String,
        /// Where in the source
        span: Span,
    },

    /// Nesting beyond the compiler's recursion ceiling.
    #[error("nesting error: {message}")]
    TooDeep {
        /// Which stage hit the ceiling
        message: String,
        /// Where in the source
        span: Span,
    },
}

impl CompileError {
    /// The byte span of the offending source.
    pub fn span(&self) -> Span {
        match self {
            CompileError::Syntax { span, .. }
            | CompileError::NameResolution { span, .. }
            | CompileError::UnsupportedConstruct { span, .. }
            | CompileError::MacroArgument { span, .. }
            | CompileError::ReservedName { span, .. }
            | CompileError::ProtocolRequirement { span, .. }
            | CompileError::TooDeep { span, .. } => *span,
        }
    }

    /// The 1-based line number the error starts on.
    pub fn line(&self, source: &str) -> usize {
        let start = self.span().start.min(source.len());
        source[..start].bytes().filter(|&b| b == b'\n').count() + 1
    }

    /// Renders the error as a caret diagnostic against `source`:
    ///
    /// ```text
    ///    2 | x = unknown_thing
    ///      |     ^^^^^^^^^^^^^
    /// name error: name 'unknown_thing' is not defined
    /// ```
    pub fn render(&self, source: &str) -> String {
        let span = self.span();
        let start = span.start.min(source.len());

        let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[start..]
            .find('\n')
            .map_or(source.len(), |i| start + i);
        let line_no = self.line(source);
        let line = &source[line_start..line_end];

        // Caret placement counts characters, not bytes, so multi-byte
        // source still lines up.
        let pad = source[line_start..start].chars().count();
        let marked_end = span.end.clamp(start, line_end);
        let carets = source[start..marked_end].chars().count().max(1);

        format!(
            "{line_no:>4} | {line}\n     | {}{}\n{self}",
            " ".repeat(pad),
            "^".repeat(carets),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_accessor() {
        let err = CompileError::Syntax {
            message: "unexpected indent".to_string(),
            span: Span::new(3, 7),
        };
        assert_eq!(err.span(), Span::new(3, 7));
    }

    #[test]
    fn test_line_numbers() {
        let source = "a = 1\nb = 2\nc = oops\n";
        let err = CompileError::NameResolution {
            message: "name 'oops' is not defined".to_string(),
            span: Span::new(16, 20),
        };
        assert_eq!(err.line(source), 3);
    }

    #[test]
    fn test_render_points_at_span() {
        let source = "x = unknown_thing\n";
        let err = CompileError::NameResolution {
            message: "name 'unknown_thing' is not defined".to_string(),
            span: Span::new(4, 17),
        };
        let rendered = err.render(source);
        assert_eq!(
            rendered,
            "   1 | x = unknown_thing\n     |     ^^^^^^^^^^^^^\nname error: name 'unknown_thing' is not defined"
        );
    }

    #[test]
    fn test_render_clamps_to_line_end() {
        let source = "a\nbb\n";
        let err = CompileError::Syntax {
            message: "unterminated string literal".to_string(),
            span: Span::new(2, 40),
        };
        let rendered = err.render(source);
        assert!(rendered.contains("   2 | bb\n"));
        assert!(rendered.contains("     | ^^\n"));
    }

    #[test]
    fn test_render_empty_span_gets_one_caret() {
        let source = "x =\n";
        let err = CompileError::Syntax {
            message: "expected an expression".to_string(),
            span: Span::new(3, 3),
        };
        let rendered = err.render(source);
        assert!(rendered.contains("^"));
        assert!(!rendered.contains("^^"));
    }

    #[test]
    fn test_display_carries_kind_prefix() {
        let err = CompileError::ProtocolRequirement {
            message: "bytes literals require protocol 3 but the current protocol is 2".to_string(),
            span: Span::new(0, 5),
        };
        assert_eq!(
            err.to_string(),
            "protocol error: bytes literals require protocol 3 but the current protocol is 2"
        );
    }
}
