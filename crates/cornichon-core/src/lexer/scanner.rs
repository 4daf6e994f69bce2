//! The scanner that produces tokens from source text.
//!
//! The subset is expression-oriented, so there is no indentation tracking:
//! every logical line starts at column zero, and a line that begins with
//! whitespace is rejected outright. Newlines inside parentheses, brackets
//! and braces are skipped (implicit line joining), and a trailing `\`
//! joins the next physical line explicitly.

use num_bigint::BigInt;

use super::{Span, Token, TokenKind};
use crate::error::CompileError;

/// Python keywords that are reserved but have no meaning in this subset.
const RESERVED_KEYWORDS: &[&str] = &[
    "assert", "async", "await", "break", "class", "continue", "def", "del", "elif", "else",
    "except", "finally", "for", "global", "if", "nonlocal", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// A scanner that tokenizes source code written in the Python subset.
pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    /// Open parenthesis/bracket/brace depth, for implicit line joining.
    paren_depth: usize,
    /// True right after a logical line break; used to reject indentation.
    at_line_start: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            current_pos: 0,
            paren_depth: 0,
            at_line_start: true,
        }
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        let ws_start = self.current_pos;
        self.skip_whitespace_and_comments()?;

        if self.at_line_start
            && self.current_pos > ws_start
            && !matches!(self.peek(), Some('\n') | None)
        {
            return Err(CompileError::Syntax {
                message: "unexpected indent".to_string(),
                span: Span::new(ws_start, self.current_pos),
            });
        }

        let start = self.current_pos;

        let Some((_pos, ch)) = self.advance() else {
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start)));
        };

        let kind = match ch {
            '\n' => TokenKind::Newline,

            // Bracketing, tracked for implicit line joining
            '(' => {
                self.paren_depth += 1;
                TokenKind::LeftParen
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RightParen
            }
            '[' => {
                self.paren_depth += 1;
                TokenKind::LeftBracket
            }
            ']' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RightBracket
            }
            '{' => {
                self.paren_depth += 1;
                TokenKind::LeftBrace
            }
            '}' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                TokenKind::RightBrace
            }

            // Single-character tokens
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '~' => TokenKind::Tilde,

            // Multi-character tokens
            ':' => self.two_char('=', TokenKind::ColonEqual, TokenKind::Colon),
            '=' => self.two_char('=', TokenKind::EqualEqual, TokenKind::Equal),
            '.' => self.scan_dot(start)?,
            '+' => self.two_char('=', TokenKind::AugAssign("+="), TokenKind::Plus),
            '-' => self.two_char('=', TokenKind::AugAssign("-="), TokenKind::Minus),
            '*' => self.scan_star(),
            '/' => self.scan_slash(),
            '%' => self.two_char('=', TokenKind::AugAssign("%="), TokenKind::Percent),
            '@' => self.two_char('=', TokenKind::AugAssign("@="), TokenKind::At),
            '&' => self.two_char('=', TokenKind::AugAssign("&="), TokenKind::Ampersand),
            '|' => self.two_char('=', TokenKind::AugAssign("|="), TokenKind::Pipe),
            '^' => self.two_char('=', TokenKind::AugAssign("^="), TokenKind::Caret),
            '<' => self.scan_less_than(),
            '>' => self.scan_greater_than(),
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::NotEqual
                } else {
                    return Err(self.err_syntax("unexpected character '!'", start));
                }
            }

            // String literals
            '"' | '\'' => self.scan_string(ch, false, false, start)?,

            // Numbers
            '0'..='9' => self.scan_number(ch, start)?,

            // Identifiers, keywords, and prefixed string literals
            _ if is_id_start(ch) => self.scan_identifier(ch, start)?,

            _ => {
                return Err(self.err_syntax(format!("unexpected character '{ch}'"), start));
            }
        };

        self.at_line_start = kind == TokenKind::Newline;
        Ok(Token::new(kind, Span::new(start, self.current_pos)))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, ch)| ch)
    }

    fn err_syntax(&self, message: impl Into<String>, start: usize) -> CompileError {
        CompileError::Syntax {
            message: message.into(),
            span: Span::new(start, self.current_pos),
        }
    }

    fn two_char(&mut self, second: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek() == Some(second) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\x0c') => {
                    self.advance();
                }
                Some('\n') if self.paren_depth > 0 => {
                    // Implicit line joining inside brackets
                    self.advance();
                }
                Some('#') => {
                    // Comment: skip until end of line
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('\\') => {
                    match self.peek_next() {
                        Some('\n' | '\r') => {
                            self.advance(); // consume '\'
                            if self.peek() == Some('\r') {
                                self.advance();
                            }
                            if self.peek() == Some('\n') {
                                self.advance();
                            }
                        }
                        _ => {
                            let start = self.current_pos;
                            self.advance();
                            return Err(self.err_syntax(
                                "unexpected character after line continuation character",
                                start,
                            ));
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_dot(&mut self, start: usize) -> Result<TokenKind, CompileError> {
        if self.peek() == Some('.') && self.peek_next() == Some('.') {
            self.advance();
            self.advance();
            Ok(TokenKind::Ellipsis)
        } else if matches!(self.peek(), Some('0'..='9')) {
            self.scan_number('.', start)
        } else {
            Ok(TokenKind::Dot)
        }
    }

    fn scan_star(&mut self) -> TokenKind {
        match self.peek() {
            Some('*') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::AugAssign("**=")
                } else {
                    TokenKind::StarStar
                }
            }
            Some('=') => {
                self.advance();
                TokenKind::AugAssign("*=")
            }
            _ => TokenKind::Star,
        }
    }

    fn scan_slash(&mut self) -> TokenKind {
        match self.peek() {
            Some('/') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::AugAssign("//=")
                } else {
                    TokenKind::SlashSlash
                }
            }
            Some('=') => {
                self.advance();
                TokenKind::AugAssign("/=")
            }
            _ => TokenKind::Slash,
        }
    }

    fn scan_less_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('<') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::AugAssign("<<=")
                } else {
                    TokenKind::LeftShift
                }
            }
            Some('=') => {
                self.advance();
                TokenKind::LessEqual
            }
            _ => TokenKind::Less,
        }
    }

    fn scan_greater_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('>') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::AugAssign(">>=")
                } else {
                    TokenKind::RightShift
                }
            }
            Some('=') => {
                self.advance();
                TokenKind::GreaterEqual
            }
            _ => TokenKind::Greater,
        }
    }

    fn scan_number(&mut self, first: char, start: usize) -> Result<TokenKind, CompileError> {
        // Radix literals
        if first == '0' {
            match self.peek() {
                Some('x' | 'X') => return self.scan_radix_number(16, start),
                Some('o' | 'O') => return self.scan_radix_number(8, start),
                Some('b' | 'B') => return self.scan_radix_number(2, start),
                _ => {}
            }
        }

        let mut int_part = String::new();
        if first != '.' {
            int_part.push(first);
            self.collect_digit_run(&mut int_part);
        }

        // Fractional part
        let mut frac_part = String::new();
        let mut has_dot = first == '.';
        if !has_dot && self.peek() == Some('.') && self.peek_next() != Some('.') {
            self.advance();
            has_dot = true;
        }
        if has_dot {
            self.collect_digit_run(&mut frac_part);
        }

        // Exponent part
        let mut exp_part = String::new();
        let mut has_exp = false;
        if matches!(self.peek(), Some('e' | 'E')) {
            has_exp = true;
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                exp_part.push(sign);
                self.advance();
            }
            let mut exp_digits = String::new();
            self.collect_digit_run(&mut exp_digits);
            let cleaned = clean_digits(&exp_digits, false)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| self.err_syntax("invalid decimal literal", start))?;
            exp_part.push_str(&cleaned);
        }

        // A trailing 'j' would make this a complex literal
        if matches!(self.peek(), Some('j' | 'J')) {
            self.advance();
            return Err(CompileError::UnsupportedConstruct {
                message: "complex literals are not supported".to_string(),
                span: Span::new(start, self.current_pos),
            });
        }
        if matches!(self.peek(), Some(ch) if is_id_start(ch)) {
            return Err(self.err_syntax("invalid decimal literal", start));
        }

        let int_digits = clean_digits(&int_part, false)
            .ok_or_else(|| self.err_syntax("invalid decimal literal", start))?;
        let frac_digits = clean_digits(&frac_part, false)
            .ok_or_else(|| self.err_syntax("invalid decimal literal", start))?;

        if !has_dot && !has_exp {
            if int_digits.starts_with('0') && int_digits.bytes().any(|b| b != b'0') {
                return Err(self.err_syntax(
                    "leading zeros in decimal integer literals are not permitted",
                    start,
                ));
            }
            let value = BigInt::parse_bytes(int_digits.as_bytes(), 10)
                .ok_or_else(|| self.err_syntax("invalid decimal literal", start))?;
            return Ok(TokenKind::Int(value));
        }

        let mut text = if int_digits.is_empty() {
            "0".to_string()
        } else {
            int_digits
        };
        if has_dot {
            text.push('.');
            text.push_str(if frac_digits.is_empty() {
                "0"
            } else {
                &frac_digits
            });
        }
        if has_exp {
            text.push('e');
            text.push_str(&exp_part);
        }
        let value: f64 = text
            .parse()
            .map_err(|_| self.err_syntax("invalid decimal literal", start))?;
        Ok(TokenKind::Float(value))
    }

    fn scan_radix_number(&mut self, radix: u32, start: usize) -> Result<TokenKind, CompileError> {
        let noun = match radix {
            16 => "hexadecimal",
            8 => "octal",
            _ => "binary",
        };
        self.advance(); // consume 'x', 'o' or 'b'

        let mut raw = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_digit(radix) || ch == '_' {
                raw.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some(ch) if is_id_start(ch) || ch.is_ascii_digit()) {
            return Err(self.err_syntax(format!("invalid {noun} literal"), start));
        }

        let digits = clean_digits(&raw, true)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| self.err_syntax(format!("invalid {noun} literal"), start))?;
        let value = BigInt::parse_bytes(digits.as_bytes(), radix)
            .ok_or_else(|| self.err_syntax(format!("invalid {noun} literal"), start))?;
        Ok(TokenKind::Int(value))
    }

    fn scan_identifier(&mut self, first: char, start: usize) -> Result<TokenKind, CompileError> {
        let mut name = String::from(first);

        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // A short identifier followed directly by a quote is a string prefix.
        if name.len() <= 2 {
            if let Some(quote @ ('"' | '\'')) = self.peek() {
                match name.to_ascii_lowercase().as_str() {
                    "r" => {
                        self.advance();
                        return self.scan_string(quote, true, false, start);
                    }
                    "b" => {
                        self.advance();
                        return self.scan_string(quote, false, true, start);
                    }
                    "rb" | "br" => {
                        self.advance();
                        return self.scan_string(quote, true, true, start);
                    }
                    "u" => {
                        self.advance();
                        return self.scan_string(quote, false, false, start);
                    }
                    "f" | "rf" | "fr" => {
                        return Err(CompileError::UnsupportedConstruct {
                            message: "f-string literals are not supported".to_string(),
                            span: Span::new(start, self.current_pos),
                        });
                    }
                    _ => {}
                }
            }
        }

        // Check for keywords
        let kind = match name.as_str() {
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "lambda" => TokenKind::Lambda,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "is" => TokenKind::Is,
            "None" => TokenKind::None,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            _ => match RESERVED_KEYWORDS.iter().find(|kw| **kw == name) {
                Some(kw) => TokenKind::Reserved(kw),
                None => TokenKind::Identifier(name),
            },
        };
        Ok(kind)
    }

    fn scan_string(
        &mut self,
        quote: char,
        raw: bool,
        bytes: bool,
        start: usize,
    ) -> Result<TokenKind, CompileError> {
        if self.peek() == Some(quote) && self.peek_next() == Some(quote) {
            self.advance();
            self.advance();
            return Err(CompileError::UnsupportedConstruct {
                message: "triple-quoted strings are not supported".to_string(),
                span: Span::new(start, self.current_pos),
            });
        }

        let mut text = String::new();
        let mut data = Vec::new();

        loop {
            match self.advance() {
                None => {
                    return Err(self.err_syntax("EOL while scanning string literal", start));
                }
                Some((_, ch)) if ch == quote => break,
                Some((_, '\n')) => {
                    return Err(self.err_syntax("EOL while scanning string literal", start));
                }
                Some((_, '\\')) if raw => {
                    // Raw literals keep the backslash and whatever follows,
                    // including a quote character.
                    let Some((_, next)) = self.advance() else {
                        return Err(self.err_syntax("EOL while scanning string literal", start));
                    };
                    if bytes {
                        data.push(b'\\');
                        self.push_byte(&mut data, next, start)?;
                    } else {
                        text.push('\\');
                        text.push(next);
                    }
                }
                Some((_, '\\')) => {
                    self.scan_escape(&mut text, &mut data, bytes, start)?;
                }
                Some((_, ch)) => {
                    if bytes {
                        self.push_byte(&mut data, ch, start)?;
                    } else {
                        text.push(ch);
                    }
                }
            }
        }

        if bytes {
            Ok(TokenKind::Bytes(data))
        } else {
            Ok(TokenKind::Str(text))
        }
    }

    fn push_byte(&self, data: &mut Vec<u8>, ch: char, start: usize) -> Result<(), CompileError> {
        if !ch.is_ascii() {
            return Err(self.err_syntax(
                "bytes can only contain ASCII literal characters",
                start,
            ));
        }
        data.push(ch as u8);
        Ok(())
    }

    fn scan_escape(
        &mut self,
        text: &mut String,
        data: &mut Vec<u8>,
        bytes: bool,
        start: usize,
    ) -> Result<(), CompileError> {
        let Some((_, esc)) = self.advance() else {
            return Err(self.err_syntax("EOL while scanning string literal", start));
        };
        let mut push = |ch: char| {
            if bytes {
                data.push(ch as u8);
            } else {
                text.push(ch);
            }
        };
        match esc {
            '\n' => {} // escaped newline joins the lines
            'n' => push('\n'),
            't' => push('\t'),
            'r' => push('\r'),
            'a' => push('\x07'),
            'b' => push('\x08'),
            'f' => push('\x0c'),
            'v' => push('\x0b'),
            '\\' => push('\\'),
            '\'' => push('\''),
            '"' => push('"'),
            '0'..='7' => {
                let mut value = esc as u32 - '0' as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ '0'..='7') => {
                            value = value * 8 + (d as u32 - '0' as u32);
                            self.advance();
                        }
                        _ => break,
                    }
                }
                if bytes {
                    if value > 0xff {
                        return Err(
                            self.err_syntax("octal escape value larger than 255 in bytes literal", start)
                        );
                    }
                    data.push(value as u8);
                } else {
                    match char::from_u32(value) {
                        Some(ch) => text.push(ch),
                        None => return Err(self.err_syntax("invalid octal escape", start)),
                    }
                }
            }
            'x' => {
                let value = self.read_hex_digits(2, start, "\\x")?;
                if bytes {
                    data.push(value as u8);
                } else {
                    match char::from_u32(value) {
                        Some(ch) => text.push(ch),
                        None => return Err(self.err_syntax("invalid \\x escape", start)),
                    }
                }
            }
            'u' if !bytes => {
                let value = self.read_hex_digits(4, start, "\\u")?;
                match char::from_u32(value) {
                    Some(ch) => text.push(ch),
                    None => return Err(self.err_syntax("invalid \\u escape", start)),
                }
            }
            'U' if !bytes => {
                let value = self.read_hex_digits(8, start, "\\U")?;
                match char::from_u32(value) {
                    Some(ch) => text.push(ch),
                    None => return Err(self.err_syntax("invalid \\U escape", start)),
                }
            }
            'N' if !bytes => {
                return Err(CompileError::UnsupportedConstruct {
                    message: "named unicode escapes (\\N{...}) are not supported".to_string(),
                    span: Span::new(start, self.current_pos),
                });
            }
            other => {
                // Unknown escapes keep the backslash, as Python does.
                push('\\');
                if bytes {
                    self.push_byte(data, other, start)?;
                } else {
                    text.push(other);
                }
            }
        }
        Ok(())
    }

    fn read_hex_digits(
        &mut self,
        count: usize,
        start: usize,
        what: &str,
    ) -> Result<u32, CompileError> {
        let mut value = 0u32;
        for _ in 0..count {
            match self.peek() {
                Some(ch) if ch.is_ascii_hexdigit() => {
                    value = value * 16 + ch.to_digit(16).unwrap_or(0);
                    self.advance();
                }
                _ => {
                    return Err(self.err_syntax(format!("invalid {what} escape"), start));
                }
            }
        }
        Ok(value)
    }

    fn collect_digit_run(&mut self, out: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                out.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }
}

/// Strips digit-group underscores, rejecting doubled or trailing ones.
fn clean_digits(raw: &str, allow_leading_underscore: bool) -> Option<String> {
    if raw.contains("__") || raw.ends_with('_') {
        return None;
    }
    if !allow_leading_underscore && raw.starts_with('_') {
        return None;
    }
    Some(raw.chars().filter(|ch| *ch != '_').collect())
}

/// Checks if a character can start an identifier.
fn is_id_start(ch: char) -> bool {
    ch == '_' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Checks if a character can continue an identifier.
fn is_id_continue(ch: char) -> bool {
    ch == '_' || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) if token.kind == TokenKind::Eof => None,
            other => Some(other),
        }
    }
}
