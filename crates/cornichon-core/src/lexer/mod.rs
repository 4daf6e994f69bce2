//! Lexical analysis (tokenization) for the Python subset.
//!
//! The lexer transforms source text into a stream of tokens that can be
//! consumed by the parser. Logical lines follow Python's rules: newlines
//! inside brackets are joined implicitly, a trailing backslash joins
//! lines explicitly, and comments run to the end of the physical line.
//!
//! ## Structure
//!
//! - `scanner.rs` - Main `Scanner` struct that produces tokens
//! - `token.rs` - `Token` and `TokenKind` definitions
//!
//! ## Usage
//!
//! ```rust
//! use cornichon_core::lexer::{Scanner, TokenKind};
//!
//! let mut scanner = Scanner::new("x = 42");
//!
//! loop {
//!     let token = scanner.next_token().unwrap();
//!     if matches!(token.kind, TokenKind::Eof) {
//!         break;
//!     }
//!     println!("{:?}", token.kind);
//! }
//! ```

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Span, Token, TokenKind};
