//! Parser for the Python subset.
//!
//! Transforms a stream of tokens into an abstract syntax tree. The
//! grammar is Python's, restricted to the statement forms the pickle
//! machine can express: assignments, bare expressions, and imports.
//! Anything recognizably Python but outside that subset is rejected
//! with a dedicated message rather than a generic syntax error.
//!
//! ## Usage
//!
//! ```rust
//! use cornichon_core::parser::Parser;
//!
//! let mut parser = Parser::new("x = [1, 2, 3]").unwrap();
//! let module = parser.parse_module().expect("should parse");
//! assert_eq!(module.body.len(), 1);
//! ```

mod parser;

pub use parser::Parser;
