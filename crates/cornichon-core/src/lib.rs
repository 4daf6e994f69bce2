// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # cornichon-core
//!
//! A compiler from a restricted Python subset to pickle virtual machine
//! bytecode, with the tooling around it.
//!
//! ## Overview
//!
//! This crate provides the complete pipeline:
//! - Lexer and parser for the supported Python subset
//! - The AST-to-opcode compiler, including the macro escape hatches
//! - A `pickletools.optimize`-style memo-slot optimizer
//! - A stream disassembler
//! - A reference loader that executes compiled streams for tests and
//!   the CLI's `--run`
//!
//! ## Quick Start
//!
//! ```rust
//! use cornichon_core::{compile_source, Options};
//!
//! let stream = compile_source("RESULT = 1 + 2", &Options::default())?;
//! assert_eq!(cornichon_core::vm::Machine::new().run(&stream)?.to_string(), "3");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod optimize;
pub mod parser;
pub mod pyrepr;
pub mod stream;
pub mod vm;

// Re-exports for convenience
pub use compiler::{Compiler, HIGHEST_PROTOCOL, LambdaMode, Options, compile_source};
pub use disasm::disassemble;
pub use error::CompileError;
pub use optimize::optimize;
pub use stream::StreamError;
