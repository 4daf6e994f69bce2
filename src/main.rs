// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! cornichon - a Python-subset-to-pickle compiler
//!
//! This is the main entry point for the cornichon CLI/REPL. Source
//! comes from a file, `-c`, or piped stdin; with no input on a
//! terminal, the interactive REPL starts instead.

mod repl;

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use cornichon_core::vm::Machine;
use cornichon_core::{LambdaMode, Options, compile_source, disassemble};
use owo_colors::OwoColorize;

/// Compile a restricted Python subset to pickle bytecode.
#[derive(Parser, Debug)]
#[command(name = "cornichon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source file to compile
    file: Option<PathBuf>,

    /// Compile the given source text instead of a file
    #[arg(short, long, value_name = "SRC", conflicts_with = "file")]
    code: Option<String>,

    /// Pickle protocol to target (0-5)
    #[arg(short, long, value_name = "N", default_value_t = 4)]
    protocol: u8,

    /// Resolve unbound names as Python built-ins
    #[arg(short, long)]
    extended: bool,

    /// Compile lambdas to CPython 3.8 code objects
    #[arg(short, long)]
    lambdas: bool,

    /// Strip unread memo slots from the stream
    #[arg(short = 'O', long)]
    optimize: bool,

    /// Write the raw stream to a file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print a pickletools-style disassembly
    #[arg(short, long)]
    disassemble: bool,

    /// Execute the stream on the reference loader and print the result
    #[arg(short, long)]
    run: bool,

    /// How to render the stream on stdout
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Stdout renderings of a compiled stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// A Python bytes literal
    Repr,
    /// The raw bytes
    Raw,
    /// Lowercase hex
    Hex,
    /// Standard base64
    Base64,
    /// Nothing
    None,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG still wins over the flag default.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    let source = match read_source(&cli) {
        Ok(Some(source)) => source,
        // No input and a terminal: interactive mode.
        Ok(None) => {
            return match repl::Repl::new(options_from(&cli)) {
                Ok(mut repl) => match repl.run() {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(err) => {
                        eprintln!("{}: {err}", "error".red().bold());
                        ExitCode::FAILURE
                    }
                },
                Err(err) => {
                    eprintln!("{}: {err}", "error".red().bold());
                    ExitCode::FAILURE
                }
            };
        }
        Err(err) => {
            eprintln!("{}: {err}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match compile_and_emit(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Collects the source text: `-c`, a file, or piped stdin. `None`
/// means no input was given and stdin is a terminal.
fn read_source(cli: &Cli) -> io::Result<Option<String>> {
    if let Some(code) = &cli.code {
        return Ok(Some(code.clone()));
    }
    if let Some(path) = &cli.file {
        return fs::read_to_string(path).map(Some);
    }
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut source = String::new();
    io::stdin().read_to_string(&mut source)?;
    Ok(Some(source))
}

fn options_from(cli: &Cli) -> Options {
    Options {
        protocol: cli.protocol,
        extended: cli.extended,
        lambdas: if cli.lambdas {
            LambdaMode::Python
        } else {
            LambdaMode::Disabled
        },
        optimize: cli.optimize,
    }
}

fn compile_and_emit(cli: &Cli, source: &str) -> Result<(), String> {
    let stream = compile_source(source, &options_from(cli))
        .map_err(|err| render_compile_error(&err, source))?;

    if cli.disassemble {
        let listing = disassemble(&stream)
            .map_err(|err| format!("{}: {err}", "stream error".red().bold()))?;
        print!("{listing}");
    }

    if let Some(path) = &cli.output {
        fs::write(path, &stream)
            .map_err(|err| format!("{}: {}: {err}", "error".red().bold(), path.display()))?;
    }

    if cli.run {
        let mut machine = Machine::new();
        let value = machine
            .run(&stream)
            .map_err(|err| format!("{}: {err}", "load error".red().bold()))?;
        print!("{}", machine.take_output());
        println!("{value}");
    }

    // A stream consumed some other way is not echoed unless asked for.
    let format = cli.format.unwrap_or(
        if cli.run || cli.disassemble || cli.output.is_some() {
            Format::None
        } else {
            Format::Repr
        },
    );
    emit(format, &stream).map_err(|err| format!("{}: {err}", "error".red().bold()))
}

fn emit(format: Format, stream: &[u8]) -> io::Result<()> {
    match format {
        Format::Repr => println!("{}", cornichon_core::pyrepr::bytes_repr(stream)),
        Format::Raw => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(stream)?;
            stdout.flush()?;
        }
        Format::Hex => println!("{}", hex::encode(stream)),
        Format::Base64 => println!(
            "{}",
            base64::Engine::encode(&base64::prelude::BASE64_STANDARD, stream)
        ),
        Format::None => {}
    }
    Ok(())
}

/// One compile error, rendered the way the REPL shows it: the source
/// line, a caret span, and the message.
fn render_compile_error(err: &cornichon_core::CompileError, source: &str) -> String {
    let rendered = err.render(source);
    match rendered.rsplit_once('\n') {
        Some((context, message)) => {
            format!("{}\n{}", context.dimmed(), message.red().bold())
        }
        None => rendered.red().bold().to_string(),
    }
}
