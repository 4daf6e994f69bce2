// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive REPL (Read-Eval-Print Loop) for the cornichon compiler.

use cornichon_core::vm::Machine;
use cornichon_core::{Options, compile_source, disassemble, pyrepr};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Config, Editor, Helper};
use std::borrow::Cow;
use std::path::PathBuf;

/// REPL configuration constants
const HISTORY_FILE: &str = ".cornichon_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Proto,
    Dis,
    Run,
    Load,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        if !input.starts_with('.') {
            return None;
        }

        let parts: Vec<&str> = input[1..].splitn(2, char::is_whitespace).collect();
        let cmd = parts.first()?.to_lowercase();
        let arg = parts.get(1).copied();

        match cmd.as_str() {
            "help" | "h" | "?" => Some((ReplCommand::Help, arg)),
            "exit" | "quit" | "q" => Some((ReplCommand::Exit, arg)),
            "clear" | "cls" => Some((ReplCommand::Clear, arg)),
            "version" | "v" => Some((ReplCommand::Version, arg)),
            "proto" | "p" => Some((ReplCommand::Proto, arg)),
            "dis" | "d" => Some((ReplCommand::Dis, arg)),
            "run" | "r" => Some((ReplCommand::Run, arg)),
            "load" | "l" => Some((ReplCommand::Load, arg)),
            _ => None,
        }
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".proto <n>", "Switch the target pickle protocol (0-5)"),
            (".dis", "Toggle disassembly of each compiled line"),
            (".run", "Toggle execution on the reference loader"),
            (".load <file>", "Compile and run a source file"),
        ]
    }
}

/// Helper struct for rustyline that provides completion, hints, and validation
#[derive(Default)]
struct CornichonHelper {
    /// Keywords and built-in identifiers for completion
    keywords: Vec<String>,
}

impl CornichonHelper {
    fn new() -> Self {
        let keywords = vec![
            // Keywords
            "False",
            "None",
            "True",
            "and",
            "as",
            "from",
            "import",
            "in",
            "is",
            "lambda",
            "not",
            "or",
            // Stream macros
            "BUILD",
            "GLOBAL",
            "INST",
            "STACK_GLOBAL",
            // Built-ins resolvable in extended mode
            "abs",
            "all",
            "any",
            "bool",
            "bytearray",
            "bytes",
            "dict",
            "divmod",
            "filter",
            "float",
            "frozenset",
            "getattr",
            "int",
            "iter",
            "len",
            "list",
            "next",
            "print",
            "range",
            "repr",
            "set",
            "slice",
            "str",
            "tuple",
            // Common modules
            "builtins",
            "operator",
            "pickle",
            // The terminal-result name
            "RESULT",
            // REPL commands
            ".help",
            ".exit",
            ".clear",
            ".version",
            ".proto",
            ".dis",
            ".run",
            ".load",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self { keywords }
    }
}

impl Completer for CornichonHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Find the start of the current word
        let start = line[..pos]
            .rfind(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
            .map(|i| i + 1)
            .unwrap_or(0);

        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let matches: Vec<Pair> = self
            .keywords
            .iter()
            .filter(|kw| kw.starts_with(word))
            .map(|kw| Pair {
                display: kw.clone(),
                replacement: kw[word.len()..].to_string(),
            })
            .collect();

        Ok((pos, matches))
    }
}

impl Hinter for CornichonHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() {
            return None;
        }

        // Find the start of the current word
        let start = line
            .rfind(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
            .map(|i| i + 1)
            .unwrap_or(0);

        let word = &line[start..];
        if word.len() < 2 {
            return None;
        }

        // Find first matching keyword
        self.keywords
            .iter()
            .find(|kw| kw.starts_with(word) && kw.len() > word.len())
            .map(|kw| kw[word.len()..].to_string().dimmed().to_string())
    }
}

impl Highlighter for CornichonHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        // Basic syntax highlighting
        let mut result = String::with_capacity(line.len() * 2);
        let mut current_word = String::new();

        for c in line.chars() {
            if c.is_alphanumeric() || c == '_' {
                current_word.push(c);
            } else {
                if !current_word.is_empty() {
                    result.push_str(&highlight_word(&current_word));
                    current_word.clear();
                }
                // Color operators and punctuation
                let colored = match c {
                    '(' | ')' | '[' | ']' | '{' | '}' => c.to_string().yellow().to_string(),
                    '+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '@' | '&' | '|' | '^'
                    | '~' => c.to_string().cyan().to_string(),
                    '"' | '\'' => c.to_string().green().to_string(),
                    '.' if line.starts_with('.') => c.to_string().magenta().to_string(),
                    _ => c.to_string(),
                };
                result.push_str(&colored);
            }
        }

        if !current_word.is_empty() {
            result.push_str(&highlight_word(&current_word));
        }

        Cow::Owned(result)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn highlight_word(word: &str) -> String {
    const KEYWORDS: &[&str] = &[
        "and", "as", "from", "import", "in", "is", "lambda", "not", "or",
    ];

    const LITERALS: &[&str] = &["True", "False", "None", "Ellipsis"];

    const BUILTINS: &[&str] = &[
        "abs", "all", "any", "bool", "bytes", "dict", "filter", "float", "frozenset", "getattr",
        "int", "iter", "len", "list", "next", "print", "range", "repr", "set", "slice", "str",
        "tuple", "BUILD", "GLOBAL", "INST", "STACK_GLOBAL",
    ];

    if KEYWORDS.contains(&word) {
        word.magenta().bold().to_string()
    } else if LITERALS.contains(&word) {
        word.blue().to_string()
    } else if BUILTINS.contains(&word) {
        word.cyan().to_string()
    } else if word == "RESULT" {
        word.bright_yellow().bold().to_string()
    } else if word.chars().all(|c| c.is_ascii_digit() || c == '.') {
        word.yellow().to_string()
    } else {
        word.to_string()
    }
}

impl Validator for CornichonHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();

        // Check for balanced brackets/braces/parentheses
        if !is_balanced(input) {
            return Ok(ValidationResult::Incomplete);
        }

        // Check if line ends with something that expects more input
        let trimmed = input.trim_end();
        if trimmed.ends_with('\\')
            || trimmed.ends_with('+')
            || trimmed.ends_with('-')
            || trimmed.ends_with('*')
            || trimmed.ends_with('/')
            || trimmed.ends_with('=')
            || trimmed.ends_with(',')
            || trimmed.ends_with('(')
            || trimmed.ends_with('[')
            || trimmed.ends_with('{')
        {
            return Ok(ValidationResult::Incomplete);
        }

        Ok(ValidationResult::Valid(None))
    }
}

/// Check if brackets, braces, and parentheses are balanced
fn is_balanced(input: &str) -> bool {
    let mut stack = Vec::new();
    let mut in_string = None;
    let mut escape_next = false;

    for c in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string.is_some() {
            escape_next = true;
            continue;
        }

        match in_string {
            Some(quote) if c == quote => in_string = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => in_string = Some(c),
                '#' => break,
                '(' => stack.push(')'),
                '[' => stack.push(']'),
                '{' => stack.push('}'),
                ')' | ']' | '}' => {
                    if stack.pop() != Some(c) {
                        return true; // Unbalanced but we should let the parser handle the error
                    }
                }
                _ => {}
            },
        }
    }

    stack.is_empty() && in_string.is_none()
}

impl Helper for CornichonHelper {}

/// The interactive REPL for the cornichon compiler
pub struct Repl {
    options: Options,
    show_dis: bool,
    execute: bool,
    editor: Editor<CornichonHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(options: Options) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(CornichonHelper::new()));

        // Determine history file path
        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cornichon")
            .join(HISTORY_FILE);

        // Create parent directory if it doesn't exist
        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        // Load history
        let _ = editor.load_history(&history_path);

        // Unbound names would make the prompt nearly unusable, so a
        // session always resolves against the ambient built-ins.
        let options = Options {
            extended: true,
            ..options
        };

        Ok(Self {
            options,
            show_dis: false,
            execute: true,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = format!("{} ", "pkl>".bright_green().bold());

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        continue;
                    }

                    // Check for REPL commands
                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }

                    // Each line is compiled as a standalone program.
                    self.eval_and_print(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        // Save history
        let _ = self.editor.save_history(&self.history_path);

        self.print_goodbye();
        Ok(())
    }

    fn print_banner(&self) {
        let version = env!("CARGO_PKG_VERSION");
        println!();
        println!(
            "  {} {} {}",
            "cornichon".bright_green().bold(),
            "v".dimmed(),
            version.bright_yellow()
        );
        println!("  {}", "A Python-subset-to-pickle compiler".dimmed());
        println!();
        println!(
            "  {} {}{} {} {}",
            "Targeting protocol".dimmed(),
            self.options.protocol.bright_yellow(),
            ";".dimmed(),
            "join statements with".dimmed(),
            "';'".cyan()
        );
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn print_goodbye(&self) {
        println!();
        println!("{}", "Goodbye!".bright_green());
        println!();
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match cmd {
            ReplCommand::Help => {
                self.print_help();
                CommandResult::Continue
            }
            ReplCommand::Exit => CommandResult::Exit,
            ReplCommand::Clear => {
                print!("\x1B[2J\x1B[H");
                CommandResult::Continue
            }
            ReplCommand::Version => {
                self.print_version();
                CommandResult::Continue
            }
            ReplCommand::Proto => {
                match arg.map(str::trim).map(str::parse::<u8>) {
                    Some(Ok(n)) if n <= cornichon_core::HIGHEST_PROTOCOL => {
                        self.options.protocol = n;
                        println!("{} {}", "protocol".dimmed(), n.bright_yellow());
                    }
                    _ => {
                        eprintln!(
                            "{}: {} {}",
                            "Error".red().bold(),
                            ".proto".cyan(),
                            "takes a protocol number between 0 and 5".dimmed()
                        );
                    }
                }
                CommandResult::Continue
            }
            ReplCommand::Dis => {
                self.show_dis = !self.show_dis;
                println!(
                    "{} {}",
                    "disassembly".dimmed(),
                    (if self.show_dis { "on" } else { "off" }).bright_yellow()
                );
                CommandResult::Continue
            }
            ReplCommand::Run => {
                self.execute = !self.execute;
                println!(
                    "{} {}",
                    "execution".dimmed(),
                    (if self.execute { "on" } else { "off" }).bright_yellow()
                );
                CommandResult::Continue
            }
            ReplCommand::Load => {
                if let Some(path) = arg {
                    self.load_file(path);
                } else {
                    eprintln!(
                        "{}: {} {}",
                        "Error".red().bold(),
                        ".load".cyan(),
                        "requires a file path".dimmed()
                    );
                }
                CommandResult::Continue
            }
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        println!();

        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:16} {}", cmd.cyan(), desc.dimmed());
        }

        println!();
        println!("{}", "Keyboard Shortcuts:".white().bold());
        println!();
        println!(
            "  {:16} {}",
            "Ctrl+C".yellow(),
            "Cancel current input".dimmed()
        );
        println!("  {:16} {}", "Ctrl+D".yellow(), "Exit REPL".dimmed());
        println!("  {:16} {}", "Ctrl+L".yellow(), "Clear screen".dimmed());
        println!("  {:16} {}", "Tab".yellow(), "Autocomplete".dimmed());
        println!("  {:16} {}", "↑/↓".yellow(), "Navigate history".dimmed());
        println!();
    }

    fn print_version(&self) {
        let version = env!("CARGO_PKG_VERSION");
        println!();
        println!(
            "{}: {}",
            "cornichon".bright_green().bold(),
            version.yellow()
        );
        println!(
            "{}: {}",
            "highest protocol".dimmed(),
            cornichon_core::HIGHEST_PROTOCOL
        );
        println!();
    }

    fn load_file(&mut self, path: &str) {
        match std::fs::read_to_string(path.trim()) {
            Ok(source) => self.eval_and_print(&source),
            Err(err) => {
                eprintln!("{}: {}: {err}", "Error".red().bold(), path.trim());
            }
        }
    }

    fn eval_and_print(&mut self, source: &str) {
        let stream = match compile_source(source, &self.options) {
            Ok(stream) => stream,
            Err(err) => {
                print_error(&err.render(source));
                return;
            }
        };

        if self.show_dis {
            match disassemble(&stream) {
                Ok(listing) => print!("{}", listing.dimmed()),
                Err(err) => eprintln!("{}: {err}", "Error".red().bold()),
            }
        }

        if self.execute {
            let mut machine = Machine::new();
            match machine.run(&stream) {
                Ok(value) => {
                    print!("{}", machine.take_output());
                    println!("{}", value.to_string().bright_yellow());
                }
                Err(err) => eprintln!("{}: {err}", "Error".red().bold()),
            }
        } else {
            println!("{}", pyrepr::bytes_repr(&stream).green());
        }
    }
}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

/// Print a rendered compile diagnostic, coloring the trailing message line
fn print_error(rendered: &str) {
    match rendered.rsplit_once('\n') {
        Some((context, message)) => {
            eprintln!("{}\n{}", context.dimmed(), message.red().bold());
        }
        None => eprintln!("{}", rendered.red().bold()),
    }
}
