//! REPL implementation
//!
//! This module implements the interactive Read-Eval-Print Loop for Graph Studio.

use crate::cli::commands::{self, format_error, Command};
use crate::error::{Result, StudioError};
use crate::studio::Studio;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::Context;
use rustyline::Helper;
use rustyline::{CompletionType, Config, Editor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const COMMANDS: &[&str] = &[
    "/connect",
    "/disconnect",
    "/status",
    "/databases",
    "/create",
    "/use",
    "/schema",
    "/history",
    "/notifications",
    "/help",
    "/quit",
    "/exit",
];

/// Graph Studio command completer
struct StudioCompleter;

impl Completer for StudioCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &Context<'_>,
    ) -> std::result::Result<(usize, Vec<String>), ReadlineError> {
        if line.starts_with('/') && !line.contains(' ') {
            let matches: Vec<String> = COMMANDS
                .iter()
                .filter(|cmd| cmd.starts_with(line))
                .map(|s| s.to_string())
                .collect();
            Ok((0, matches))
        } else {
            Ok((0, vec![]))
        }
    }
}

impl Hinter for StudioCompleter {
    type Hint = String;
}

impl Highlighter for StudioCompleter {}

impl Validator for StudioCompleter {}

impl Helper for StudioCompleter {}

/// Graph Studio REPL
pub struct Repl {
    /// The rustyline editor
    editor: Editor<StudioCompleter, DefaultHistory>,
    /// Whether the REPL should continue running
    running: bool,
    /// Where line history is kept between runs
    history_path: PathBuf,
    studio: Arc<Studio>,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(studio: Arc<Studio>) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .auto_add_history(true)
            .build();

        let mut editor = Editor::<StudioCompleter, DefaultHistory>::with_config(config)
            .map_err(|e| {
                StudioError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to initialize editor: {}", e),
                ))
            })?;

        editor.set_helper(Some(StudioCompleter));

        let history_path = dirs::home_dir()
            .map(|p| p.join(".graph-studio").join("history"))
            .unwrap_or_else(|| ".graph-studio-history".into());

        if let Err(e) = editor.load_history(&history_path) {
            // History file doesn't exist yet
            debug!(error = %e, "Could not load line history");
        }

        Ok(Self {
            editor,
            running: true,
            history_path,
            studio,
        })
    }

    /// Run the REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        while self.running {
            let prompt = self.prompt().await;
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match Command::parse(line) {
                        Ok(command) => self.handle_command(command).await,
                        Err(e) => println!("{}", format_error(&e)),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    self.running = false;
                }
                Err(err) => {
                    println!("Error: {:?}", err);
                    self.running = false;
                }
            }
        }

        if let Some(parent) = self.history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = self.editor.save_history(&self.history_path) {
            debug!(error = %e, "Could not save line history");
        }

        Ok(())
    }

    /// Prompt showing the active database
    async fn prompt(&self) -> String {
        let state = self.studio.snapshot().await;
        match state.session.active_database() {
            Some(database) => format!("{}> ", database),
            None => format!("({})> ", state.session.status()),
        }
    }

    fn print_welcome(&self) {
        println!();
        println!("Graph Studio v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Type /help for available commands, or a TypeQL statement to run it.");
        println!();
    }

    /// Handle a command
    async fn handle_command(&mut self, command: Command) {
        if command.command_type == commands::CommandType::Quit {
            self.running = false;
        }
        match commands::handle_command(&self.studio, &command).await {
            Ok(msg) => println!("{}", msg),
            Err(e) => println!("{}", format_error(&e)),
        }
    }
}
