//! Command handlers for CLI
//!
//! This module implements all `/` commands for the Graph Studio CLI.
//! Anything without a `/` prefix is executed as a TypeQL statement.

use crate::catalog::RefreshOutcome;
use crate::error::{Result, StudioError};
use crate::history::HistoryStatus;
use crate::notify::NotificationLevel;
use crate::studio::Studio;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use uuid::Uuid;

/// Command types
#[derive(Debug, Clone, PartialEq)]
pub enum CommandType {
    /// Connect to the embedded engine
    ConnectEmbedded { database: Option<String> },
    /// Connect to a remote server; the address falls back to the config
    ConnectRemote {
        address: Option<String>,
        username: String,
        password: String,
    },
    /// Disconnect from the current engine
    Disconnect,
    /// Show session status
    Status,
    /// List databases; `retry` skips the backoff window
    Databases { retry: bool },
    /// Create a database
    Create { name: String },
    /// Select the active database
    Use { name: String },
    /// Show the schema; `sync` refetches it first
    Schema { sync: bool },
    /// Show or clear query history
    History { clear: bool },
    /// Show or dismiss notifications
    Notifications { dismiss: Option<Uuid> },
    /// Show help message
    Help,
    /// Exit the application
    Quit,
    /// TypeQL statement
    Query { text: String },
}

/// Parsed command
#[derive(Debug, Clone)]
pub struct Command {
    /// The type of command
    pub command_type: CommandType,
}

fn syntax(command: &str, expected: &str) -> StudioError {
    StudioError::InvalidCommandSyntax {
        command: command.to_string(),
        expected: expected.to_string(),
    }
}

impl Command {
    /// Parse a command from user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if !input.starts_with('/') {
            return Ok(Command {
                command_type: CommandType::Query {
                    text: input.to_string(),
                },
            });
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts[0];
        let args = &parts[1..];

        let command_type = match cmd {
            "/connect" => match args {
                ["embedded"] => CommandType::ConnectEmbedded { database: None },
                ["embedded", database] => CommandType::ConnectEmbedded {
                    database: Some(database.to_string()),
                },
                ["remote", username, password] => CommandType::ConnectRemote {
                    address: None,
                    username: username.to_string(),
                    password: password.to_string(),
                },
                ["remote", address, username, password] => CommandType::ConnectRemote {
                    address: Some(address.to_string()),
                    username: username.to_string(),
                    password: password.to_string(),
                },
                _ => {
                    return Err(syntax(
                        cmd,
                        "/connect embedded [database] | /connect remote [address] <username> <password>",
                    ))
                }
            },
            "/disconnect" => CommandType::Disconnect,
            "/status" => CommandType::Status,
            "/databases" => match args {
                [] => CommandType::Databases { retry: false },
                ["retry"] => CommandType::Databases { retry: true },
                _ => return Err(syntax(cmd, "/databases [retry]")),
            },
            "/create" => match args {
                [name] => CommandType::Create {
                    name: name.to_string(),
                },
                _ => return Err(syntax(cmd, "/create <database>")),
            },
            "/use" => match args {
                [name] => CommandType::Use {
                    name: name.to_string(),
                },
                _ => return Err(syntax(cmd, "/use <database>")),
            },
            "/schema" => match args {
                [] => CommandType::Schema { sync: false },
                ["sync"] => CommandType::Schema { sync: true },
                _ => return Err(syntax(cmd, "/schema [sync]")),
            },
            "/history" => match args {
                [] => CommandType::History { clear: false },
                ["clear"] => CommandType::History { clear: true },
                _ => return Err(syntax(cmd, "/history [clear]")),
            },
            "/notifications" => match args {
                [] => CommandType::Notifications { dismiss: None },
                ["dismiss", id] => {
                    let id = Uuid::parse_str(id)
                        .map_err(|_| syntax(cmd, "/notifications dismiss <id>"))?;
                    CommandType::Notifications { dismiss: Some(id) }
                }
                _ => return Err(syntax(cmd, "/notifications [dismiss <id>]")),
            },
            "/help" => CommandType::Help,
            "/quit" | "/exit" => CommandType::Quit,
            _ => return Err(StudioError::UnknownCommand(cmd.to_string())),
        };

        Ok(Command { command_type })
    }
}

/// Render rows as a table
fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(columns.to_vec());
    for row in rows {
        table.add_row(row.clone());
    }
    table.to_string()
}

/// Handle a command and return the result message
pub async fn handle_command(studio: &Studio, command: &Command) -> Result<String> {
    match &command.command_type {
        CommandType::ConnectEmbedded { database } => {
            studio.connect_embedded(database.as_deref()).await?;
            let state = studio.snapshot().await;
            Ok(format!(
                "✓ Connected to embedded engine (database: {})",
                state.session.active_database().unwrap_or("none")
            ))
        }
        CommandType::ConnectRemote {
            address,
            username,
            password,
        } => {
            let address = address
                .as_deref()
                .or_else(|| studio.remote_address())
                .ok_or_else(|| {
                    syntax("/connect", "/connect remote <address> <username> <password>")
                })?
                .to_string();
            studio.connect_remote(&address, username, password).await?;
            Ok(format!("✓ Connected to {} as {}", address, username))
        }
        CommandType::Disconnect => {
            studio.disconnect().await?;
            Ok("✓ Disconnected".to_string())
        }
        CommandType::Status => {
            let state = studio.snapshot().await;
            let session = &state.session;
            let mut out = format!("Status: {}\n", session.status());
            out.push_str(&format!("Mode: {}\n", session.mode));
            if let Some(address) = &session.address {
                out.push_str(&format!("Address: {}\n", address));
            }
            if let Some(username) = &session.username {
                out.push_str(&format!("User: {}\n", username));
            }
            out.push_str(&format!(
                "Database: {}\n",
                session.active_database().unwrap_or("none")
            ));
            if let Some(server) = &session.saved_server_ref {
                out.push_str(&format!("Server: {}\n", server));
            }
            if let Some(since) = session.connected_at {
                out.push_str(&format!("Connected since: {}\n", since.to_rfc3339()));
            }
            Ok(out.trim_end().to_string())
        }
        CommandType::Databases { retry } => {
            let outcome = studio.refresh_databases(*retry).await;
            let state = studio.snapshot().await;
            let catalog = &state.catalog;

            let mut out = match outcome {
                RefreshOutcome::NotConnected => return Err(StudioError::NotConnected),
                RefreshOutcome::Failed(message) => format!("⚠ {}\n", message),
                RefreshOutcome::BackedOff => match catalog.next_allowed_refresh_at {
                    Some(at) => format!(
                        "Refresh backed off until {} (use /databases retry)\n",
                        at.to_rfc3339()
                    ),
                    None => String::new(),
                },
                _ => String::new(),
            };

            if catalog.databases.is_empty() {
                out.push_str("No databases");
            } else {
                let active = state.session.active_database();
                let rows: Vec<Vec<String>> = catalog
                    .databases
                    .iter()
                    .map(|d| {
                        let marker = if Some(d.name.as_str()) == active { "*" } else { "" };
                        vec![marker.to_string(), d.name.clone()]
                    })
                    .collect();
                out.push_str(&render_table(&["".to_string(), "Database".to_string()], &rows));
            }
            Ok(out)
        }
        CommandType::Create { name } => {
            studio.create_database(name).await?;
            Ok(format!("✓ Created database: {}", name))
        }
        CommandType::Use { name } => {
            studio.select_database(name).await?;
            Ok(format!("✓ Using database: {}", name))
        }
        CommandType::Schema { sync } => {
            if *sync && !studio.sync_schema().await {
                return Ok("⚠ Schema sync failed; see log for details".to_string());
            }
            let state = studio.snapshot().await;
            if state.schema.is_empty() {
                Ok("No schema loaded".to_string())
            } else {
                Ok(state.schema.format_tree())
            }
        }
        CommandType::History { clear } => {
            if *clear {
                studio.clear_history().await;
                return Ok("✓ History cleared".to_string());
            }
            let entries = studio.history().await;
            if entries.is_empty() {
                return Ok("No queries executed yet".to_string());
            }
            let columns: Vec<String> = ["Executed", "Database", "Status", "Time (ms)", "Rows", "Query"]
                .iter()
                .map(|c| c.to_string())
                .collect();
            let rows: Vec<Vec<String>> = entries
                .iter()
                .map(|e| {
                    let status = match e.status {
                        HistoryStatus::Success => "ok".to_string(),
                        HistoryStatus::Error => {
                            format!("error: {}", e.error_message.as_deref().unwrap_or(""))
                        }
                    };
                    vec![
                        e.executed_at.format("%H:%M:%S").to_string(),
                        e.database_name.clone(),
                        status,
                        e.duration_ms.to_string(),
                        e.row_count.to_string(),
                        e.query_text.clone(),
                    ]
                })
                .collect();
            Ok(render_table(&columns, &rows))
        }
        CommandType::Notifications { dismiss } => {
            if let Some(id) = dismiss {
                return if studio.dismiss(*id).await {
                    Ok("✓ Notification dismissed".to_string())
                } else {
                    Ok(format!("No notification with id {}", id))
                };
            }
            let notifications = studio.notifications().await;
            if notifications.is_empty() {
                return Ok("No notifications".to_string());
            }
            let lines: Vec<String> = notifications
                .iter()
                .map(|n| {
                    let icon = match n.level {
                        NotificationLevel::Success => "✓",
                        NotificationLevel::Info => "i",
                        NotificationLevel::Warning => "⚠",
                        NotificationLevel::Error => "✗",
                    };
                    format!("{} {} [{}]", icon, n.message, n.id)
                })
                .collect();
            Ok(lines.join("\n"))
        }
        CommandType::Help => {
            let help = r#"
Graph Studio Commands

Connection:
  /connect embedded [database]                  Start the in-process engine
  /connect remote [address] <user> <password>   Sign in to a remote server
  /disconnect                                   Close the connection
  /status                                       Show the session

Databases:
  /databases [retry]   List databases (retry ignores the backoff window)
  /create <name>       Create a database
  /use <name>          Select the active database
  /schema [sync]       Show the schema of the active database

Session:
  /history [clear]                 Show or clear query history
  /notifications [dismiss <id>]    Show or dismiss notifications
  /help                            Show this help message
  /quit, /exit                     Exit Graph Studio

Queries:
  Any text without a / prefix is executed as TypeQL against the active database.

Examples:
  /connect embedded social
  define attribute name value string; entity person, owns name;
  insert $p isa person, has name "Alice";
  match $p isa person, has name $n; fetch { "name": $n };
"#;
            Ok(help.to_string())
        }
        CommandType::Quit => Ok("Goodbye!".to_string()),
        CommandType::Query { text } => {
            let outcome = studio.execute(text, None).await;
            if !outcome.success {
                return Err(StudioError::query(outcome.message));
            }

            let state = studio.snapshot().await;
            let slot = &state.query;
            let mut out = String::new();
            if !outcome.stale && !slot.table_columns.is_empty() && !slot.table_rows.is_empty() {
                out.push_str(&render_table(&slot.table_columns, &slot.table_rows));
                out.push('\n');
            }
            out.push_str(&format!("{} ({} ms)", outcome.message, outcome.duration_ms));
            Ok(out)
        }
    }
}

/// Format an error for display
pub fn format_error(error: &StudioError) -> String {
    format!("Error: {}", error)
}
