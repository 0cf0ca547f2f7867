//! Operator command parsing and dispatch
//!
//! One shell line becomes one `OperatorCommand`; the `Dispatcher` turns it
//! into orchestrator commands. Parse failures are returned to the shell for
//! printing and never reach the fleet.

use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::coordination::{GracefulShutdown, ShutdownSignal};
use crate::error::Result;
use crate::orchestrator::{AgentTarget, FleetSnapshot, OrchestratorHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start(AgentTarget),
    Stop(AgentTarget),
    Auth { index: usize, code: String },
    Send { index: usize, command: String },
    Status,
    Help,
    Exit,
}

#[derive(Parser)]
#[command(name = "botmgr", no_binary_name = true, disable_help_subcommand = true)]
struct ShellCli {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    /// Start agents by index or username
    Start { target: String },
    /// Stop agents by index or username
    Stop { target: String },
    /// Inject an authentication code into an agent
    Auth { index: usize, code: String },
    /// Forward a command to a running agent
    Send {
        index: usize,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the fleet status
    Status,
}

impl OperatorCommand {
    /// Parse one shell line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, clap::Error> {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "help" | "?" => return Ok(Some(OperatorCommand::Help)),
            "exit" | "quit" => return Ok(Some(OperatorCommand::Exit)),
            _ => {}
        }

        let parsed = ShellCli::try_parse_from(line.split_whitespace())?;
        let command = match parsed.command {
            ShellCommand::Start { target } => OperatorCommand::Start(AgentTarget::parse(&target)),
            ShellCommand::Stop { target } => OperatorCommand::Stop(AgentTarget::parse(&target)),
            ShellCommand::Auth { index, code } => OperatorCommand::Auth { index, code },
            ShellCommand::Send { index, command } => OperatorCommand::Send {
                index,
                command: command.join(" "),
            },
            ShellCommand::Status => OperatorCommand::Status,
        };
        Ok(Some(command))
    }
}

/// What the shell should do after a command ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Print(String),
    Exit,
}

/// Executes operator commands against the fleet
#[derive(Clone)]
pub struct Dispatcher {
    fleet: OrchestratorHandle,
    shutdown: Arc<GracefulShutdown>,
}

impl Dispatcher {
    pub fn new(fleet: OrchestratorHandle, shutdown: Arc<GracefulShutdown>) -> Self {
        Self { fleet, shutdown }
    }

    pub async fn execute(&self, command: OperatorCommand) -> Result<Reply> {
        match command {
            OperatorCommand::Start(target) => self.fleet.start(target).await?,
            OperatorCommand::Stop(target) => self.fleet.stop(target).await?,
            OperatorCommand::Auth { index, code } => self.fleet.authenticate(index, code).await?,
            OperatorCommand::Send { index, command } => {
                self.fleet.send_command(index, command).await?
            }
            OperatorCommand::Status => {
                let snapshot = self.fleet.snapshot().await?;
                return Ok(Reply::Print(render_status(&snapshot)));
            }
            OperatorCommand::Help => return Ok(Reply::Print(help_text())),
            OperatorCommand::Exit => {
                self.request_exit();
                return Ok(Reply::Exit);
            }
        }
        Ok(Reply::Done)
    }

    /// Ask for a graceful shutdown unless one is already under way
    pub fn request_exit(&self) {
        if !self.shutdown.is_shutdown_requested() {
            self.shutdown.request_shutdown(ShutdownSignal::Graceful);
        }
    }
}

pub fn help_text() -> String {
    [
        "Available commands:",
        "  start <index|name>     start an agent",
        "  stop <index|name>      stop an agent",
        "  auth <index> <code>    inject an authentication code",
        "  send <index> <command> forward a command to a running agent",
        "  status                 show the fleet",
        "  help                   this message",
        "  exit                   stop every agent and quit",
    ]
    .join("\n")
}

pub fn render_status(snapshot: &FleetSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "phase: {}  running: {}/{}  approved: {}",
        snapshot.phase,
        snapshot.running_count(),
        snapshot.agents.len(),
        snapshot.approved_count
    );
    for agent in &snapshot.agents {
        let active = snapshot.active_collector == Some(agent.index)
            || snapshot.active_giver == Some(agent.index);
        let _ = writeln!(
            out,
            "  [{}] {:<20} {:<9} {:<7}{}",
            agent.index,
            agent.username,
            agent.role,
            agent.state,
            if active { "  (active)" } else { "" }
        );
    }
    let _ = write!(
        out,
        "collector pool: {:?}  giver pool: {:?}",
        snapshot.collector_pool, snapshot.giver_pool
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> OperatorCommand {
        OperatorCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_start_by_index_and_name() {
        assert_eq!(parse("start 2"), OperatorCommand::Start(AgentTarget::Index(2)));
        assert_eq!(
            parse("stop Giver1"),
            OperatorCommand::Stop(AgentTarget::Name("Giver1".into()))
        );
    }

    #[test]
    fn test_send_keeps_the_whole_command() {
        assert_eq!(
            parse("send 0 craft --all weapons"),
            OperatorCommand::Send {
                index: 0,
                command: "craft --all weapons".into()
            }
        );
    }

    #[test]
    fn test_auth() {
        assert_eq!(
            parse("auth 1 F7K2Q"),
            OperatorCommand::Auth {
                index: 1,
                code: "F7K2Q".into()
            }
        );
    }

    #[test]
    fn test_builtins_and_blank_lines() {
        assert_eq!(OperatorCommand::parse("   ").unwrap(), None);
        assert_eq!(parse("help"), OperatorCommand::Help);
        assert_eq!(parse("QUIT"), OperatorCommand::Exit);
        assert_eq!(parse("status"), OperatorCommand::Status);
    }

    #[test]
    fn test_bad_lines_are_parse_errors() {
        assert!(OperatorCommand::parse("dance").is_err());
        assert!(OperatorCommand::parse("auth x CODE").is_err());
        assert!(OperatorCommand::parse("send 1").is_err());
        assert!(OperatorCommand::parse("start").is_err());
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for command in ["start", "stop", "auth", "send", "status", "exit"] {
            assert!(help.contains(command), "missing {command}");
        }
    }
}
