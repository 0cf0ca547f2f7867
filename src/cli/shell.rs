//! Interactive operator shell
//!
//! rustyline blocks, so the editor lives on its own thread and hands lines
//! to the async side one at a time. Each line is acknowledged after the
//! command ran so output lands before the next prompt.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::coordination::ShutdownSignal;
use crate::dispatch::{Dispatcher, OperatorCommand, Reply};
use crate::error::FleetError;

const PROMPT: &str = "botmgr > ";

enum ShellInput {
    Line(String, oneshot::Sender<()>),
    Closed,
    Failed(String),
}

/// Run the shell until `exit`, EOF, Ctrl-C or a shutdown signal
pub async fn run(
    dispatcher: Dispatcher,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = mpsc::channel(1);
    std::thread::Builder::new()
        .name("operator-shell".into())
        .spawn(move || read_lines(line_tx))?;

    println!("Type 'help' for available commands, 'exit' to quit.");

    loop {
        tokio::select! {
            input = line_rx.recv() => match input {
                Some(ShellInput::Line(line, ack)) => {
                    let exit = handle_line(&dispatcher, &line).await;
                    let _ = ack.send(());
                    if exit {
                        break;
                    }
                }
                Some(ShellInput::Failed(e)) => {
                    dispatcher.request_exit();
                    anyhow::bail!("operator shell failed: {e}");
                }
                Some(ShellInput::Closed) | None => {
                    debug!("operator shell closed");
                    dispatcher.request_exit();
                    break;
                }
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    Ok(())
}

/// Returns true when the shell should close
async fn handle_line(dispatcher: &Dispatcher, line: &str) -> bool {
    let command = match OperatorCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return false,
        Err(e) => {
            eprintln!("{e}");
            return false;
        }
    };

    match dispatcher.execute(command).await {
        Ok(Reply::Done) => false,
        Ok(Reply::Print(text)) => {
            println!("{text}");
            false
        }
        Ok(Reply::Exit) => true,
        Err(e) => {
            warn!(error = %e, "operator command failed");
            // the orchestrator loop is gone
            matches!(e, FleetError::ChannelClosed(_))
        }
    }
}

fn read_lines(line_tx: mpsc::Sender<ShellInput>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            let _ = line_tx.blocking_send(ShellInput::Failed(e.to_string()));
            return;
        }
    };

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());

                let (ack_tx, ack_rx) = oneshot::channel();
                if line_tx.blocking_send(ShellInput::Line(line, ack_tx)).is_err() {
                    return;
                }
                if ack_rx.blocking_recv().is_err() {
                    return;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                let _ = line_tx.blocking_send(ShellInput::Closed);
                return;
            }
            Err(e) => {
                let _ = line_tx.blocking_send(ShellInput::Failed(e.to_string()));
                return;
            }
        }
    }
}
