//! Operator console.
//!
//! Reads one command per line and forwards it to the session.

use presence_proto::Status;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::PresenceError;
use crate::gateway::{PublishOutcome, SessionHandle, SessionSnapshot};

const HELP: &str = "commands: online | idle | dnd | invisible | custom <text> | status | help | exit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Change the status.
    SetStatus(Status),
    /// Change the custom status text.
    SetCustomStatus(String),
    /// Print the session snapshot.
    Status,
    /// Print the command list.
    Help,
    /// Shut down.
    Exit,
    /// Blank line.
    Empty,
    /// Anything else.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one line of input.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));

        match word.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "custom" if !rest.is_empty() => Self::SetCustomStatus(rest.to_string()),
            "status" if rest.is_empty() => Self::Status,
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            other if rest.is_empty() => other
                .parse::<Status>()
                .map_or_else(|_| Self::Unknown(line.to_string()), Self::SetStatus),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn describe(snapshot: &SessionSnapshot) -> String {
    format!(
        "phase={} status={} custom=\"{}\" seq={} session={} attempts={}",
        snapshot.phase,
        snapshot.status,
        snapshot.custom_text,
        snapshot
            .sequence
            .map_or_else(|| "-".to_string(), |s| s.to_string()),
        snapshot.session_id.as_deref().unwrap_or("-"),
        snapshot.reconnect_attempts,
    )
}

fn outcome_line(outcome: PublishOutcome) -> &'static str {
    match outcome {
        PublishOutcome::Sent => "presence updated",
        PublishOutcome::Skipped => "not connected, presence will apply on the next connect",
    }
}

/// Print the command list, then run the console until `exit` or end of
/// input.
///
/// End of input only stops the console; the session keeps running.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn run_console<R, W>(
    handle: SessionHandle,
    input: R,
    mut output: W,
) -> Result<(), PresenceError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    output.write_all(HELP.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let command = ConsoleCommand::parse(&line);
        debug!(?command, "console command");

        let reply = match command {
            ConsoleCommand::SetStatus(status) => match handle.set_presence(status).await {
                Ok(outcome) => outcome_line(outcome).to_string(),
                Err(e) => e.to_string(),
            },
            ConsoleCommand::SetCustomStatus(text) => {
                match handle.set_custom_status(text).await {
                    Ok(outcome) => outcome_line(outcome).to_string(),
                    Err(e) => e.to_string(),
                }
            }
            ConsoleCommand::Status => match handle.snapshot().await {
                Ok(snapshot) => describe(&snapshot),
                Err(e) => e.to_string(),
            },
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Exit => {
                handle.shutdown().await;
                return Ok(());
            }
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Unknown(input) => format!("unknown command '{input}', try 'help'"),
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    debug!("console input closed");
    Ok(())
}
