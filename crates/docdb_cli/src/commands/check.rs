//! Check command implementation.

use super::CliError;
use docdb_batch::{parse_commands, BatchCommand, Command};
use serde::Serialize;
use std::path::Path;

/// Summary of one parsed command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandSummary {
    /// Wire type.
    #[serde(rename = "Type")]
    pub kind: String,
    /// Document key or prefix.
    pub key: String,
    /// Whether the command carries an expected etag.
    pub has_etag: bool,
    /// Whether the command consumes an attachment stream.
    pub needs_stream: bool,
}

impl From<&Command> for CommandSummary {
    fn from(command: &Command) -> Self {
        let has_etag = match command {
            Command::Put { etag, .. }
            | Command::Patch { etag, .. }
            | Command::Delete { etag, .. }
            | Command::AttachmentPut { etag, .. } => etag.is_some(),
            Command::DeletePrefix { .. } => false,
        };
        Self {
            kind: command.command_type().to_string(),
            key: command.key().to_string(),
            has_etag,
            needs_stream: command.needs_attachment_stream(),
        }
    }
}

/// Runs the check command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let body = std::fs::read(path)?;
    let commands = parse_commands(&body)?;
    let batch = BatchCommand::new(commands);

    match format {
        "json" => {
            let summary: Vec<CommandSummary> =
                batch.commands().iter().map(CommandSummary::from).collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print!("{batch}");
            let streams = batch
                .commands()
                .iter()
                .filter(|c| c.needs_attachment_stream())
                .count();
            if streams > 0 {
                println!("Expects {streams} attachment stream(s).");
            }
        }
    }

    Ok(())
}
