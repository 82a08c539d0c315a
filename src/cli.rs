use crate::commands::AppState;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

/// How long `process` waits for a notification before re-reading statuses.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "mismatch-scanner")]
#[command(about = "Extract identity fields from scanned documents and flag date mismatches against a client roster")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the client roster
    Roster {
        #[command(subcommand)]
        action: RosterCommand,
    },
    /// Upload documents and follow their status until each is processed
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show a document's processing status
    Status { id: i64 },
    /// List documents, newest first
    List,
    /// Show extracted patient name, DOB and DOA
    Fields { id: i64 },
    /// Show the roster match and per-field status
    Matches { id: i64 },
    /// Document and match counts
    Stats,
    /// Write the Excel review report for a document
    Export {
        id: i64,
        /// Output path (defaults to the exports folder)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete all documents and results (the roster is kept)
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Report whether Document AI credentials are configured
    OcrStatus,
}

#[derive(Subcommand)]
pub enum RosterCommand {
    /// Import a CSV or Excel roster
    Import { file: PathBuf },
    /// List roster entries
    List,
}

pub fn execute(state: &AppState, command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Roster { action } => match action {
            RosterCommand::Import { file } => print_json(&state.upload_roster(&file)?),
            RosterCommand::List => print_json(&state.list_roster()?),
        },
        Commands::Process { files } => {
            let updates = state.notifier.subscribe();
            let mut ids = Vec::new();
            for file in &files {
                match state.upload_document(file) {
                    Ok(view) => ids.push(view.document_id),
                    Err(e) => eprintln!("{}: {}", file.display(), e),
                }
            }
            let mut waiting: HashSet<i64> = ids.iter().copied().collect();
            while !waiting.is_empty() {
                match updates.recv_timeout(STATUS_POLL_INTERVAL) {
                    Ok(u) => {
                        eprintln!("[{}] {}: {}", u.document_id, u.status, u.message);
                        if u.status.is_terminal() {
                            waiting.remove(&u.document_id);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        // catch documents whose final update was missed
                        let mut done = Vec::new();
                        for &id in &waiting {
                            if state.get_document_status(id)?.status.is_terminal() {
                                done.push(id);
                            }
                        }
                        for id in done {
                            waiting.remove(&id);
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let statuses = ids
                .into_iter()
                .map(|id| state.get_document_status(id))
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&statuses)
        }
        Commands::Status { id } => print_json(&state.get_document_status(id)?),
        Commands::List => print_json(&state.list_documents()?),
        Commands::Fields { id } => print_json(&state.get_extracted_fields(id)?),
        Commands::Matches { id } => print_json(&state.get_match_info(id)?),
        Commands::Stats => print_json(&state.get_stats()?),
        Commands::Export { id, out } => {
            let path = state.export_report(id, out.as_deref())?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Purge { yes } => {
            if !yes {
                return Err(AppError::Validation(
                    "Purge deletes every document and result. Re-run with --yes.".to_string(),
                ));
            }
            println!("Deleted {} documents", state.purge_documents()?);
            Ok(())
        }
        Commands::OcrStatus => {
            println!("{}", state.ocr_status());
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
