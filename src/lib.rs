pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod excel;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod services;
pub mod types;

use clap::Parser;
use cli::{Cli, Commands};
use commands::AppState;
use config::Settings;
use error::AppError;

pub fn run() -> Result<(), AppError> {
    let settings = Settings::from_env();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::OcrStatus = cli.command {
        println!("{}", ocr::ocr_status(&settings.ocr));
        return Ok(());
    }

    let state = AppState::open(settings)?;
    let result = cli::execute(&state, cli.command);
    state.shutdown();
    result
}
