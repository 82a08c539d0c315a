//! Error types, one enum per concern.
//!
//! The pure core (normalizer, extractor, matcher, detector) never fails;
//! everything here belongs to the collaborators around it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("{0} not set in .env")]
    NotConfigured(&'static str),

    #[error("File not found.")]
    FileNotFound,

    #[error("Could not read file: {0}")]
    Read(std::io::Error),

    #[error("Check your internet connection and try again.")]
    Connection,

    #[error("Network error: {0}")]
    Network(String),

    #[error("OCR request failed ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Invalid OCR response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Unsupported roster file type: {0} (expected .csv, .xlsx or .xls)")]
    UnsupportedFile(String),

    #[error("No name column found. Columns: {0}")]
    MissingNameColumn(String),

    #[error("Roster file has no sheets")]
    NoSheets,

    #[error("No valid rows found. The roster needs at least one row with a name.")]
    NoRows,

    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Could not read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Excel error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Could not create export directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path characters.")]
    InvalidPath,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document {0} not found")]
    DocumentNotFound(i64),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Document {0} not found")]
    DocumentNotFound(i64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Roster import failed: {0}")]
    Roster(#[from] RosterError),

    #[error("Report export failed: {0}")]
    Report(#[from] ReportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
