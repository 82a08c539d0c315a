use crate::db::Db;
use crate::error::RosterError;
use crate::normalize::parse_fuzzy_date;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

const NAME_COLUMNS: &[&str] = &[
    "name",
    "client_name",
    "patient_name",
    "full_name",
    "clientname",
    "patientname",
    "fullname",
];
const DOB_COLUMNS: &[&str] = &["dob", "date_of_birth", "birth_date", "birthdate", "dateofbirth"];
const DOA_COLUMNS: &[&str] = &["doa", "date_of_accident", "accident_date", "incident_date", "dateofaccident"];
const BLANK_NAMES: &[&str] = &["nan", "none", "null"];

/// Highest serial Excel can represent (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// One roster row ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRow {
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub date_of_accident: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total_rows: usize,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => parse_fuzzy_date(s),
            Cell::Number(n) => excel_serial_to_date(*n),
        }
    }
}

/// Import a roster file, skipping names already on the roster.
pub fn import_roster(db: &Db, path: &Path) -> Result<ImportSummary, RosterError> {
    let rows = read_roster_file(path)?;
    let mut seen = db.roster_names()?;
    let fresh: Vec<RosterRow> = rows
        .iter()
        .filter(|row| seen.insert(row.name.to_lowercase()))
        .cloned()
        .collect();
    let inserted = db.insert_roster_rows(&fresh)?;
    let summary = ImportSummary {
        total_rows: rows.len(),
        inserted,
        skipped: rows.len() - inserted,
    };
    tracing::info!(
        path = %path.display(),
        total = summary.total_rows,
        inserted = summary.inserted,
        skipped = summary.skipped,
        "roster imported"
    );
    Ok(summary)
}

/// Parse and clean a roster file without touching the store.
pub fn read_roster_file(path: &Path) -> Result<Vec<RosterRow>, RosterError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let table = match ext.as_str() {
        "csv" => read_csv(path)?,
        "xlsx" | "xls" => read_workbook(path)?,
        _ => return Err(RosterError::UnsupportedFile(path.display().to_string())),
    };
    rows_from_table(table)
}

fn read_csv(path: &Path) -> Result<Vec<Vec<Cell>>, RosterError> {
    let bytes = std::fs::read(path).map_err(csv::Error::from)?;
    // Exports from older spreadsheet tools are often Latin-1.
    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut table = Vec::new();
    for record in reader.records() {
        let record = record?;
        table.push(
            record
                .iter()
                .map(|s| if s.trim().is_empty() { Cell::Empty } else { Cell::Text(s.to_string()) })
                .collect(),
        );
    }
    Ok(table)
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<Cell>>, RosterError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| RosterError::Spreadsheet(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(RosterError::NoSheets)?
        .map_err(|e| RosterError::Spreadsheet(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|c| match c {
                    Data::String(s) | Data::DateTimeIso(s) if !s.trim().is_empty() => Cell::Text(s.clone()),
                    Data::Float(f) => Cell::Number(*f),
                    Data::Int(i) => Cell::Number(*i as f64),
                    Data::DateTime(dt) => Cell::Number(dt.as_f64()),
                    Data::Bool(b) => Cell::Text(b.to_string()),
                    _ => Cell::Empty,
                })
                .collect()
        })
        .collect())
}

fn rows_from_table(table: Vec<Vec<Cell>>) -> Result<Vec<RosterRow>, RosterError> {
    let mut rows = table.into_iter();
    let headers: Vec<String> = rows
        .next()
        .unwrap_or_default()
        .iter()
        .map(|c| c.text().to_lowercase().replace(' ', "_"))
        .collect();

    let name_col = find_name_column(&headers)
        .ok_or_else(|| RosterError::MissingNameColumn(headers.join(", ")))?;
    let dob_col = headers.iter().position(|h| DOB_COLUMNS.contains(&h.as_str()));
    let doa_col = headers.iter().position(|h| DOA_COLUMNS.contains(&h.as_str()));
    tracing::debug!(name = %headers[name_col], ?dob_col, ?doa_col, "roster columns");

    let cell = |row: &[Cell], col: Option<usize>| col.and_then(|c| row.get(c)).and_then(Cell::date);
    let parsed: Vec<RosterRow> = rows
        .filter_map(|row| {
            let name = row.get(name_col).map(Cell::text).unwrap_or_default();
            if name.is_empty() || BLANK_NAMES.contains(&name.to_lowercase().as_str()) {
                return None;
            }
            Some(RosterRow {
                date_of_birth: cell(&row, dob_col),
                date_of_accident: cell(&row, doa_col),
                name,
            })
        })
        .collect();

    if parsed.is_empty() {
        return Err(RosterError::NoRows);
    }
    Ok(parsed)
}

/// Exact alias first, then any column mentioning "name" that is not a
/// first/last name part.
fn find_name_column(headers: &[String]) -> Option<usize> {
    headers
        .iter()
        .position(|h| NAME_COLUMNS.contains(&h.as_str()))
        .or_else(|| {
            headers
                .iter()
                .position(|h| h.contains("name") && !h.contains("first") && !h.contains("last"))
        })
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}
