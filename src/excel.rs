use crate::error::ReportError;
use crate::models::{FieldStatus, MatchInfo};
use crate::types::{Decision, ExtractedField};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};

const SUMMARY_HEADERS: [&str; 7] = [
    "Document ID",
    "File Name",
    "Processed At",
    "Match Status",
    "Match Score (%)",
    "Matched Client ID",
    "Matched Client Name",
];
const FIELD_HEADERS: [&str; 5] = [
    "Field Name",
    "Extracted Value",
    "Expected Value (from Dataset)",
    "Match Status",
    "Confidence (%)",
];
const MISMATCH_HEADERS: [&str; 4] = ["Field", "Expected Value", "Observed Value", "Mismatch Type"];
const SERVICE_DATE_HEADERS: [&str; 2] = ["Service Date", "Page"];

const SUMMARY_HEADER_COLOR: u32 = 0x366092;
const FIELD_HEADER_COLOR: u32 = 0x70AD47;
const MISMATCH_HEADER_COLOR: u32 = 0xC00000;
const SERVICE_HEADER_COLOR: u32 = 0x0070C0;

const MATCHED_FILL: u32 = 0xC6EFCE;
const MISMATCH_FILL: u32 = 0xFFC7CE;
const NOT_IN_DATASET_FILL: u32 = 0xFFEB9C;
const NEUTRAL_FILL: u32 = 0xD9D9D9;

enum Cell {
    Text(String),
    Number(f64, &'static str),
    Blank,
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    fn display_len(&self) -> usize {
        match self {
            Cell::Text(s) => s.chars().count(),
            Cell::Number(n, _) => format!("{:.1}", n).len(),
            Cell::Blank => 0,
        }
    }
}

struct Row {
    cells: Vec<Cell>,
    fill: Option<u32>,
}

/// Where a report for `document_id` is written. An explicit path gets an
/// `.xlsx` extension; otherwise a timestamped file in `exports_dir`.
pub fn resolve_report_path(out: Option<&Path>, exports_dir: &Path, document_id: i64) -> Result<PathBuf, ReportError> {
    let path = match out {
        Some(p) => {
            let mut pb = p.to_path_buf();
            if pb.extension().map(|e| e.to_str()) != Some(Some("xlsx")) {
                pb.set_extension("xlsx");
            }
            pb
        }
        None => {
            let now = chrono::Local::now();
            let stamp = now.format("%Y%m%d_%H%M%S");
            let mut p = exports_dir.join(format!("report_{}_{}.xlsx", document_id, stamp));
            let mut counter = 2u32;
            while p.exists() {
                p = exports_dir.join(format!("report_{}_{}_{}.xlsx", document_id, stamp, counter));
                counter += 1;
            }
            p
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    path.to_str().ok_or(ReportError::InvalidPath)?;
    Ok(path)
}

/// Write the per-document review workbook.
///
/// Sheets: "Summary", "Field Matching", then "Mismatches" and
/// "Service Dates" when there is something to show.
pub fn write_document_report(
    path: &Path,
    info: &MatchInfo,
    processed_at: &str,
    service_dates: Option<&ExtractedField>,
) -> Result<(), ReportError> {
    let mut workbook = Workbook::new();
    workbook.push_worksheet(summary_sheet(info, processed_at)?);
    workbook.push_worksheet(field_sheet(info)?);
    if !info.mismatches.is_empty() {
        workbook.push_worksheet(mismatch_sheet(info)?);
    }
    if let Some(dates) = service_dates {
        workbook.push_worksheet(service_dates_sheet(dates)?);
    }
    workbook.save(path)?;
    tracing::info!(document_id = info.document_id, path = %path.display(), "report written");
    Ok(())
}

fn summary_sheet(info: &MatchInfo, processed_at: &str) -> Result<Worksheet, XlsxError> {
    let decision = info.match_decision.as_ref().map(|m| &m.decision);
    let status = match decision.map(|d| d.decision) {
        Some(Decision::Match) => "Match",
        Some(Decision::Ambiguous) => "Ambiguous",
        Some(Decision::NoMatch) => "No Match",
        None => "Not Matched",
    };
    let client = info.matched_client.as_ref();
    let row = Row {
        cells: vec![
            Cell::Number(info.document_id as f64, "0"),
            Cell::text(&info.filename),
            Cell::text(processed_at),
            Cell::text(status),
            decision.map_or(Cell::Blank, |d| Cell::Number(d.score, "0.0")),
            client.map_or(Cell::Blank, |c| Cell::Number(c.id as f64, "0")),
            client.map_or(Cell::Blank, |c| Cell::text(&c.name)),
        ],
        fill: None,
    };
    table_sheet("Summary", &SUMMARY_HEADERS, SUMMARY_HEADER_COLOR, &[row])
}

fn field_sheet(info: &MatchInfo) -> Result<Worksheet, XlsxError> {
    let rows: Vec<Row> = info
        .fields
        .iter()
        .map(|f| Row {
            cells: vec![
                Cell::text(&f.display_name),
                Cell::text(f.extracted_value.clone().unwrap_or_default()),
                Cell::text(f.expected_value.clone().unwrap_or_default()),
                Cell::text(f.status.label()),
                f.confidence.map_or(Cell::Blank, |c| Cell::Number(c * 100.0, "0.0")),
            ],
            fill: Some(status_fill(f.status)),
        })
        .collect();
    table_sheet("Field Matching", &FIELD_HEADERS, FIELD_HEADER_COLOR, &rows)
}

fn mismatch_sheet(info: &MatchInfo) -> Result<Worksheet, XlsxError> {
    let rows: Vec<Row> = info
        .mismatches
        .iter()
        .map(|m| Row {
            cells: vec![
                Cell::text(m.field.display_name()),
                Cell::text(&m.expected_value),
                Cell::text(&m.observed_value),
                Cell::text("Date Mismatch"),
            ],
            fill: Some(MISMATCH_FILL),
        })
        .collect();
    table_sheet("Mismatches", &MISMATCH_HEADERS, MISMATCH_HEADER_COLOR, &rows)
}

fn service_dates_sheet(dates: &ExtractedField) -> Result<Worksheet, XlsxError> {
    let rows: Vec<Row> = dates
        .normalized_value
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| Row {
            cells: vec![Cell::text(d), Cell::Number(dates.page_number as f64, "0")],
            fill: None,
        })
        .collect();
    table_sheet("Service Dates", &SERVICE_DATE_HEADERS, SERVICE_HEADER_COLOR, &rows)
}

fn status_fill(status: FieldStatus) -> u32 {
    match status {
        FieldStatus::Matched => MATCHED_FILL,
        FieldStatus::Mismatch => MISMATCH_FILL,
        FieldStatus::NotInDataset => NOT_IN_DATASET_FILL,
        _ => NEUTRAL_FILL,
    }
}

fn table_sheet(name: &str, headers: &[&str], header_color: u32, rows: &[Row]) -> Result<Worksheet, XlsxError> {
    let mut worksheet = Worksheet::new();
    worksheet.set_name(name)?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(header_color))
        .set_font_color(Color::RGB(0xFFFFFF))
        .set_align(FormatAlign::Center);
    for (col, header) in headers.iter().enumerate() {
        write_text_cell_safe(&mut worksheet, 0, col as u16, header, &header_format)?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        let r = (row_idx + 1) as u32;
        let base = match row.fill {
            Some(fill) => Format::new().set_background_color(Color::RGB(fill)),
            None => Format::new(),
        };
        for (col, cell) in row.cells.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(s) => write_text_cell_safe(&mut worksheet, r, col, s, &base)?,
                Cell::Number(n, num_format) => {
                    let format = base.clone().set_num_format(*num_format);
                    worksheet.write_number_with_format(r, col, *n, &format)?;
                }
                Cell::Blank => {
                    worksheet.write_blank(r, col, &base)?;
                }
            }
        }
    }

    for (col, header) in headers.iter().enumerate() {
        let longest = rows
            .iter()
            .filter_map(|r| r.cells.get(col))
            .map(Cell::display_len)
            .chain(std::iter::once(header.chars().count()))
            .max()
            .unwrap_or(0);
        worksheet.set_column_width(col as u16, estimate_width(longest))?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(worksheet)
}

/// Drop characters that corrupt the sheet XML: control chars other than
/// tab/newline/CR and the U+FFFE/U+FFFF non-characters.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            matches!(c, '\t' | '\n' | '\r') || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

fn write_text_cell_safe(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    text: &str,
    format: &Format,
) -> Result<(), XlsxError> {
    let cleaned = sanitize_cell(text);
    worksheet.write_string_with_format(row, col, &cleaned, format).map(|_| ())
}

/// Column width from text length (chars × 1.2, clamped 10–50).
fn estimate_width(chars: usize) -> f64 {
    (chars as f64 * 1.2).clamp(10.0, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMatchInfo, StoredMatch};
    use crate::types::{FieldName, MatchDecision, MismatchRecord, ReferenceIdentity};
    use calamine::{open_workbook_auto, Data, Reader};
    use chrono::NaiveDate;

    fn info() -> MatchInfo {
        MatchInfo {
            document_id: 12,
            filename: "scan\u{7}.pdf".into(),
            match_decision: Some(StoredMatch {
                decision: MatchDecision {
                    reference_id: Some(3),
                    score: 95.5,
                    decision: Decision::Match,
                },
                matched_at: "2024-01-01T00:00:00Z".into(),
            }),
            matched_client: Some(ReferenceIdentity {
                id: 3,
                name: "Jane Doe".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1990, 2, 1),
                date_of_accident: None,
            }),
            fields: vec![FieldMatchInfo {
                field: FieldName::Dob,
                display_name: "Date of Birth".into(),
                extracted_value: Some("01/02/1990".into()),
                expected_value: Some("02/01/1990".into()),
                status: FieldStatus::Mismatch,
                confidence: Some(0.9),
                page_number: Some(1),
            }],
            mismatches: vec![MismatchRecord {
                field: FieldName::Dob,
                expected_value: "02/01/1990".into(),
                observed_value: "01/02/1990".into(),
                page_number: 1,
            }],
        }
    }

    #[test]
    fn report_has_expected_sheets_and_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_report_path(None, &dir.path().join("exports"), 12).unwrap();
        let service = ExtractedField {
            field_name: FieldName::ServiceDates,
            raw_value: "3/1/2021; 3/8/2021".into(),
            normalized_value: "03/01/2021; 03/08/2021".into(),
            confidence: 0.8,
            page_number: 2,
        };
        write_document_report(&path, &info(), "2024-01-01T00:00:00Z", Some(&service)).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        assert_eq!(
            workbook.sheet_names().to_vec(),
            vec!["Summary", "Field Matching", "Mismatches", "Service Dates"]
        );

        let summary = workbook.worksheet_range("Summary").unwrap();
        assert_eq!(summary.get_value((0, 0)), Some(&Data::String("Document ID".into())));
        assert_eq!(summary.get_value((1, 1)), Some(&Data::String("scan.pdf".into())));
        assert_eq!(summary.get_value((1, 3)), Some(&Data::String("Match".into())));
        assert_eq!(summary.get_value((1, 6)), Some(&Data::String("Jane Doe".into())));

        let fields = workbook.worksheet_range("Field Matching").unwrap();
        assert_eq!(fields.get_value((1, 3)), Some(&Data::String("Mismatch".into())));

        let mismatches = workbook.worksheet_range("Mismatches").unwrap();
        assert_eq!(mismatches.get_value((1, 3)), Some(&Data::String("Date Mismatch".into())));

        let dates = workbook.worksheet_range("Service Dates").unwrap();
        assert_eq!(dates.get_value((2, 0)), Some(&Data::String("03/08/2021".into())));
    }

    #[test]
    fn optional_sheets_are_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.xlsx");
        let mut info = info();
        info.mismatches.clear();
        info.match_decision = None;
        write_document_report(&path, &info, "", None).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        assert_eq!(workbook.sheet_names().to_vec(), vec!["Summary", "Field Matching"]);
        let summary = workbook.worksheet_range("Summary").unwrap();
        assert_eq!(summary.get_value((1, 3)), Some(&Data::String("Not Matched".into())));
    }

    #[test]
    fn explicit_path_gets_xlsx_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_report_path(Some(&dir.path().join("out/report.txt")), dir.path(), 1).unwrap();
        assert_eq!(path, dir.path().join("out/report.xlsx"));
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn sanitize_drops_control_characters() {
        assert_eq!(sanitize_cell("a\u{0}b\tc\u{7f}&"), "ab\tc&");
        assert_eq!(estimate_width(2), 10.0);
        assert_eq!(estimate_width(100), 50.0);
    }
}
