//! Canonical forms for free-text dates and names.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical date form used for every comparison, stored row and report cell.
pub const CANONICAL_DATE_FORMAT: &str = "%m/%d/%Y";

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").unwrap());
static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{2,4})\b").unwrap());
static COMPACT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})(\d{2})(\d{2})\b").unwrap());
static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z]{3,9})\.?[\s\-/.]+(\d{1,2})(?:st|nd|rd|th)?,?[\s\-/.,]+(\d{4}|\d{2})\b")
        .unwrap()
});
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?[\s\-/.]*(?:of\s+)?([a-z]{3,9})\.?,?[\s\-/.,]+(\d{4}|\d{2})\b")
        .unwrap()
});

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Normalize free-form date text to `MM/DD/YYYY`.
///
/// Blank input yields `None`. Input that does not parse is returned
/// unchanged, so later comparisons simply fail to match.
pub fn normalize_date(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    match parse_fuzzy_date(text) {
        Some(date) => Some(date.format(CANONICAL_DATE_FORMAT).to_string()),
        None => Some(text.to_string()),
    }
}

/// Find the first calendar date in `text`, ignoring surrounding words.
///
/// Numeric dates are read month-first; when the first number cannot be a
/// month but the second can, they are swapped. Two-digit years resolve to
/// the year within fifty years of today.
pub fn parse_fuzzy_date(text: &str) -> Option<NaiveDate> {
    let current_year = chrono::Local::now().year();

    for caps in ISO_DATE.captures_iter(text) {
        if let Some(d) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(d);
        }
    }

    for caps in NUMERIC_DATE.captures_iter(text) {
        let (Ok(a), Ok(b)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        let Some(year) = parse_year(&caps[3], current_year) else {
            continue;
        };
        let (month, day) = if a > 12 && b <= 12 { (b, a) } else { (a, b) };
        if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(d);
        }
    }

    for caps in MONTH_DAY_YEAR.captures_iter(text) {
        if let Some(d) = named_month_date(&caps[1], &caps[2], &caps[3], current_year) {
            return Some(d);
        }
    }

    for caps in DAY_MONTH_YEAR.captures_iter(text) {
        if let Some(d) = named_month_date(&caps[2], &caps[1], &caps[3], current_year) {
            return Some(d);
        }
    }

    for caps in COMPACT_DATE.captures_iter(text) {
        if let Some(d) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(d);
        }
    }

    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn named_month_date(month: &str, day: &str, year: &str, current_year: i32) -> Option<NaiveDate> {
    let month = month_number(month)?;
    let day: u32 = day.parse().ok()?;
    let year = parse_year(year, current_year)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// "Jan", "jan.", "January", "Sept" -> month number.
fn month_number(word: &str) -> Option<u32> {
    let word = word.trim_end_matches('.').to_lowercase();
    if word.len() < 3 {
        return None;
    }
    if word == "sept" {
        return Some(9);
    }
    MONTHS
        .iter()
        .position(|m| *m == word || (word.len() == 3 && m.starts_with(word.as_str())))
        .map(|i| i as u32 + 1)
}

fn parse_year(s: &str, current_year: i32) -> Option<i32> {
    let n: i32 = s.parse().ok()?;
    match s.len() {
        4 => Some(n),
        1 | 2 => {
            let century = current_year - current_year % 100;
            let mut year = century + n;
            if year >= current_year + 50 {
                year -= 100;
            } else if year < current_year - 50 {
                year += 100;
            }
            Some(year)
        }
        _ => None,
    }
}

/// Lowercase, strip punctuation, collapse whitespace. Idempotent.
pub fn normalize_name(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_name("Jane O'Brien"), normalize_name("jane obrien"));
        assert_eq!(normalize_name("O'Brien, Jane"), "obrien jane");
        // word order is kept
        assert_ne!(normalize_name("Jane O'Brien"), normalize_name("obrien jane"));
        assert_eq!(normalize_name("  JOHN   Q.  Public "), "john q public");
    }

    #[test]
    fn name_normalization_is_idempotent() {
        for raw in ["Jane O'Brien", "  MARY-ANN  smith,", "José Álvarez", "", "a_b  c"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn numeric_dates_are_month_first() {
        assert_eq!(normalize_date("01/02/1990").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("1/2/1990").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("03-04-2020").as_deref(), Some("03/04/2020"));
        assert_eq!(normalize_date("25/12/2019").as_deref(), Some("12/25/2019"));
    }

    #[test]
    fn iso_and_compact_dates() {
        assert_eq!(normalize_date("1990-01-02").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("1990-01-02T00:00:00").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("19900102").as_deref(), Some("01/02/1990"));
    }

    #[test]
    fn month_name_dates() {
        assert_eq!(normalize_date("Jan 2 1990").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("January 2, 1990").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("2 January 1990").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("3rd of Sept 2021").as_deref(), Some("09/03/2021"));
        assert_eq!(normalize_date("Dec. 31st, 1999").as_deref(), Some("12/31/1999"));
    }

    #[test]
    fn dates_inside_surrounding_words() {
        assert_eq!(normalize_date("DOB: 01/02/1990 (verified)").as_deref(), Some("01/02/1990"));
        assert_eq!(normalize_date("seen on March 4, 2020 at clinic").as_deref(), Some("03/04/2020"));
    }

    #[test]
    fn two_digit_years_stay_within_fifty_years() {
        let current = chrono::Local::now().year();
        let parsed = parse_fuzzy_date("01/02/90").expect("parses");
        assert!((parsed.year() - current).abs() <= 50);
        assert_eq!(parsed.month(), 1);
        assert_eq!(parsed.day(), 2);
    }

    #[test]
    fn garbage_is_returned_unchanged() {
        for raw in ["not a date", "13/45/2020", "Dr. Smith", "Mayhem 99"] {
            assert_eq!(normalize_date(raw).as_deref(), Some(raw));
        }
    }

    #[test]
    fn blank_input_is_none() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("   "), None);
    }

    #[test]
    fn canonical_output_is_stable() {
        let once = normalize_date("Jan 2 1990").expect("some");
        assert_eq!(normalize_date(&once).as_deref(), Some(once.as_str()));
    }
}
