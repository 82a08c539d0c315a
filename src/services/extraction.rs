//! OCR output -> canonical field map.
//!
//! Structured entities are read first (highest confidence per field wins,
//! service dates accumulate in order). Fields still missing afterwards are
//! searched for in the raw text near their keywords.

use crate::normalize::{normalize_date, normalize_name};
use crate::types::{ExtractedField, ExtractedFields, FieldName, OcrEntity, OcrResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Confidence given to an OCR entity that reports none.
pub const DEFAULT_ENTITY_CONFIDENCE: f64 = 0.8;
const TEXT_MATCH_CONFIDENCE: f64 = 0.6;
const KEYWORD_NAME_CONFIDENCE: f64 = 0.5;
const SERVICE_DATES_SEPARATOR: &str = "; ";

/// OCR entity label (lowercased, `_`/`-` read as spaces) -> canonical field.
const ENTITY_SYNONYMS: &[(&str, FieldName)] = &[
    ("name", FieldName::PatientName),
    ("patient name", FieldName::PatientName),
    ("client name", FieldName::PatientName),
    ("person name", FieldName::PatientName),
    ("full name", FieldName::PatientName),
    ("dob", FieldName::Dob),
    ("date of birth", FieldName::Dob),
    ("birth date", FieldName::Dob),
    ("birth", FieldName::Dob),
    ("doa", FieldName::Doa),
    ("date of accident", FieldName::Doa),
    ("accident date", FieldName::Doa),
    ("date of injury", FieldName::Doa),
    ("injury date", FieldName::Doa),
    ("date of incident", FieldName::Doa),
    ("incident date", FieldName::Doa),
    ("date of instance", FieldName::Doa),
    ("instance date", FieldName::Doa),
    ("date of collision", FieldName::Doa),
    ("collision date", FieldName::Doa),
    ("collision occurred on", FieldName::Doa),
    ("collision occurred", FieldName::Doa),
    ("onset date", FieldName::Doa),
    ("date of onset", FieldName::Doa),
    ("service", FieldName::ServiceDates),
    ("service date", FieldName::ServiceDates),
    ("service dates", FieldName::ServiceDates),
    ("date of service", FieldName::ServiceDates),
    ("date of appointment", FieldName::ServiceDates),
    ("appointment date", FieldName::ServiceDates),
    ("date of visit", FieldName::ServiceDates),
    ("visit date", FieldName::ServiceDates),
    ("visiting date", FieldName::ServiceDates),
    ("diagnosed date", FieldName::ServiceDates),
    ("date of diagnosis", FieldName::ServiceDates),
    ("diagnosis date", FieldName::ServiceDates),
    ("referral", FieldName::Referral),
    ("ref", FieldName::Referral),
    ("referral number", FieldName::Referral),
    ("referral id", FieldName::Referral),
    ("referral details", FieldName::Referral),
    ("referral note", FieldName::Referral),
    ("reason for visit", FieldName::Referral),
    ("instructions", FieldName::Referral),
];

const NAME_KEYWORDS: &[&str] = &["patient name", "name", "patient", "full name", "client name"];
const DOB_KEYWORDS: &[&str] = &["date of birth", "dob", "birth date", "born", "birthday"];
const DOA_KEYWORDS: &[&str] = &[
    "date of accident",
    "doa",
    "accident date",
    "date of incident",
    "incident date",
    "date of instance",
    "instance date",
    "date of collision",
    "collision date",
    "collision occurred on",
    "collision occurred",
    "onset date",
    "date of onset",
];
const REFERRAL_KEYWORDS: &[&str] = &["referral", "referral date", "referral number", "ref", "referral id"];
const SERVICE_DATE_KEYWORDS: &[&str] = &[
    "service date",
    "service dates",
    "date of service",
    "dos",
    "treatment date",
    "date of appointment",
    "appointment date",
    "date of visit",
    "visit date",
    "visiting date",
    "diagnosed date",
    "date of diagnosis",
    "diagnosis date",
];

/// Words that show a "name" candidate is really a form label.
const NAME_REJECT_WORDS: &[&str] = &["exam", "date", "detailed", "initial", "follow"];
const REFERRAL_REJECT_WORDS: &[&str] = &["number", "num", "no", "id", "ref", "referral", "date"];

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        r"\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b",
        r"\d{1,2}\s+\w{3,9}\s+\d{2,4}",
        r"\w{3,9}\s+\d{1,2},?\s+\d{2,4}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static NAME_AFTER_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:patient|client|name)[ \t:]+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){1,3})\b").unwrap()
});
static NAME_WORDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})\b").unwrap());
static NAME_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n\r]|Date of|Referral|Service|Exam|Bill").unwrap());
static REFERRAL_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Z]{2,}[0-9A-Z\-]{1,18})\b").unwrap());
static REFERRAL_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n\r]|Date of|Service|Patient").unwrap());

static NAME_ANCHORS: Lazy<Vec<Regex>> =
    Lazy::new(|| keyword_anchors(NAME_KEYWORDS, r"(?i)\b{}[:,\-\s]+"));
static REFERRAL_ANCHORS: Lazy<Vec<Regex>> =
    Lazy::new(|| keyword_anchors(REFERRAL_KEYWORDS, r"(?i)\b{}\b(?:\s+(?:number|id|#))?[:,\-\s#]*"));
static DOB_RULE: Lazy<DateRule> = Lazy::new(|| DateRule::new(DOB_KEYWORDS, DOA_KEYWORDS));
static DOA_RULE: Lazy<DateRule> = Lazy::new(|| DateRule::new(DOA_KEYWORDS, SERVICE_DATE_KEYWORDS));

/// One anchor per keyword; `{}` in `template` is replaced by the escaped keyword.
fn keyword_anchors<I>(keywords: I, template: &str) -> Vec<Regex>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|kw| Regex::new(&template.replace("{}", &regex::escape(kw.as_ref()))).unwrap())
        .collect()
}

/// Keyword anchors for a date field, and where its search window ends.
struct DateRule {
    anchors: Vec<Regex>,
    stop: Regex,
}

impl DateRule {
    /// `exclude` keywords cut the window and are never anchors themselves.
    fn new(keywords: &[&str], exclude: &[&str]) -> Self {
        let mut stop = String::from(r"(?i)[\n\r]|Date of|Referral|Service|Patient");
        for kw in exclude {
            stop.push('|');
            stop.push_str(&regex::escape(kw));
        }
        DateRule {
            anchors: keyword_anchors(
                keywords.iter().filter(|k| !exclude.contains(k)),
                r"(?i)\b{}\b(?:\s+date)?[:,\-\s]*",
            ),
            stop: Regex::new(&stop).unwrap(),
        }
    }
}

/// Map OCR output to canonical fields. Never fails; absent fields are absent keys.
pub fn extract_fields(ocr: &OcrResult) -> ExtractedFields {
    let folded = ocr
        .entities
        .iter()
        .fold(EntityFold::default(), |acc, entity| acc.absorb(entity, &ocr.entity_pages));
    let mut fields = folded.finish();

    for (field, found) in text_fallback(&ocr.full_text, &fields) {
        tracing::debug!(field = %field, "field recovered from raw text");
        fields.insert(field, found);
    }
    fields
}

/// Canonical field for an OCR entity label, if the label is known.
pub fn canonical_field(entity_type: &str) -> Option<FieldName> {
    let key = entity_type
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    ENTITY_SYNONYMS
        .iter()
        .find(|(label, _)| *label == key)
        .map(|(_, field)| *field)
}

/// Canonical form of a single field value.
pub fn normalize_field_value(field: FieldName, raw: &str) -> String {
    match field {
        FieldName::Dob | FieldName::Doa => {
            normalize_date(raw).unwrap_or_else(|| raw.trim().to_string())
        }
        FieldName::PatientName => normalize_name(raw),
        FieldName::Referral => raw.trim().to_uppercase(),
        FieldName::ServiceDates => raw.trim().to_string(),
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    raw: String,
    confidence: f64,
    page: u32,
}

#[derive(Debug, Clone)]
struct ServiceDates {
    raw: Vec<String>,
    normalized: Vec<String>,
    confidence: f64,
    page: u32,
}

#[derive(Debug, Default)]
struct EntityFold {
    single: BTreeMap<FieldName, Candidate>,
    service_dates: Option<ServiceDates>,
}

impl EntityFold {
    fn absorb(mut self, entity: &OcrEntity, entity_pages: &HashMap<String, u32>) -> Self {
        let Some(field) = canonical_field(&entity.entity_type) else {
            tracing::debug!(entity_type = %entity.entity_type, "dropping unrecognised OCR entity");
            return self;
        };
        let value = entity.value.trim();
        if value.is_empty() {
            return self;
        }
        let confidence = entity.confidence.unwrap_or(DEFAULT_ENTITY_CONFIDENCE);
        let page = resolve_page(entity, entity_pages);

        if field == FieldName::ServiceDates {
            let normalized = normalize_date(value).unwrap_or_else(|| value.to_string());
            let dates = self.service_dates.get_or_insert_with(|| ServiceDates {
                raw: Vec::new(),
                normalized: Vec::new(),
                confidence,
                page,
            });
            dates.raw.push(value.to_string());
            dates.normalized.push(normalized);
            return self;
        }

        let replace = self
            .single
            .get(&field)
            .map_or(true, |existing| existing.confidence < confidence);
        if replace {
            self.single.insert(
                field,
                Candidate {
                    raw: value.to_string(),
                    confidence,
                    page,
                },
            );
        }
        self
    }

    fn finish(self) -> ExtractedFields {
        let mut fields: ExtractedFields = self
            .single
            .into_iter()
            .map(|(field, c)| {
                let normalized_value = normalize_field_value(field, &c.raw);
                (
                    field,
                    ExtractedField {
                        field_name: field,
                        raw_value: c.raw,
                        normalized_value,
                        confidence: c.confidence,
                        page_number: c.page,
                    },
                )
            })
            .collect();
        if let Some(dates) = self.service_dates {
            fields.insert(
                FieldName::ServiceDates,
                ExtractedField {
                    field_name: FieldName::ServiceDates,
                    raw_value: dates.raw.join(SERVICE_DATES_SEPARATOR),
                    normalized_value: dates.normalized.join(SERVICE_DATES_SEPARATOR),
                    confidence: dates.confidence,
                    page_number: dates.page,
                },
            );
        }
        fields
    }
}

/// `entity_pages` wins, then the entity's own page, then page 1.
fn resolve_page(entity: &OcrEntity, entity_pages: &HashMap<String, u32>) -> u32 {
    entity_pages
        .get(&entity.entity_type)
        .copied()
        .filter(|p| *p >= 1)
        .or(entity.page_number.filter(|p| *p >= 1))
        .unwrap_or(1)
}

fn text_fallback(text: &str, found: &ExtractedFields) -> Vec<(FieldName, ExtractedField)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut recovered = Vec::new();
    let mut push = |field: FieldName, raw: String, confidence: f64| {
        recovered.push((
            field,
            ExtractedField {
                field_name: field,
                normalized_value: normalize_field_value(field, &raw),
                raw_value: raw,
                confidence,
                page_number: 1,
            },
        ));
    };

    if !found.contains_key(&FieldName::PatientName) {
        if let Some((name, confidence)) = find_name(text) {
            push(FieldName::PatientName, name, confidence);
        }
    }
    if !found.contains_key(&FieldName::Dob) {
        if let Some(date) = find_date_near(text, &DOB_RULE) {
            push(FieldName::Dob, date, TEXT_MATCH_CONFIDENCE);
        }
    }
    if !found.contains_key(&FieldName::Doa) {
        if let Some(date) = find_date_near(text, &DOA_RULE) {
            push(FieldName::Doa, date, TEXT_MATCH_CONFIDENCE);
        }
    }
    if !found.contains_key(&FieldName::Referral) {
        if let Some(referral) = find_referral(text) {
            push(FieldName::Referral, referral, TEXT_MATCH_CONFIDENCE);
        }
    }
    recovered
}

fn contains_any_word(candidate: &str, words: &[&str]) -> bool {
    let lower = candidate.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

fn plausible_name(candidate: &str, extra_reject: &[&str]) -> bool {
    candidate.split_whitespace().count() >= 2
        && !candidate.chars().any(|c| c.is_ascii_digit())
        && !contains_any_word(candidate, NAME_REJECT_WORDS)
        && !contains_any_word(candidate, extra_reject)
}

/// At most `n` characters from the start of `s`.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn strip_separators(s: &str) -> &str {
    s.trim().trim_start_matches(|c: char| c == ':' || c == ',' || c == '-' || c.is_whitespace())
}

fn find_name(text: &str) -> Option<(String, f64)> {
    for caps in NAME_AFTER_LABEL_RE.captures_iter(text) {
        let candidate = caps[1].trim();
        if plausible_name(candidate, &[]) {
            return Some((candidate.to_string(), TEXT_MATCH_CONFIDENCE));
        }
    }

    for anchor in NAME_ANCHORS.iter() {
        for m in anchor.find_iter(text) {
            let snippet = take_chars(&text[m.end()..], 60);
            let window = NAME_STOP_RE.split(snippet).next().unwrap_or("");
            let Some(caps) = NAME_WORDS_RE.captures(strip_separators(window)) else {
                continue;
            };
            let candidate = caps[1].trim();
            if plausible_name(candidate, &["visit"]) {
                return Some((candidate.to_string(), KEYWORD_NAME_CONFIDENCE));
            }
        }
    }
    None
}

/// First date-shaped text within 50 characters after one of the rule's
/// keywords. The window is cut at other form labels.
fn find_date_near(text: &str, rule: &DateRule) -> Option<String> {
    for anchor in &rule.anchors {
        for m in anchor.find_iter(text) {
            let snippet = take_chars(&text[m.end()..], 50);
            let window = rule.stop.split(snippet).next().unwrap_or("");
            let collapsed = strip_separators(window)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            let head = take_chars(&collapsed, 30);
            if let Some(date) = first_date(head) {
                return Some(date);
            }
        }
    }
    None
}

/// Patterns are tried in order; the first one that finds six or more
/// characters wins, wherever it sits in `s`.
fn first_date(s: &str) -> Option<String> {
    DATE_PATTERNS
        .iter()
        .filter_map(|re| re.find(s))
        .find(|m| m.as_str().len() >= 6)
        .map(|m| m.as_str().to_string())
}

fn find_referral(text: &str) -> Option<String> {
    for anchor in REFERRAL_ANCHORS.iter() {
        for m in anchor.find_iter(text) {
            let snippet = take_chars(&text[m.end()..], 50);
            let window = REFERRAL_STOP_RE.split(snippet).next().unwrap_or("");
            let Some(caps) = REFERRAL_TOKEN_RE.captures(window) else {
                continue;
            };
            let token = caps[1].trim();
            let lower = token.to_lowercase();
            if token.len() >= 3 && !REFERRAL_REJECT_WORDS.contains(&lower.as_str()) {
                return Some(token.to_uppercase());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr(entities: Vec<OcrEntity>, text: &str) -> OcrResult {
        OcrResult {
            success: true,
            full_text: text.to_string(),
            entities,
            ..Default::default()
        }
    }

    #[test]
    fn higher_confidence_entity_wins() {
        let result = extract_fields(&ocr(
            vec![
                OcrEntity::new("date of accident", "03/04/2020", 0.9),
                OcrEntity::new("incident_date", "04/03/2020", 0.95),
            ],
            "",
        ));
        let doa = &result[&FieldName::Doa];
        assert_eq!(doa.normalized_value, "04/03/2020");
        assert_eq!(doa.confidence, 0.95);
    }

    #[test]
    fn equal_confidence_keeps_first_seen() {
        let result = extract_fields(&ocr(
            vec![
                OcrEntity::new("dob", "01/02/1990", 0.9).on_page(2),
                OcrEntity::new("date of birth", "05/06/1991", 0.9).on_page(3),
            ],
            "",
        ));
        let dob = &result[&FieldName::Dob];
        assert_eq!(dob.normalized_value, "01/02/1990");
        assert_eq!(dob.page_number, 2);
    }

    #[test]
    fn page_resolution_prefers_entity_pages() {
        let mut input = ocr(
            vec![
                OcrEntity::new("dob", "01/02/1990", 0.9).on_page(2),
                OcrEntity::new("doa", "03/04/2020", 0.9).on_page(4),
                OcrEntity::new("referral", "RF1234", 0.9),
            ],
            "",
        );
        input.entity_pages.insert("dob".into(), 5);
        let result = extract_fields(&input);
        assert_eq!(result[&FieldName::Dob].page_number, 5);
        assert_eq!(result[&FieldName::Doa].page_number, 4);
        assert_eq!(result[&FieldName::Referral].page_number, 1);
    }

    #[test]
    fn service_dates_accumulate_in_order() {
        let result = extract_fields(&ocr(
            vec![
                OcrEntity::new("service date", "Jan 5 2021", 0.7).on_page(2),
                OcrEntity::new("date of visit", "2021-02-06", 0.9),
                OcrEntity::new("appointment_date", "3/7/2021", 0.8),
            ],
            "",
        ));
        assert_eq!(result.len(), 1);
        let dates = &result[&FieldName::ServiceDates];
        assert_eq!(dates.normalized_value, "01/05/2021; 02/06/2021; 03/07/2021");
        assert_eq!(dates.raw_value, "Jan 5 2021; 2021-02-06; 3/7/2021");
        assert_eq!(dates.confidence, 0.7);
        assert_eq!(dates.page_number, 2);
    }

    #[test]
    fn unknown_entities_are_dropped() {
        let result = extract_fields(&ocr(
            vec![
                OcrEntity::new("invoice_total", "$120.00", 0.99),
                OcrEntity::new("Patient Name", "Jane O'Doe", 0.9),
            ],
            "",
        ));
        assert_eq!(result.len(), 1);
        assert_eq!(result[&FieldName::PatientName].normalized_value, "jane odoe");
        assert_eq!(result[&FieldName::PatientName].raw_value, "Jane O'Doe");
    }

    #[test]
    fn missing_confidence_defaults() {
        let mut entity = OcrEntity::new("ref", " rf-778 ", 0.0);
        entity.confidence = None;
        let result = extract_fields(&ocr(vec![entity], ""));
        let referral = &result[&FieldName::Referral];
        assert_eq!(referral.confidence, DEFAULT_ENTITY_CONFIDENCE);
        assert_eq!(referral.normalized_value, "RF-778");
    }

    #[test]
    fn empty_input_yields_no_fields() {
        assert!(extract_fields(&ocr(vec![], "")).is_empty());
        assert!(extract_fields(&ocr(vec![], "nothing useful here")).is_empty());
    }

    #[test]
    fn text_fallback_recovers_all_fields() {
        let text = "MEDICAL REPORT\n\
                    Patient Name: John Smith\n\
                    Date of Birth: 05/14/1982\n\
                    Date of Accident: 2021-03-09\n\
                    Referral Number: RF12345\n";
        let result = extract_fields(&ocr(vec![], text));

        let name = &result[&FieldName::PatientName];
        assert_eq!(name.normalized_value, "john smith");
        assert_eq!(name.confidence, 0.6);
        assert_eq!(result[&FieldName::Dob].normalized_value, "05/14/1982");
        assert_eq!(result[&FieldName::Doa].normalized_value, "03/09/2021");
        assert_eq!(result[&FieldName::Referral].normalized_value, "RF12345");
        assert!(result.values().all(|f| f.page_number == 1));
    }

    #[test]
    fn entities_take_priority_over_text() {
        let text = "Date of Birth: 05/14/1982";
        let result = extract_fields(&ocr(vec![OcrEntity::new("dob", "01/02/1990", 0.9)], text));
        assert_eq!(result[&FieldName::Dob].normalized_value, "01/02/1990");
        assert_eq!(result[&FieldName::Dob].confidence, 0.9);
    }

    #[test]
    fn earlier_date_patterns_win_over_loose_word_runs() {
        let result = extract_fields(&ocr(vec![], "DOB Age 41 05/14/1982"));
        assert_eq!(result[&FieldName::Dob].raw_value, "05/14/1982");
        assert_eq!(result[&FieldName::Dob].normalized_value, "05/14/1982");

        assert_eq!(first_date("seen 2021-03-09").as_deref(), Some("2021-03-09"));
        assert_eq!(first_date("Born March 3, 1975").as_deref(), Some("March 3, 1975"));
    }

    #[test]
    fn date_rules_compile_one_anchor_per_keyword() {
        assert_eq!(DOB_RULE.anchors.len(), DOB_KEYWORDS.len());
        assert_eq!(DOA_RULE.anchors.len(), DOA_KEYWORDS.len());
        assert_eq!(REFERRAL_ANCHORS.len(), REFERRAL_KEYWORDS.len());
    }

    #[test]
    fn accident_date_ignores_service_date_labels() {
        let text = "DOA: Date of Service 06/01/2022\nIncident Date: 02/03/2022";
        let result = extract_fields(&ocr(vec![], text));
        assert_eq!(result[&FieldName::Doa].normalized_value, "02/03/2022");
    }

    #[test]
    fn name_candidates_that_are_labels_are_rejected() {
        let text = "Patient: Initial Exam\nClient name - Mary Ann Jones";
        let result = extract_fields(&ocr(vec![], text));
        assert_eq!(result[&FieldName::PatientName].normalized_value, "mary ann jones");
    }

    #[test]
    fn referral_rejects_generic_words() {
        let text = "Referral: number\nRef # AB-9921";
        let result = extract_fields(&ocr(vec![], text));
        assert_eq!(result[&FieldName::Referral].normalized_value, "AB-9921");
    }

    #[test]
    fn synonym_lookup_tolerates_separators() {
        assert_eq!(canonical_field("Date_Of_Birth"), Some(FieldName::Dob));
        assert_eq!(canonical_field("collision-date"), Some(FieldName::Doa));
        assert_eq!(canonical_field("  Visit   Date "), Some(FieldName::ServiceDates));
        assert_eq!(canonical_field("total"), None);
    }
}
