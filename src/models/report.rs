use crate::types::{ExtractedField, ExtractedFields, FieldName, MatchDecision, MismatchRecord, ReferenceIdentity};
use serde::{Deserialize, Serialize};

/// Fields shown per document in status views and reports. Service dates
/// are listed separately.
pub const REPORTED_FIELDS: [FieldName; 4] = [
    FieldName::PatientName,
    FieldName::Dob,
    FieldName::Doa,
    FieldName::Referral,
];

/// Display-level state of one field against the matched roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Matched,
    Mismatch,
    NoMatch,
    NotInDataset,
    NotExtracted,
    NotApplicable,
}

impl FieldStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FieldStatus::Matched => "Matched",
            FieldStatus::Mismatch => "Mismatch",
            FieldStatus::NoMatch => "No Match",
            FieldStatus::NotInDataset => "Not in Dataset",
            FieldStatus::NotExtracted => "Not Extracted",
            FieldStatus::NotApplicable => "Not Applicable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMatch {
    #[serde(flatten)]
    pub decision: MatchDecision,
    pub matched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatchInfo {
    pub field: FieldName,
    pub display_name: String,
    pub extracted_value: Option<String>,
    pub expected_value: Option<String>,
    pub status: FieldStatus,
    pub confidence: Option<f64>,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub document_id: i64,
    pub filename: String,
    #[serde(rename = "match")]
    pub match_decision: Option<StoredMatch>,
    pub matched_client: Option<ReferenceIdentity>,
    pub fields: Vec<FieldMatchInfo>,
    pub mismatches: Vec<MismatchRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFieldView {
    pub field_name: FieldName,
    pub display_name: String,
    pub raw_value: String,
    pub normalized_value: String,
    pub confidence: f64,
    pub page_number: u32,
}

impl From<&ExtractedField> for ExtractedFieldView {
    fn from(f: &ExtractedField) -> Self {
        ExtractedFieldView {
            field_name: f.field_name,
            display_name: f.field_name.display_name().to_string(),
            raw_value: f.raw_value.clone(),
            normalized_value: f.normalized_value.clone(),
            confidence: f.confidence,
            page_number: f.page_number,
        }
    }
}

/// Per-field status for a processed document.
///
/// `reference` is the roster entry the document was matched to; pass
/// `None` when the decision carries no reliable identity.
pub fn field_statuses(
    fields: &ExtractedFields,
    decision: Option<&MatchDecision>,
    reference: Option<&ReferenceIdentity>,
    mismatches: &[MismatchRecord],
) -> Vec<FieldMatchInfo> {
    REPORTED_FIELDS
        .iter()
        .map(|&field| {
            let extracted = fields.get(&field);
            let expected = match field {
                FieldName::PatientName => reference.map(|r| r.name.clone()),
                FieldName::Dob | FieldName::Doa => reference.and_then(|r| r.canonical_date(field)),
                _ => None,
            };
            let status = match field {
                FieldName::PatientName => match (extracted, decision) {
                    (None, _) => FieldStatus::NotExtracted,
                    (Some(_), Some(d)) if d.decision.has_identity() => FieldStatus::Matched,
                    (Some(_), Some(_)) => FieldStatus::NoMatch,
                    (Some(_), None) => FieldStatus::NotApplicable,
                },
                FieldName::Dob | FieldName::Doa => {
                    if mismatches.iter().any(|m| m.field == field) {
                        FieldStatus::Mismatch
                    } else if reference.is_none() {
                        FieldStatus::NotApplicable
                    } else if expected.is_none() {
                        FieldStatus::NotInDataset
                    } else if extracted.is_none() {
                        FieldStatus::NotExtracted
                    } else {
                        FieldStatus::Matched
                    }
                }
                _ => match extracted {
                    Some(_) => FieldStatus::NotApplicable,
                    None => FieldStatus::NotExtracted,
                },
            };
            FieldMatchInfo {
                field,
                display_name: field.display_name().to_string(),
                extracted_value: extracted.map(|f| f.normalized_value.clone()),
                expected_value: expected,
                status,
                confidence: extracted.map(|f| f.confidence),
                page_number: extracted.map(|f| f.page_number),
            }
        })
        .collect()
}
