use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Canonical field vocabulary. The string forms are a wire contract shared
/// with stored rows and exported reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    PatientName,
    Dob,
    Doa,
    Referral,
    ServiceDates,
}

impl FieldName {
    pub const ALL: [FieldName; 5] = [
        FieldName::PatientName,
        FieldName::Dob,
        FieldName::Doa,
        FieldName::Referral,
        FieldName::ServiceDates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::PatientName => "patient_name",
            FieldName::Dob => "dob",
            FieldName::Doa => "doa",
            FieldName::Referral => "referral",
            FieldName::ServiceDates => "service_dates",
        }
    }

    pub fn parse(s: &str) -> Option<FieldName> {
        FieldName::ALL.iter().copied().find(|f| f.as_str() == s)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FieldName::PatientName => "Patient Name",
            FieldName::Dob => "Date of Birth",
            FieldName::Doa => "Date of Accident",
            FieldName::Referral => "Referral Number",
            FieldName::ServiceDates => "Service Dates",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured entity reported by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrEntity {
    pub entity_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl OcrEntity {
    pub fn new(entity_type: &str, value: &str, confidence: f64) -> Self {
        OcrEntity {
            entity_type: entity_type.to_string(),
            value: value.to_string(),
            confidence: Some(confidence),
            page_number: None,
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }
}

/// Output of the OCR collaborator. Entities keep the order the engine
/// reported them in; at most one entity per type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub success: bool,
    pub full_text: String,
    pub entities: Vec<OcrEntity>,
    #[serde(default)]
    pub entity_pages: HashMap<String, u32>,
    #[serde(default)]
    pub pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResult {
    pub fn failed(error: impl Into<String>) -> Self {
        OcrResult {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub field_name: FieldName,
    pub raw_value: String,
    pub normalized_value: String,
    pub confidence: f64,
    pub page_number: u32,
}

/// Extraction output. A missing key means the field was not found.
pub type ExtractedFields = BTreeMap<FieldName, ExtractedField>;

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceIdentity {
    pub id: i64,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub date_of_accident: Option<NaiveDate>,
}

impl ReferenceIdentity {
    /// Roster date for a date field, in canonical MM/DD/YYYY form.
    pub fn canonical_date(&self, field: FieldName) -> Option<String> {
        let date = match field {
            FieldName::Dob => self.date_of_birth,
            FieldName::Doa => self.date_of_accident,
            _ => None,
        };
        date.map(|d| d.format(crate::normalize::CANONICAL_DATE_FORMAT).to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Match,
    Ambiguous,
    NoMatch,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Match => "match",
            Decision::Ambiguous => "ambiguous",
            Decision::NoMatch => "no_match",
        }
    }

    pub fn parse(s: &str) -> Option<Decision> {
        match s {
            "match" => Some(Decision::Match),
            "ambiguous" => Some(Decision::Ambiguous),
            "no_match" => Some(Decision::NoMatch),
            _ => None,
        }
    }

    /// True when the matched reference is reliable enough to compare dates against.
    pub fn has_identity(&self) -> bool {
        matches!(self, Decision::Match | Decision::Ambiguous)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub reference_id: Option<i64>,
    pub score: f64,
    pub decision: Decision,
}

impl MatchDecision {
    pub fn no_match() -> Self {
        MatchDecision {
            reference_id: None,
            score: 0.0,
            decision: Decision::NoMatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    pub field: FieldName,
    pub expected_value: String,
    pub observed_value: String,
    pub page_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<DocumentStatus> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// pending -> processing -> completed | failed; nothing is revisited.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Completed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub document_id: i64,
    pub status: DocumentStatus,
    pub message: String,
}
