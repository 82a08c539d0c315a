use crate::types::DocumentStatus;
use serde::{Deserialize, Serialize};

/// An uploaded document and where it is in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub stored_path: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Pull-based status answer; the source of truth for observers that missed
/// a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatusView {
    pub document_id: i64,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: String,
}

impl From<&Document> for DocumentStatusView {
    fn from(doc: &Document) -> Self {
        DocumentStatusView {
            document_id: doc.id,
            filename: doc.filename.clone(),
            status: doc.status,
            error_message: doc.error_message.clone(),
            updated_at: doc.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_documents: i64,
    pub completed: i64,
    /// Pending and processing together.
    pub processing: i64,
    pub failed: i64,
    pub total_matches: i64,
    pub total_mismatches: i64,
}
