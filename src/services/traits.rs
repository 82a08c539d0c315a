//! Collaborator seams for the document pipeline.
//!
//! The pipeline only talks to these traits; the SQLite store, the Document AI
//! client and the broadcast notifier are the production implementations,
//! tests substitute in-memory fakes.

use crate::error::StoreError;
use crate::models::Document;
use crate::types::{
    DocumentStatus, ExtractedFields, MatchDecision, MismatchRecord, OcrResult, ReferenceIdentity,
    StatusUpdate,
};
use std::path::Path;
use std::sync::Arc;

/// Turns a stored document into text and entities. Failures (including
/// timeouts) come back as `success == false` with an error message.
pub trait OcrEngine: Send + Sync {
    fn process(&self, path: &Path, mime_type: &str) -> OcrResult;
}

/// Read-only roster snapshot for one pipeline run.
pub trait RosterProvider: Send + Sync {
    fn list_reference_identities(&self) -> Result<Arc<Vec<ReferenceIdentity>>, StoreError>;
}

/// Where documents and pipeline results live.
pub trait ResultStore: Send + Sync {
    fn get_document(&self, id: i64) -> Result<Option<Document>, StoreError>;

    /// Compare-and-set status change. Returns `false` when the document was
    /// not in `from` (someone else already moved it).
    fn transition_status(
        &self,
        id: i64,
        from: DocumentStatus,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    fn save_extracted_fields(&self, document_id: i64, fields: &ExtractedFields) -> Result<(), StoreError>;

    fn save_match(&self, document_id: i64, decision: &MatchDecision) -> Result<(), StoreError>;

    fn replace_mismatches(&self, document_id: i64, records: &[MismatchRecord]) -> Result<(), StoreError>;
}

/// Best-effort status broadcast. Implementations swallow their own failures.
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, update: &StatusUpdate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _ocr(_: &dyn OcrEngine) {}
        fn _roster(_: &dyn RosterProvider) {}
        fn _store(_: &dyn ResultStore) {}
        fn _notifier(_: &dyn StatusNotifier) {}
    }
}
