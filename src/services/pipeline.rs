//! Per-document unit of work: OCR, extraction, matching and mismatch
//! detection, with the document's status moved along the way.

use crate::error::PipelineError;
use crate::models::Document;
use crate::services::extraction::extract_fields;
use crate::services::matching::match_identity;
use crate::services::mismatch::detect_mismatches;
use crate::services::traits::{OcrEngine, ResultStore, RosterProvider, StatusNotifier};
use crate::types::{DocumentStatus, FieldName, StatusUpdate};
use std::path::Path;
use std::sync::Arc;

pub struct Pipeline {
    ocr: Arc<dyn OcrEngine>,
    roster: Arc<dyn RosterProvider>,
    store: Arc<dyn ResultStore>,
    notifier: Arc<dyn StatusNotifier>,
}

impl Pipeline {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        roster: Arc<dyn RosterProvider>,
        store: Arc<dyn ResultStore>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Pipeline {
            ocr,
            roster,
            store,
            notifier,
        }
    }

    /// Process one pending document to a terminal status.
    ///
    /// A document that is no longer `pending` is left alone and its current
    /// status returned. Collaborator failures end in `failed` and are not
    /// returned as errors; `Err` means the status itself could not be
    /// recorded.
    pub fn process_document(&self, document_id: i64) -> Result<DocumentStatus, PipelineError> {
        let doc = self
            .store
            .get_document(document_id)?
            .ok_or(PipelineError::DocumentNotFound(document_id))?;

        if !self
            .store
            .transition_status(document_id, DocumentStatus::Pending, DocumentStatus::Processing, None)?
        {
            tracing::debug!(document_id, status = %doc.status, "document already picked up; skipping");
            let current = self.store.get_document(document_id)?.map(|d| d.status);
            return Ok(current.unwrap_or(doc.status));
        }
        self.notify(document_id, DocumentStatus::Processing, "Processing document...");

        match self.run(&doc) {
            Ok(()) => {
                self.finish(document_id, DocumentStatus::Completed, None)?;
                self.notify(document_id, DocumentStatus::Completed, "Document processed successfully");
                Ok(DocumentStatus::Completed)
            }
            Err(e) => {
                let message = match &e {
                    PipelineError::Ocr(_) => e.to_string(),
                    _ => format!("Processing failed: {}", e),
                };
                tracing::warn!(document_id, error = %message, "document failed");
                self.finish(document_id, DocumentStatus::Failed, Some(&message))?;
                self.notify(document_id, DocumentStatus::Failed, &message);
                Ok(DocumentStatus::Failed)
            }
        }
    }

    fn run(&self, doc: &Document) -> Result<(), PipelineError> {
        let ocr = self.ocr.process(Path::new(&doc.stored_path), &doc.mime_type);
        if !ocr.success {
            return Err(PipelineError::Ocr(
                ocr.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        self.notify(doc.id, DocumentStatus::Processing, "Extracting fields...");
        let fields = extract_fields(&ocr);
        self.store.save_extracted_fields(doc.id, &fields)?;
        tracing::info!(document_id = doc.id, fields = fields.len(), "fields extracted");

        let roster = self.roster.list_reference_identities()?;
        let name = fields.get(&FieldName::PatientName).map(|f| f.normalized_value.as_str());
        let decision = match_identity(name, &roster);
        self.store.save_match(doc.id, &decision)?;

        if decision.decision.has_identity() {
            let reference = decision
                .reference_id
                .and_then(|id| roster.iter().find(|r| r.id == id));
            if let Some(reference) = reference {
                let mismatches = detect_mismatches(&fields, reference);
                if !mismatches.is_empty() {
                    tracing::info!(document_id = doc.id, count = mismatches.len(), "date mismatches found");
                }
                self.store.replace_mismatches(doc.id, &mismatches)?;
            }
        }
        Ok(())
    }

    fn finish(&self, document_id: i64, to: DocumentStatus, error_message: Option<&str>) -> Result<(), PipelineError> {
        if !self
            .store
            .transition_status(document_id, DocumentStatus::Processing, to, error_message)?
        {
            tracing::warn!(document_id, status = %to, "status changed underneath the pipeline");
        }
        Ok(())
    }

    fn notify(&self, document_id: i64, status: DocumentStatus, message: &str) {
        self.notifier.notify(&StatusUpdate {
            document_id,
            status,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::error::StoreError;
    use crate::services::roster_import::RosterRow;
    use crate::types::{Decision, OcrEntity, OcrResult, ReferenceIdentity};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeOcr {
        result: OcrResult,
        calls: AtomicUsize,
    }

    impl FakeOcr {
        fn returning(result: OcrResult) -> Arc<Self> {
            Arc::new(FakeOcr {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl OcrEngine for FakeOcr {
        fn process(&self, _path: &Path, _mime_type: &str) -> OcrResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        updates: Mutex<Vec<StatusUpdate>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<(DocumentStatus, String)> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|u| (u.status, u.message.clone()))
                .collect()
        }
    }

    impl StatusNotifier for RecordingNotifier {
        fn notify(&self, update: &StatusUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }
    }

    struct BrokenRoster;

    impl RosterProvider for BrokenRoster {
        fn list_reference_identities(&self) -> Result<Arc<Vec<ReferenceIdentity>>, StoreError> {
            Err(StoreError::LockPoisoned)
        }
    }

    struct Harness {
        db: Arc<Db>,
        ocr: Arc<FakeOcr>,
        notifier: Arc<RecordingNotifier>,
        pipeline: Pipeline,
    }

    fn harness(ocr: OcrResult, roster: &[RosterRow]) -> Harness {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.insert_roster_rows(roster).unwrap();
        let ocr = FakeOcr::returning(ocr);
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(ocr.clone(), db.clone(), db.clone(), notifier.clone());
        Harness {
            db,
            ocr,
            notifier,
            pipeline,
        }
    }

    fn jane(dob: (i32, u32, u32)) -> RosterRow {
        RosterRow {
            name: "Jane Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(dob.0, dob.1, dob.2),
            date_of_accident: None,
        }
    }

    fn ocr_with(entities: Vec<OcrEntity>) -> OcrResult {
        OcrResult {
            success: true,
            entities,
            pages: 1,
            ..Default::default()
        }
    }

    fn new_document(db: &Db) -> i64 {
        db.create_document("scan.pdf", "/data/uploads/scan.pdf", "application/pdf")
            .unwrap()
    }

    #[test]
    fn matched_document_completes_without_mismatches() {
        let h = harness(
            ocr_with(vec![
                OcrEntity::new("patient name", "Jane Doe", 0.9),
                OcrEntity::new("dob", "Jan 2 1990", 0.9),
            ]),
            &[jane((1990, 1, 2))],
        );
        let id = new_document(&h.db);

        assert_eq!(h.pipeline.process_document(id).unwrap(), DocumentStatus::Completed);

        let fields = h.db.get_extracted_fields(id).unwrap();
        assert_eq!(fields[&FieldName::PatientName].normalized_value, "jane doe");
        assert_eq!(fields[&FieldName::Dob].normalized_value, "01/02/1990");

        let stored = h.db.get_match(id).unwrap().unwrap();
        assert_eq!(stored.decision.decision, Decision::Match);
        assert!(stored.decision.score > 99.0);
        assert_eq!(stored.decision.reference_id, Some(h.db.list_roster().unwrap()[0].id));

        assert!(h.db.get_mismatches(id).unwrap().is_empty());
        assert_eq!(h.db.get_document(id).unwrap().unwrap().status, DocumentStatus::Completed);
        assert_eq!(
            h.notifier.messages(),
            vec![
                (DocumentStatus::Processing, "Processing document...".to_string()),
                (DocumentStatus::Processing, "Extracting fields...".to_string()),
                (DocumentStatus::Completed, "Document processed successfully".to_string()),
            ]
        );
    }

    #[test]
    fn differing_birth_date_is_recorded() {
        let h = harness(
            ocr_with(vec![
                OcrEntity::new("patient_name", "Jane Doe", 0.9),
                OcrEntity::new("date of birth", "01/02/1990", 0.9).on_page(2),
            ]),
            &[jane((1990, 2, 1))],
        );
        let id = new_document(&h.db);
        h.pipeline.process_document(id).unwrap();

        let mismatches = h.db.get_mismatches(id).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, FieldName::Dob);
        assert_eq!(mismatches[0].expected_value, "02/01/1990");
        assert_eq!(mismatches[0].observed_value, "01/02/1990");
        assert_eq!(mismatches[0].page_number, 2);
    }

    #[test]
    fn ocr_failure_fails_the_document() {
        let h = harness(OcrResult::failed("quota exceeded"), &[]);
        let id = new_document(&h.db);

        assert_eq!(h.pipeline.process_document(id).unwrap(), DocumentStatus::Failed);

        let doc = h.db.get_document(id).unwrap().unwrap();
        assert_eq!(doc.error_message.as_deref(), Some("OCR failed: quota exceeded"));
        assert_eq!(
            h.notifier.messages().last().unwrap(),
            &(DocumentStatus::Failed, "OCR failed: quota exceeded".to_string())
        );
        assert!(h.db.get_match(id).unwrap().is_none());
    }

    #[test]
    fn missing_name_still_completes_with_no_match() {
        let h = harness(ocr_with(vec![OcrEntity::new("dob", "1/2/1990", 0.9)]), &[jane((1990, 1, 2))]);
        let id = new_document(&h.db);

        assert_eq!(h.pipeline.process_document(id).unwrap(), DocumentStatus::Completed);
        assert_eq!(h.db.get_match(id).unwrap().unwrap().decision, crate::types::MatchDecision::no_match());
        assert!(h.db.get_mismatches(id).unwrap().is_empty());
    }

    #[test]
    fn store_failure_is_reported_as_processing_failure() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            FakeOcr::returning(ocr_with(vec![OcrEntity::new("name", "Jane Doe", 0.9)])),
            Arc::new(BrokenRoster),
            db.clone(),
            notifier.clone(),
        );
        let id = new_document(&db);

        assert_eq!(pipeline.process_document(id).unwrap(), DocumentStatus::Failed);
        let doc = db.get_document(id).unwrap().unwrap();
        assert_eq!(
            doc.error_message.as_deref(),
            Some("Processing failed: Store error: Database lock poisoned")
        );
        // fields saved before the failure are kept
        assert!(db.get_extracted_fields(id).unwrap().contains_key(&FieldName::PatientName));
    }

    #[test]
    fn a_document_is_processed_once() {
        let h = harness(ocr_with(vec![OcrEntity::new("name", "Jane Doe", 0.9)]), &[jane((1990, 1, 2))]);
        let id = new_document(&h.db);

        assert_eq!(h.pipeline.process_document(id).unwrap(), DocumentStatus::Completed);
        assert_eq!(h.pipeline.process_document(id).unwrap(), DocumentStatus::Completed);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.messages().len(), 3);
    }

    #[test]
    fn unknown_document_is_an_error() {
        let h = harness(ocr_with(vec![]), &[]);
        assert!(matches!(
            h.pipeline.process_document(42),
            Err(PipelineError::DocumentNotFound(42))
        ));
    }
}
