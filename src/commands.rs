use crate::cache::RosterCache;
use crate::config::Settings;
use crate::db::Db;
use crate::error::AppError;
use crate::excel;
use crate::models::{
    field_statuses, Document, DocumentStats, DocumentStatusView, ExtractedFieldView, MatchInfo,
};
use crate::ocr::{self, DocumentAiClient};
use crate::services::notifier::BroadcastNotifier;
use crate::services::pipeline::Pipeline;
use crate::services::roster_import::{self, ImportSummary};
use crate::services::traits::{OcrEngine, StatusNotifier};
use crate::services::worker::WorkQueue;
use crate::types::{DocumentStatus, FieldName, ReferenceIdentity, StatusUpdate};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Fields shown by `get_extracted_fields`.
const VIEW_FIELDS: [FieldName; 3] = [FieldName::PatientName, FieldName::Dob, FieldName::Doa];

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        ValidationResult {
            valid: true,
            error: None,
        }
    }

    fn invalid(msg: &str) -> Self {
        ValidationResult {
            valid: false,
            error: Some(msg.to_string()),
        }
    }
}

/// Everything an operation needs: store, roster snapshot, notifier and the
/// background queue feeding the pipeline.
pub struct AppState {
    pub settings: Settings,
    pub db: Arc<Db>,
    pub roster: Arc<RosterCache>,
    pub notifier: Arc<BroadcastNotifier>,
    queue: WorkQueue,
}

impl AppState {
    /// Open the data directory with the Document AI client configured from
    /// `settings`.
    pub fn open(settings: Settings) -> Result<Self, AppError> {
        let ocr = Arc::new(DocumentAiClient::new(settings.ocr.clone()));
        Self::with_ocr(settings, ocr)
    }

    pub fn with_ocr(settings: Settings, ocr: Arc<dyn OcrEngine>) -> Result<Self, AppError> {
        fs::create_dir_all(settings.uploads_dir())?;
        let db = Arc::new(Db::new(settings.database_path())?);
        let roster = Arc::new(RosterCache::new(db.clone()));
        let notifier = Arc::new(BroadcastNotifier::new());
        let pipeline = Arc::new(Pipeline::new(ocr, roster.clone(), db.clone(), notifier.clone()));
        let queue = WorkQueue::start(pipeline, settings.workers);
        tracing::info!(data_dir = %settings.data_dir.display(), "app state ready");
        Ok(AppState {
            settings,
            db,
            roster,
            notifier,
            queue,
        })
    }

    /// Validate, copy into the uploads folder, register as `pending` and
    /// queue for processing.
    pub fn upload_document(&self, path: &Path) -> Result<DocumentStatusView, AppError> {
        let check = validate_document_file(path)?;
        if !check.valid {
            return Err(AppError::Validation(check.error.unwrap_or_default()));
        }
        let mime_type = ocr::mime_type_for(path)
            .ok_or_else(|| AppError::Validation("Unsupported file type.".to_string()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Validation("Invalid file name.".to_string()))?
            .to_string();

        let stored = unique_upload_path(&self.settings.uploads_dir(), &filename);
        fs::copy(path, &stored)?;
        let stored_str = stored.to_string_lossy().to_string();
        let id = self.db.create_document(&filename, &stored_str, mime_type)?;
        tracing::info!(document_id = id, filename = %filename, "document uploaded");

        // Read back before queueing: a worker may claim it straight away.
        let view = self.get_document_status(id)?;
        self.notifier.notify(&StatusUpdate {
            document_id: id,
            status: DocumentStatus::Pending,
            message: "Document uploaded".to_string(),
        });
        if !self.queue.submit(id) {
            tracing::warn!(document_id = id, "work queue closed; document left pending");
        }
        Ok(view)
    }

    pub fn get_document_status(&self, id: i64) -> Result<DocumentStatusView, AppError> {
        Ok(DocumentStatusView::from(&self.document(id)?))
    }

    pub fn list_documents(&self) -> Result<Vec<Document>, AppError> {
        Ok(self.db.list_documents()?)
    }

    /// Patient name, DOB and DOA as extracted, with display names.
    pub fn get_extracted_fields(&self, id: i64) -> Result<Vec<ExtractedFieldView>, AppError> {
        self.document(id)?;
        let fields = self.db.get_extracted_fields(id)?;
        Ok(VIEW_FIELDS
            .iter()
            .filter_map(|f| fields.get(f))
            .map(ExtractedFieldView::from)
            .collect())
    }

    pub fn get_match_info(&self, id: i64) -> Result<MatchInfo, AppError> {
        let doc = self.document(id)?;
        let fields = self.db.get_extracted_fields(id)?;
        let stored = self.db.get_match(id)?;
        let matched_client = match stored.as_ref().map(|m| &m.decision) {
            Some(d) if d.decision.has_identity() => match d.reference_id {
                Some(rid) => self.db.get_reference_identity(rid)?,
                None => None,
            },
            _ => None,
        };
        let mismatches = self.db.get_mismatches(id)?;
        let fields = field_statuses(
            &fields,
            stored.as_ref().map(|m| &m.decision),
            matched_client.as_ref(),
            &mismatches,
        );
        Ok(MatchInfo {
            document_id: id,
            filename: doc.filename,
            match_decision: stored,
            matched_client,
            fields,
            mismatches,
        })
    }

    pub fn get_stats(&self) -> Result<DocumentStats, AppError> {
        Ok(self.db.stats()?)
    }

    /// Import a roster file; later pipelines see the new entries.
    pub fn upload_roster(&self, path: &Path) -> Result<ImportSummary, AppError> {
        let summary = roster_import::import_roster(&self.db, path)?;
        self.roster.invalidate();
        Ok(summary)
    }

    pub fn list_roster(&self) -> Result<Vec<ReferenceIdentity>, AppError> {
        Ok(self.db.list_roster()?)
    }

    /// Write the review workbook for a document and record the export.
    pub fn export_report(&self, id: i64, out: Option<&Path>) -> Result<PathBuf, AppError> {
        let doc = self.document(id)?;
        let info = self.get_match_info(id)?;
        let fields = self.db.get_extracted_fields(id)?;
        let path = excel::resolve_report_path(out, &self.settings.exports_dir(), id)?;
        excel::write_document_report(&path, &info, &doc.updated_at, fields.get(&FieldName::ServiceDates))?;
        self.db.record_export(id, &path.to_string_lossy())?;
        Ok(path)
    }

    /// Delete every document, its results and its uploaded file. The
    /// roster is kept. Returns the number of documents removed.
    pub fn purge_documents(&self) -> Result<usize, AppError> {
        let paths = self.db.purge_documents()?;
        for p in &paths {
            if let Err(e) = fs::remove_file(p) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %p, error = %e, "could not remove upload");
                }
            }
        }
        tracing::info!(documents = paths.len(), "documents purged");
        Ok(paths.len())
    }

    pub fn ocr_status(&self) -> &'static str {
        ocr::ocr_status(&self.settings.ocr)
    }

    /// Stop taking work and wait for queued documents to finish.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    fn document(&self, id: i64) -> Result<Document, AppError> {
        self.db.get_document(id)?.ok_or(AppError::DocumentNotFound(id))
    }
}

/// Check an upload before it is accepted: supported extension, size limit,
/// and a `%PDF-` header for PDFs.
pub fn validate_document_file(path: &Path) -> Result<ValidationResult, AppError> {
    if !path.exists() {
        return Ok(ValidationResult::invalid("File not found."));
    }
    let Some(mime_type) = ocr::mime_type_for(path) else {
        return Ok(ValidationResult::invalid(
            "Unsupported file type. Allowed: PDF, JPG, JPEG, PNG, TIFF, TIF",
        ));
    };
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_UPLOAD_BYTES {
        return Ok(ValidationResult::invalid("File too large (max 50MB)."));
    }
    if metadata.len() == 0 {
        return Ok(ValidationResult::invalid("File is empty."));
    }
    if mime_type == "application/pdf" {
        let mut f = fs::File::open(path)?;
        let mut header = [0u8; 8];
        if f.read(&mut header).unwrap_or(0) < 5 {
            return Ok(ValidationResult::invalid("Not a valid PDF (could not read header)."));
        }
        if !header.starts_with(b"%PDF-") {
            return Ok(ValidationResult::invalid("Not a valid PDF file."));
        }
    }
    Ok(ValidationResult::ok())
}

fn unique_upload_path(dir: &Path, filename: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let mut p = dir.join(format!("{}_{}", stamp, filename));
    let mut counter = 2u32;
    while p.exists() {
        p = dir.join(format!("{}_{}_{}", stamp, counter, filename));
        counter += 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        path
    }

    #[test]
    fn validation_rules() {
        let dir = tempfile::tempdir().unwrap();
        let ok_pdf = write(dir.path(), "a.pdf", b"%PDF-1.7\n...");
        let bad_pdf = write(dir.path(), "b.pdf", b"hello world");
        let short_pdf = write(dir.path(), "c.pdf", b"%P");
        let png = write(dir.path(), "d.png", b"\x89PNG\r\n");
        let txt = write(dir.path(), "e.txt", b"text");
        let empty = write(dir.path(), "f.jpg", b"");

        assert!(validate_document_file(&ok_pdf).unwrap().valid);
        assert!(validate_document_file(&png).unwrap().valid);
        assert_eq!(
            validate_document_file(&bad_pdf).unwrap().error.as_deref(),
            Some("Not a valid PDF file.")
        );
        assert!(!validate_document_file(&short_pdf).unwrap().valid);
        assert!(!validate_document_file(&txt).unwrap().valid);
        assert!(!validate_document_file(&empty).unwrap().valid);
        assert_eq!(
            validate_document_file(&dir.path().join("missing.pdf")).unwrap().error.as_deref(),
            Some("File not found.")
        );
    }

    struct BlankOcr;

    impl OcrEngine for BlankOcr {
        fn process(&self, _path: &Path, _mime_type: &str) -> crate::types::OcrResult {
            crate::types::OcrResult {
                success: true,
                ..Default::default()
            }
        }
    }

    #[test]
    fn upload_acknowledges_pending_even_with_idle_workers() {
        let data = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_data_dir(data.path());
        settings.workers = 4;
        let state = AppState::with_ocr(settings, Arc::new(BlankOcr)).unwrap();
        for i in 0..20 {
            let file = write(data.path(), &format!("scan{i}.pdf"), b"%PDF-1.4");
            let view = state.upload_document(&file).unwrap();
            assert_eq!(view.status, DocumentStatus::Pending);
        }
        state.shutdown();
        assert!(state
            .list_documents()
            .unwrap()
            .iter()
            .all(|d| d.status == DocumentStatus::Completed));
    }

    #[test]
    fn upload_paths_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_upload_path(dir.path(), "scan.pdf");
        write(dir.path(), first.file_name().unwrap().to_str().unwrap(), b"x");
        let second = unique_upload_path(dir.path(), "scan.pdf");
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("scan.pdf"));
    }
}
