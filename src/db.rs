use crate::error::StoreError;
use crate::models::{Document, DocumentStats, StoredMatch};
use crate::services::roster_import::RosterRow;
use crate::services::traits::{ResultStore, RosterProvider};
use crate::types::{
    Decision, DocumentStatus, ExtractedField, ExtractedFields, FieldName, MatchDecision, MismatchRecord,
    ReferenceIdentity,
};
use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // --- documents -------------------------------------------------------

    /// Register an uploaded document as `pending`.
    pub fn create_document(&self, filename: &str, stored_path: &str, mime_type: &str) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO documents (filename, stored_path, mime_type, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![filename, stored_path, mime_type, DocumentStatus::Pending, now, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                "SELECT id, filename, stored_path, mime_type, status, error_message, created_at, updated_at FROM documents WHERE id = ?",
                params![id],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    /// Newest first.
    pub fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, stored_path, mime_type, status, error_message, created_at, updated_at FROM documents ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], document_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn transition_status(
        &self,
        id: i64,
        from: DocumentStatus,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status = ?",
            params![to, error_message, now, id, from],
        )?;
        Ok(changed == 1)
    }

    /// Delete every document and its artifacts. Returns the stored file
    /// paths so the caller can remove the uploads.
    pub fn purge_documents(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let paths = {
            let mut stmt = tx.prepare("SELECT stored_path FROM documents")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute_batch(
            "
            DELETE FROM mismatches;
            DELETE FROM matches;
            DELETE FROM extracted_fields;
            DELETE FROM exports;
            DELETE FROM documents;
            ",
        )?;
        tx.commit()?;
        Ok(paths)
    }

    pub fn stats(&self) -> Result<DocumentStats, StoreError> {
        let conn = self.conn()?;
        let (total_documents, completed, processing, failed) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status IN ('pending', 'processing') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
             FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let total_matches = conn.query_row("SELECT COUNT(*) FROM matches", [], |r| r.get(0))?;
        let total_mismatches = conn.query_row("SELECT COUNT(*) FROM mismatches", [], |r| r.get(0))?;
        Ok(DocumentStats {
            total_documents,
            completed,
            processing,
            failed,
            total_matches,
            total_mismatches,
        })
    }

    // --- pipeline results ------------------------------------------------

    /// Upsert per (document, field). If the table predates page numbers the
    /// rows are saved without them rather than lost.
    pub fn save_extracted_fields(&self, document_id: i64, fields: &ExtractedFields) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        match upsert_fields(&mut conn, document_id, fields, true) {
            Err(StoreError::Sqlite(e)) if is_missing_column(&e, "page_number") => {
                tracing::warn!(document_id, error = %e, "saving extracted fields without page numbers");
                upsert_fields(&mut conn, document_id, fields, false)
            }
            other => other,
        }
    }

    pub fn get_extracted_fields(&self, document_id: i64) -> Result<ExtractedFields, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT field_name, raw_value, normalized_value, confidence, page_number FROM extracted_fields WHERE document_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok(ExtractedField {
                field_name: row.get(0)?,
                raw_value: row.get(1)?,
                normalized_value: row.get(2)?,
                confidence: row.get(3)?,
                page_number: row.get::<_, Option<u32>>(4)?.unwrap_or(1),
            })
        })?;
        let mut fields = ExtractedFields::new();
        for field in rows {
            let field = field?;
            fields.insert(field.field_name, field);
        }
        Ok(fields)
    }

    /// One decision per document; a re-run replaces it.
    pub fn save_match(&self, document_id: i64, decision: &MatchDecision) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO matches (document_id, client_id, score, decision, matched_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET client_id = excluded.client_id, score = excluded.score,
                 decision = excluded.decision, matched_at = excluded.matched_at",
            params![document_id, decision.reference_id, decision.score, decision.decision, now],
        )?;
        Ok(())
    }

    pub fn get_match(&self, document_id: i64) -> Result<Option<StoredMatch>, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT client_id, score, decision, matched_at FROM matches WHERE document_id = ?",
                params![document_id],
                |row| {
                    Ok(StoredMatch {
                        decision: MatchDecision {
                            reference_id: row.get(0)?,
                            score: row.get(1)?,
                            decision: row.get(2)?,
                        },
                        matched_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    /// Mismatches for a document are written as a unit.
    pub fn replace_mismatches(&self, document_id: i64, records: &[MismatchRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        match insert_mismatches(&mut conn, document_id, records, true) {
            Err(StoreError::Sqlite(e)) if is_missing_column(&e, "page_number") => {
                tracing::warn!(document_id, error = %e, "saving mismatches without page numbers");
                insert_mismatches(&mut conn, document_id, records, false)
            }
            other => other,
        }
    }

    pub fn get_mismatches(&self, document_id: i64) -> Result<Vec<MismatchRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT field_name, expected_value, observed_value, page_number FROM mismatches WHERE document_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok(MismatchRecord {
                field: row.get(0)?,
                expected_value: row.get(1)?,
                observed_value: row.get(2)?,
                page_number: row.get::<_, Option<u32>>(3)?.unwrap_or(1),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_export(&self, document_id: i64, path: &str) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO exports (document_id, file_path, created_at) VALUES (?, ?, ?)",
            params![document_id, path, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // --- roster ----------------------------------------------------------

    pub fn list_roster(&self) -> Result<Vec<ReferenceIdentity>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, dob, doa FROM client_profiles ORDER BY id")?;
        let rows = stmt.query_map([], identity_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_reference_identity(&self, id: i64) -> Result<Option<ReferenceIdentity>, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, name, dob, doa FROM client_profiles WHERE id = ?",
                params![id],
                identity_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Lowercased names already on the roster.
    pub fn roster_names(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM client_profiles")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = HashSet::new();
        for name in rows {
            names.insert(name?.trim().to_lowercase());
        }
        Ok(names)
    }

    /// Insert roster rows; names already present (case-insensitively) are
    /// skipped. Returns how many rows were inserted.
    pub fn insert_roster_rows(&self, rows: &[RosterRow]) -> Result<usize, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO client_profiles (name, dob, doa, created_at) VALUES (?, ?, ?, ?)")?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.name,
                    row.date_of_birth.map(|d| d.format(STORED_DATE_FORMAT).to_string()),
                    row.date_of_accident.map(|d| d.format(STORED_DATE_FORMAT).to_string()),
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS client_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            dob TEXT,
            doa TEXT,
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_client_profiles_name ON client_profiles(lower(trim(name)));
        CREATE TABLE IF NOT EXISTS extracted_fields (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            field_name TEXT NOT NULL,
            raw_value TEXT NOT NULL,
            normalized_value TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(document_id, field_name),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        );
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL UNIQUE,
            client_id INTEGER,
            score REAL NOT NULL,
            decision TEXT NOT NULL,
            matched_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id),
            FOREIGN KEY (client_id) REFERENCES client_profiles(id)
        );
        CREATE TABLE IF NOT EXISTS mismatches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            field_name TEXT NOT NULL,
            expected_value TEXT NOT NULL,
            observed_value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        );
        CREATE TABLE IF NOT EXISTS exports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        );
        CREATE INDEX IF NOT EXISTS idx_extracted_fields_document ON extracted_fields(document_id);
        CREATE INDEX IF NOT EXISTS idx_mismatches_document ON mismatches(document_id);
        ",
    )?;

    // Migration 002: page numbers on extracted fields and mismatches
    let current_version: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
        .unwrap_or(1);
    if current_version < 2 {
        for alter_sql in &[
            "ALTER TABLE extracted_fields ADD COLUMN page_number INTEGER DEFAULT 1",
            "ALTER TABLE mismatches ADD COLUMN page_number INTEGER DEFAULT 1",
        ] {
            if let Err(e) = conn.execute(alter_sql, []) {
                if !e.to_string().contains("duplicate column") {
                    return Err(e.into());
                }
            }
        }
        conn.execute("UPDATE schema_version SET version = 2", [])?;
    }
    Ok(())
}

fn is_missing_column(e: &rusqlite::Error, column: &str) -> bool {
    let msg = e.to_string();
    msg.contains(column) && (msg.contains("no column") || msg.contains("no such column"))
}

fn upsert_fields(
    conn: &mut Connection,
    document_id: i64,
    fields: &ExtractedFields,
    with_pages: bool,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    {
        let sql = if with_pages {
            "INSERT INTO extracted_fields (document_id, field_name, raw_value, normalized_value, confidence, created_at, page_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(document_id, field_name) DO UPDATE SET raw_value = excluded.raw_value,
                 normalized_value = excluded.normalized_value, confidence = excluded.confidence,
                 page_number = excluded.page_number"
        } else {
            "INSERT INTO extracted_fields (document_id, field_name, raw_value, normalized_value, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(document_id, field_name) DO UPDATE SET raw_value = excluded.raw_value,
                 normalized_value = excluded.normalized_value, confidence = excluded.confidence"
        };
        let mut stmt = tx.prepare(sql)?;
        for f in fields.values() {
            if with_pages {
                stmt.execute(params![
                    document_id,
                    f.field_name,
                    f.raw_value,
                    f.normalized_value,
                    f.confidence,
                    now,
                    f.page_number.max(1)
                ])?;
            } else {
                stmt.execute(params![document_id, f.field_name, f.raw_value, f.normalized_value, f.confidence, now])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn insert_mismatches(
    conn: &mut Connection,
    document_id: i64,
    records: &[MismatchRecord],
    with_pages: bool,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM mismatches WHERE document_id = ?", params![document_id])?;
    {
        let sql = if with_pages {
            "INSERT INTO mismatches (document_id, field_name, expected_value, observed_value, created_at, page_number) VALUES (?, ?, ?, ?, ?, ?)"
        } else {
            "INSERT INTO mismatches (document_id, field_name, expected_value, observed_value, created_at) VALUES (?, ?, ?, ?, ?)"
        };
        let mut stmt = tx.prepare(sql)?;
        for r in records {
            if with_pages {
                stmt.execute(params![document_id, r.field, r.expected_value, r.observed_value, now, r.page_number.max(1)])?;
            } else {
                stmt.execute(params![document_id, r.field, r.expected_value, r.observed_value, now])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        stored_path: row.get(2)?,
        mime_type: row.get(3)?,
        status: row.get(4)?,
        error_message: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReferenceIdentity> {
    let parse = |s: Option<String>| s.and_then(|s| NaiveDate::parse_from_str(&s, STORED_DATE_FORMAT).ok());
    Ok(ReferenceIdentity {
        id: row.get(0)?,
        name: row.get(1)?,
        date_of_birth: parse(row.get(2)?),
        date_of_accident: parse(row.get(3)?),
    })
}

fn text_enum<T>(value: ValueRef<'_>, parse: fn(&str) -> Option<T>, what: &str) -> FromSqlResult<T> {
    let s = value.as_str()?;
    parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown {}: {}", what, s).into()))
}

impl FromSql for DocumentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value, DocumentStatus::parse, "document status")
    }
}

impl ToSql for DocumentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for FieldName {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value, FieldName::parse, "field name")
    }
}

impl ToSql for FieldName {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Decision {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_enum(value, Decision::parse, "match decision")
    }
}

impl ToSql for Decision {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl ResultStore for Db {
    fn get_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        Db::get_document(self, id)
    }

    fn transition_status(
        &self,
        id: i64,
        from: DocumentStatus,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        Db::transition_status(self, id, from, to, error_message)
    }

    fn save_extracted_fields(&self, document_id: i64, fields: &ExtractedFields) -> Result<(), StoreError> {
        Db::save_extracted_fields(self, document_id, fields)
    }

    fn save_match(&self, document_id: i64, decision: &MatchDecision) -> Result<(), StoreError> {
        Db::save_match(self, document_id, decision)
    }

    fn replace_mismatches(&self, document_id: i64, records: &[MismatchRecord]) -> Result<(), StoreError> {
        Db::replace_mismatches(self, document_id, records)
    }
}

impl RosterProvider for Db {
    fn list_reference_identities(&self) -> Result<Arc<Vec<ReferenceIdentity>>, StoreError> {
        Ok(Arc::new(self.list_roster()?))
    }
}
