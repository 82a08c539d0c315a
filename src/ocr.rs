use crate::config::OcrSettings;
use crate::error::OcrError;
use crate::services::extraction::DEFAULT_ENTITY_CONFIDENCE;
use crate::services::traits::OcrEngine;
use crate::types::{OcrEntity, OcrResult};
use base64::Engine as _;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Google Document AI `:process` client (REST, raw document upload).
pub struct DocumentAiClient {
    settings: OcrSettings,
}

impl DocumentAiClient {
    pub fn new(settings: OcrSettings) -> Self {
        DocumentAiClient { settings }
    }

    fn process_url(&self) -> Result<String, OcrError> {
        let project = required(&self.settings.project_id, "DOCUMENT_AI_PROJECT_ID")?;
        let processor = required(&self.settings.processor_id, "DOCUMENT_AI_PROCESSOR_ID")?;
        Ok(format!(
            "{}/v1/projects/{}/locations/{}/processors/{}:process",
            self.settings.base_url(),
            project,
            self.settings.location,
            processor
        ))
    }

    fn run(&self, path: &Path, mime_type: &str) -> Result<OcrResult, OcrError> {
        let url = self.process_url()?;
        let token = required(&self.settings.access_token, "DOCUMENT_AI_ACCESS_TOKEN")?;

        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::FileNotFound
            } else {
                OcrError::Read(e)
            }
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
            .map_err(|e| OcrError::Network(e.to_string()))?;

        let body = json!({
            "rawDocument": {
                "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
                "mimeType": mime_type,
            }
        });

        tracing::info!(path = %path.display(), bytes = bytes.len(), "sending document to Document AI");
        let response = client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    OcrError::Connection
                } else {
                    OcrError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OcrError::Http {
                status: status.as_u16(),
                body: if body.is_empty() {
                    "Invalid processor or access token?".to_string()
                } else {
                    body
                },
            });
        }

        let json: Value = response
            .json()
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;
        parse_process_response(&json)
    }
}

impl OcrEngine for DocumentAiClient {
    fn process(&self, path: &Path, mime_type: &str) -> OcrResult {
        match self.run(path, mime_type) {
            Ok(result) => {
                tracing::info!(
                    chars = result.full_text.len(),
                    entities = result.entities.len(),
                    pages = result.pages,
                    "OCR complete"
                );
                result
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "OCR failed");
                OcrResult::failed(e.to_string())
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, OcrError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(OcrError::NotConfigured(key))
}

/// "configured" when project, processor and token are all set.
pub fn ocr_status(settings: &OcrSettings) -> &'static str {
    if settings.is_configured() {
        "configured"
    } else {
        "not_configured"
    }
}

/// MIME type from the file extension; uploads are limited to these.
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Turn a `:process` response body into an [`OcrResult`].
///
/// Entities of the same type collapse to the one with the highest
/// confidence; the first one seen wins ties.
pub fn parse_process_response(json: &Value) -> Result<OcrResult, OcrError> {
    let document = json
        .get("document")
        .ok_or_else(|| OcrError::InvalidResponse("no document in response".to_string()))?;
    let full_text = document.get("text").and_then(|t| t.as_str()).unwrap_or("").to_string();
    let empty: Vec<Value> = vec![];
    let pages = document.get("pages").and_then(|p| p.as_array()).unwrap_or(&empty);
    let raw_entities = document.get("entities").and_then(|e| e.as_array()).unwrap_or(&empty);

    let mut entities: Vec<OcrEntity> = Vec::new();
    let mut entity_pages: HashMap<String, u32> = HashMap::new();
    for raw in raw_entities {
        let entity_type = match raw.get("type").and_then(|t| t.as_str()) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => continue,
        };
        let value = entity_value(raw, &full_text);
        if value.trim().is_empty() {
            continue;
        }
        let confidence = raw
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(DEFAULT_ENTITY_CONFIDENCE);
        let page = entity_page(raw, pages).unwrap_or(1);

        let entity = OcrEntity {
            entity_type: entity_type.clone(),
            value,
            confidence: Some(confidence),
            page_number: Some(page),
        };
        match entities.iter_mut().find(|e| e.entity_type == entity_type) {
            Some(existing) => {
                if existing.confidence.unwrap_or(0.0) < confidence {
                    *existing = entity;
                    entity_pages.insert(entity_type, page);
                } else {
                    tracing::debug!(entity_type = %entity_type, confidence, "skipping lower-confidence entity");
                }
            }
            None => {
                entities.push(entity);
                entity_pages.insert(entity_type, page);
            }
        }
    }

    Ok(OcrResult {
        success: true,
        full_text,
        entities,
        entity_pages,
        pages: pages.len() as u32,
        error: None,
    })
}

/// mentionText, then the first text anchor segment, then normalizedValue.text.
fn entity_value(entity: &Value, full_text: &str) -> String {
    if let Some(s) = entity.get("mentionText").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
        return s.to_string();
    }
    if let Some((start, end)) = first_segment(entity.get("textAnchor")) {
        let s: String = full_text.chars().skip(start).take(end.saturating_sub(start)).collect();
        if !s.is_empty() {
            return s;
        }
    }
    if let Some(s) = entity
        .get("textAnchor")
        .and_then(|a| a.get("content"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return s.to_string();
    }
    entity
        .get("normalizedValue")
        .and_then(|n| n.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// 1-based page. Document AI pages are 0-based and a zero page is omitted
/// from the JSON, so a page ref without `page` means the first page.
fn entity_page(entity: &Value, pages: &[Value]) -> Option<u32> {
    if let Some(page_ref) = entity
        .get("pageAnchor")
        .and_then(|a| a.get("pageRefs"))
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
    {
        let page = page_ref.get("page").map(json_index).unwrap_or(Some(0));
        if let Some(page) = page {
            return Some(page as u32 + 1);
        }
    }

    // Fall back to the page whose layout span contains the entity's text.
    let (index, _) = first_segment(entity.get("textAnchor"))?;
    pages.iter().position(|page| {
        segments(page.get("layout").and_then(|l| l.get("textAnchor")))
            .iter()
            .any(|&(start, end)| start <= index && index <= end)
    })
    .map(|i| i as u32 + 1)
}

fn first_segment(anchor: Option<&Value>) -> Option<(usize, usize)> {
    segments(anchor).into_iter().next()
}

fn segments(anchor: Option<&Value>) -> Vec<(usize, usize)> {
    let Some(list) = anchor.and_then(|a| a.get("textSegments")).and_then(|s| s.as_array()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|seg| {
            let start = seg.get("startIndex").map(json_index).unwrap_or(Some(0))?;
            let end = seg.get("endIndex").and_then(json_index)?;
            Some((start, end))
        })
        .collect()
}

/// int64 fields come back as JSON strings; accept numbers too.
fn json_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
