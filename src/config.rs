use std::path::{Path, PathBuf};

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;

/// Google Document AI processor settings. Any of these may be missing; the
/// OCR client reports which one when it is first needed.
#[derive(Debug, Clone, Default)]
pub struct OcrSettings {
    pub project_id: Option<String>,
    pub location: String,
    pub processor_id: Option<String>,
    pub access_token: Option<String>,
    /// Overrides `https://{location}-documentai.googleapis.com`.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl OcrSettings {
    pub fn is_configured(&self) -> bool {
        [&self.project_id, &self.processor_id, &self.access_token]
            .iter()
            .all(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
    }

    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://{}-documentai.googleapis.com", self.location),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub workers: usize,
    pub log_level: String,
    pub ocr: OcrSettings,
}

impl Settings {
    /// Load `.env` files, then read settings from the environment.
    ///
    /// The working directory `.env` is read first; `<data_dir>/.env` fills in
    /// anything still unset, so credentials can live next to the database.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let data_dir = env_opt("SCANNER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let env_path = data_dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
        Self::from_env_with_data_dir(data_dir)
    }

    pub fn from_env_with_data_dir(data_dir: PathBuf) -> Self {
        let workers = env_opt("SCANNER_WORKERS")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_WORKERS)
            .max(1);
        Settings {
            data_dir,
            workers,
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            ocr: OcrSettings {
                project_id: env_opt("DOCUMENT_AI_PROJECT_ID"),
                location: env_opt("DOCUMENT_AI_LOCATION").unwrap_or_else(|| "us".to_string()),
                processor_id: env_opt("DOCUMENT_AI_PROCESSOR_ID"),
                access_token: env_opt("DOCUMENT_AI_ACCESS_TOKEN"),
                endpoint: env_opt("DOCUMENT_AI_ENDPOINT"),
                timeout_secs: env_opt("DOCUMENT_AI_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_OCR_TIMEOUT_SECS),
            },
        }
    }

    /// Settings rooted at `data_dir` with no OCR credentials. Used by tests.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Settings {
            data_dir: data_dir.to_path_buf(),
            workers: 1,
            log_level: "info".to_string(),
            ocr: OcrSettings {
                location: "us".to_string(),
                timeout_secs: DEFAULT_OCR_TIMEOUT_SECS,
                ..Default::default()
            },
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mismatch_scanner.db")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mismatch-scanner")
}
