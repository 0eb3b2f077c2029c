use nbbang_ocr::normalize::{DEFAULT_MAX_DISTANCE, DEFAULT_MIN_TOKEN_CHARS};
use nbbang_ocr::{Dictionary, MergePolicy, TextNormalizer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const CONFIG_FILE: &str = "nbbang.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not determine a home directory for application data")]
    NoHomeDirectory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the database and attachment tree live. Defaults to the platform
    /// data directory.
    pub data_dir: Option<PathBuf>,
    pub ocr: OcrConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// One term per line. The bundled list is used when unset.
    pub dictionary_path: Option<PathBuf>,
    pub max_edit_distance: usize,
    pub min_token_chars: usize,
    pub merge_policy: MergePolicy,
    /// Tesseract language string, e.g. `kor+eng`.
    pub language: String,
    pub tessdata_path: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            dictionary_path: None,
            max_edit_distance: DEFAULT_MAX_DISTANCE,
            min_token_chars: DEFAULT_MIN_TOKEN_CHARS,
            merge_policy: MergePolicy::default(),
            language: "kor+eng".to_string(),
            tessdata_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Receipts analyzed concurrently.
    pub workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("com", "nbbang", "Nbbang").ok_or(ConfigError::NoHomeDirectory)
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`, or from `nbbang.toml` in the platform config
    /// directory. An explicit path must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (project_dirs()?.config_dir().join(CONFIG_FILE), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                tracing::info!("Loaded config from {}", path.display());
                Self::from_toml(&content)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().to_path_buf()),
        }
    }

    pub fn load_dictionary(&self) -> Result<Dictionary, ConfigError> {
        match &self.ocr.dictionary_path {
            Some(path) => Ok(Dictionary::load(path)?),
            None => Ok(Dictionary::builtin()),
        }
    }

    pub fn normalizer(&self, dictionary: Arc<Dictionary>) -> TextNormalizer {
        TextNormalizer::new(dictionary)
            .with_max_distance(self.ocr.max_edit_distance)
            .with_min_token_chars(self.ocr.min_token_chars)
    }

    /// At least one worker, whatever the file says.
    pub fn workers(&self) -> usize {
        self.analysis.workers.max(1)
    }
}
