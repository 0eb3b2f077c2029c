pub mod config;
pub mod service;

pub use config::{AnalysisConfig, AppConfig, ConfigError, OcrConfig};
pub use service::{
    AnalysisFailure, AnalysisReport, AnalyzedItem, IngestOutcome, ReceiptService, ServiceError,
    Upload,
};
