use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::dictionary::Dictionary;
use crate::extract::Extractor;
use crate::normalize::TextNormalizer;
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::{self, MergePolicy, OcrBackend, OcrError};
use crate::types::{ExtractedReceipt, ExtractionStatus, NormalizedLine};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

/// The result of running one receipt image through the pipeline.
#[derive(Debug, Clone)]
pub struct ReceiptAnalysis {
    /// Corrected text lines the extractor worked from.
    pub lines: Vec<NormalizedLine>,
    pub extracted: ExtractedReceipt,
}

impl ReceiptAnalysis {
    pub fn status(&self) -> ExtractionStatus {
        self.extracted.status()
    }
}

/// Orchestrates: preprocess → OCR → normalize → extract.
///
/// Holds no per-receipt state; one instance can be shared across worker
/// threads for a whole batch.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    normalizer: TextNormalizer,
    merge_policy: MergePolicy,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, dictionary: Arc<Dictionary>) -> Self {
        Self {
            recognizer,
            normalizer: TextNormalizer::new(dictionary),
            merge_policy: MergePolicy::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    /// Process a file on disk.
    pub fn process_file(&self, path: &Path) -> Result<ReceiptAnalysis, PipelineError> {
        let bytes = std::fs::read(path)?;
        self.process_bytes(&bytes)
    }

    /// Process raw image bytes. Blocks for the duration of the OCR calls.
    pub fn process_bytes(&self, data: &[u8]) -> Result<ReceiptAnalysis, PipelineError> {
        // 1. Preprocess into recognizer-ready variants.
        let buffers = preprocess::prepare_variants(data)?;

        // 2. Run OCR on every variant and keep the best line sequence.
        let recognized = recognizer::recognize_lines(&self.recognizer, &buffers, self.merge_policy)?;

        // 3. Dictionary correction.
        let lines = self.normalizer.normalize_lines(&recognized);

        // 4. Extract merchant and items.
        let extracted = Extractor::extract(&lines);

        Ok(ReceiptAnalysis { lines, extracted })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
