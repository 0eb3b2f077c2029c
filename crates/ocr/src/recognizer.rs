use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::preprocess::PreprocessedBuffer;
use crate::types::RecognizedLine;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR produced no text for any image variant")]
    NoText,
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG image bytes and return the recognized text.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        (**self).recognize(image_bytes)
    }
}

/// How to pick one line sequence out of the per-variant candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The candidate with the most non-empty lines; earlier variants win ties.
    #[default]
    MostLines,
    /// The first candidate with any text at all.
    FirstNonEmpty,
}

/// Run `backend` over every buffer and select one authoritative line sequence.
///
/// A backend failure on one buffer only removes that candidate. The call fails
/// with [`OcrError::NoText`] when no buffer produced a line, or with the last
/// engine error when every buffer failed outright.
pub fn recognize_lines<R: OcrBackend + ?Sized>(
    backend: &R,
    buffers: &[PreprocessedBuffer],
    policy: MergePolicy,
) -> Result<Vec<RecognizedLine>, OcrError> {
    let mut best: Option<Vec<RecognizedLine>> = None;
    let mut last_error = None;
    let mut failures = 0usize;

    for buffer in buffers {
        let lines = match backend.recognize(&buffer.png) {
            Ok(text) => split_lines(&text),
            Err(e) => {
                tracing::warn!("OCR failed on {} variant: {e}", buffer.variant);
                failures += 1;
                last_error = Some(e);
                continue;
            }
        };
        tracing::debug!("{} variant yielded {} lines", buffer.variant, lines.len());

        let better = match &best {
            None => !lines.is_empty(),
            Some(current) => lines.len() > current.len(),
        };
        if better {
            best = Some(lines);
            if policy == MergePolicy::FirstNonEmpty {
                break;
            }
        }
    }

    match (best, last_error) {
        (Some(lines), _) => Ok(lines),
        (None, Some(e)) if failures == buffers.len() => Err(e),
        _ => Err(OcrError::NoText),
    }
}

/// Non-empty trimmed lines, numbered in reading order.
pub fn split_lines(text: &str) -> Vec<RecognizedLine> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(order, l)| RecognizedLine::new(l, order))
        .collect()
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string, for exercising the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use leptess::LepTess;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}
