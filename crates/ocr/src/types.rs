use nbbang_core::ExtractedItem;
use serde::{Deserialize, Serialize};

/// A line of text as returned by the OCR engine, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedLine {
    pub text: String,
    pub order: usize,
}

impl RecognizedLine {
    pub fn new(text: impl Into<String>, order: usize) -> Self {
        Self { text: text.into(), order }
    }
}

/// A recognized line after dictionary correction. Same order as its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub text: String,
    pub order: usize,
}

impl NormalizedLine {
    pub fn new(text: impl Into<String>, order: usize) -> Self {
        Self { text: text.into(), order }
    }

    /// Treat this line as recognizer output again, e.g. to re-normalize it.
    pub fn into_recognized(self) -> RecognizedLine {
        RecognizedLine { text: self.text, order: self.order }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracted,
    /// Nothing item-like was found. A valid outcome, not a failure.
    Empty,
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStatus::Extracted => write!(f, "extracted"),
            ExtractionStatus::Empty => write!(f, "empty"),
        }
    }
}

/// Merchant name and line items pulled out of one receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    /// Empty when no merchant-like line was found.
    pub store_name: String,
    pub items: Vec<ExtractedItem>,
}

impl ExtractedReceipt {
    pub fn status(&self) -> ExtractionStatus {
        if self.items.is_empty() {
            ExtractionStatus::Empty
        } else {
            ExtractionStatus::Extracted
        }
    }
}
