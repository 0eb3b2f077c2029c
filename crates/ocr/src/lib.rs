pub mod dictionary;
pub mod extract;
pub mod hash;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use dictionary::Dictionary;
pub use extract::Extractor;
pub use hash::{file_extension, sha256_bytes, store_image, to_hex, StoredImage};
pub use normalize::{levenshtein_distance, TextNormalizer};
pub use pipeline::{PipelineError, ReceiptAnalysis, ReceiptPipeline};
pub use preprocess::{prepare_variants, sniff_format, BufferVariant, PreprocessError, PreprocessedBuffer};
pub use recognizer::{recognize_lines, MergePolicy, MockRecognizer, OcrBackend, OcrError};
pub use types::{ExtractedReceipt, ExtractionStatus, NormalizedLine, RecognizedLine};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
