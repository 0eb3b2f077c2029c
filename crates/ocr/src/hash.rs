use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derive the content-addressed storage path for a given hash.
/// Layout: `<base>/<first_2_hex_chars>/<full_hex>.<ext>`
pub fn attachment_path(attachments_dir: &Path, hash_hex: &str, ext: &str) -> PathBuf {
    attachments_dir
        .join(&hash_hex[..2])
        .join(format!("{hash_hex}.{ext}"))
}

/// Lower-cased extension of an uploaded file name, or `bin`.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("bin")
        .to_lowercase()
}

/// A receipt image written to the attachment tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub hash_hex: String,
    pub path: PathBuf,
}

/// Write `data` under its content hash. Storing the same bytes twice lands on
/// the same path.
pub fn store_image(attachments_dir: &Path, data: &[u8], ext: &str) -> io::Result<StoredImage> {
    let hash_hex = to_hex(&sha256_bytes(data));
    let path = attachment_path(attachments_dir, &hash_hex, ext);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, data)?;
    Ok(StoredImage { hash_hex, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(
            hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_bytes_deterministic() {
        assert_eq!(sha256_bytes(b"hello"), sha256_bytes(b"hello"));
        assert_ne!(sha256_bytes(b"hello"), sha256_bytes(b"world"));
    }

    #[test]
    fn attachment_path_layout() {
        let base = PathBuf::from("/data/receipts");
        let hash = "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";
        let path = attachment_path(&base, hash, "jpg");
        assert_eq!(path, base.join("ab").join(format!("{hash}.jpg")));
    }

    #[test]
    fn file_extension_normalizes() {
        assert_eq!(file_extension("IMG_0001.JPG"), "jpg");
        assert_eq!(file_extension("scan.png"), "png");
        assert_eq!(file_extension("noext"), "bin");
        assert_eq!(file_extension("trailing."), "bin");
    }

    #[test]
    fn store_image_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let a = store_image(dir.path(), b"receipt bytes", "jpg").unwrap();
        let b = store_image(dir.path(), b"receipt bytes", "jpg").unwrap();
        assert_eq!(a, b);
        assert!(a.path.exists());
        assert_eq!(std::fs::read(&a.path).unwrap(), b"receipt bytes");
        assert_eq!(a.hash_hex.len(), 64);
    }
}
