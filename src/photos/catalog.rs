//! Read-only view over a committed metadata document.
//!
//! This is the lookup contract the HTTP read API builds on: exact file-key
//! lookup, preview resolution by size, and a sorted key listing. Errors carry
//! the status code the API answers with.

use crate::db::metadata::{load_metadata, Document, MetadataError};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Preview size served as the "small" variant.
pub const PREVIEW_SMALL: u32 = 512;
/// Preview size served as the "large" variant.
pub const PREVIEW_LARGE: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("invalid photo path: {0}")]
    UnknownPhoto(String),
    #[error("can't find preview with size {size} for {key}")]
    MissingPreviewSize { key: String, size: u32 },
    #[error("preview file not found: {0}")]
    PreviewNotFound(PathBuf),
}

impl LookupError {
    /// HTTP status the read API should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LookupError::UnknownPhoto(_) | LookupError::MissingPreviewSize { .. } => 400,
            LookupError::PreviewNotFound(_) => 404,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    cache_root: PathBuf,
    document: Document,
}

impl Catalog {
    /// Load `<cache_root>/metadata.json`. A missing document gives an empty catalog.
    pub fn open(cache_root: &Path) -> Result<Self, MetadataError> {
        let document = load_metadata(cache_root)?;
        tracing::info!("catalog: {} records from {:?}", document.len(), cache_root);
        Ok(Self::from_document(cache_root, document))
    }

    pub fn from_document(cache_root: &Path, document: Document) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
            document,
        }
    }

    pub fn len(&self) -> usize {
        self.document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    /// Every file key, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.document.keys().map(String::as_str).collect()
    }

    pub fn record(&self, key: &str) -> Result<&Value, LookupError> {
        self.document
            .get(key)
            .ok_or_else(|| LookupError::UnknownPhoto(key.to_string()))
    }

    /// Absolute path of the `size` preview of `key`, checked to exist on disk.
    pub fn preview_file(&self, key: &str, size: u32) -> Result<PathBuf, LookupError> {
        let rel = self
            .record(key)?
            .get("preview")
            .and_then(|p| p.get(size.to_string()))
            .and_then(Value::as_str)
            .ok_or_else(|| LookupError::MissingPreviewSize {
                key: key.to_string(),
                size,
            })?;
        let path = self.cache_root.join(rel);
        if !path.is_file() {
            return Err(LookupError::PreviewNotFound(path));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn catalog(cache_root: &Path) -> Catalog {
        let document = json!({
            "b/two.jpg": {"preview": {"512": "b/two_pr512.webp"}},
            "a.jpg": {"preview": {"512": "a_pr512.webp", "1024": "a_pr1024.webp"}}
        });
        Catalog::from_document(cache_root, document.as_object().unwrap().clone())
    }

    #[test]
    fn test_keys_sorted() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(catalog(tmp.path()).keys(), vec!["a.jpg", "b/two.jpg"]);
    }

    #[test]
    fn test_record_lookup() {
        let tmp = TempDir::new().unwrap();
        let cat = catalog(tmp.path());
        assert_eq!(cat.record("a.jpg").unwrap()["preview"]["512"], "a_pr512.webp");
        let err = cat.record("missing.jpg").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_preview_file_resolution() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a_pr1024.webp"), b"x").unwrap();
        let cat = catalog(tmp.path());

        assert_eq!(
            cat.preview_file("a.jpg", PREVIEW_LARGE).unwrap(),
            tmp.path().join("a_pr1024.webp")
        );

        let err = cat.preview_file("b/two.jpg", PREVIEW_LARGE).unwrap_err();
        assert!(matches!(err, LookupError::MissingPreviewSize { size: 1024, .. }));
        assert_eq!(err.status_code(), 400);

        let err = cat.preview_file("a.jpg", PREVIEW_SMALL).unwrap_err();
        assert!(matches!(err, LookupError::PreviewNotFound(_)));
        assert_eq!(err.status_code(), 404);

        let err = cat.preview_file("nope.jpg", PREVIEW_SMALL).unwrap_err();
        assert!(matches!(err, LookupError::UnknownPhoto(_)));
    }

    #[test]
    fn test_open_missing_document_is_empty() {
        let tmp = TempDir::new().unwrap();
        let cat = Catalog::open(tmp.path()).unwrap();
        assert!(cat.is_empty());
        assert_eq!(cat.len(), 0);
    }
}
