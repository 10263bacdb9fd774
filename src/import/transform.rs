use crate::photos::model::Record;
use std::path::{Path, PathBuf};

/// Why a single file could not be transformed. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("cannot encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("output {path} does not match the rendered image: {reason}")]
    Corrupted { path: PathBuf, reason: String },
}

impl TransformError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A per-file processing step driven by the shard loop.
///
/// Implementations are shared by reference across worker threads, so they must
/// not keep per-file mutable state. Each call reads
/// `input_root/rel_path` and may only write next to
/// `output_root/rel_path`, creating the parent directory itself.
pub trait Transform: Send + Sync {
    fn process(
        &self,
        input_root: &Path,
        rel_path: &Path,
        output_root: &Path,
    ) -> Result<Record, TransformError>;
}

impl<T: Transform + ?Sized> Transform for &T {
    fn process(
        &self,
        input_root: &Path,
        rel_path: &Path,
        output_root: &Path,
    ) -> Result<Record, TransformError> {
        (**self).process(input_root, rel_path, output_root)
    }
}

/// Create the output directory for `rel_path` under `output_root`.
///
/// Sibling workers may race on the same parent; `create_dir_all` treats an
/// existing directory as success.
pub fn ensure_output_dir(output_root: &Path, rel_path: &Path) -> Result<PathBuf, TransformError> {
    let dir = match rel_path.parent() {
        Some(parent) => output_root.join(parent),
        None => output_root.to_path_buf(),
    };
    std::fs::create_dir_all(&dir).map_err(|e| TransformError::io(&dir, e))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_output_dir_creates_nested_parent() {
        let out = TempDir::new().unwrap();
        let dir = ensure_output_dir(out.path(), Path::new("2024/march/a.jpg")).unwrap();
        assert_eq!(dir, out.path().join("2024/march"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_output_dir_tolerates_existing() {
        let out = TempDir::new().unwrap();
        std::fs::create_dir_all(out.path().join("album")).unwrap();
        assert!(ensure_output_dir(out.path(), Path::new("album/a.jpg")).is_ok());
        assert!(ensure_output_dir(out.path(), Path::new("album/b.jpg")).is_ok());
    }

    #[test]
    fn test_ensure_output_dir_top_level_file() {
        let out = TempDir::new().unwrap();
        let dir = ensure_output_dir(out.path(), Path::new("a.jpg")).unwrap();
        assert_eq!(dir, out.path().to_path_buf());
    }
}
