use crate::photos::model::Metadata;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

/// The whole metadata document: file key → record.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed metadata {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("metadata {0} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("metadata backup {0} already exists")]
    BackupCollision(PathBuf),
    #[error("metadata update of {path} failed, previous document restored: {source}")]
    Commit {
        path: PathBuf,
        source: Box<MetadataError>,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MetadataError + '_ {
    move |source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn metadata_path(cache_root: &Path) -> PathBuf {
    cache_root.join(METADATA_FILE)
}

/// Backup name for a commit started at `now`: `metadata_YYYYMMDD_HHMMSS_micros.json`.
pub fn backup_path(cache_root: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let stem = METADATA_FILE.trim_end_matches(".json");
    cache_root.join(format!("{}{}.json", stem, now.format("_%Y%m%d_%H%M%S_%6f")))
}

fn read_document(path: &Path) -> Result<Document, MetadataError> {
    let text = std::fs::read_to_string(path).map_err(io_error(path))?;
    let value: Value = serde_json::from_str(&text).map_err(|source| MetadataError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(MetadataError::NotAnObject(path.to_path_buf())),
    }
}

/// Load `<cache_root>/metadata.json`, or an empty document if there is none yet.
pub fn load_metadata(cache_root: &Path) -> Result<Document, MetadataError> {
    let path = metadata_path(cache_root);
    if !path.exists() {
        return Ok(Document::new());
    }
    read_document(&path)
}

/// Recursively merge `new` into `current`.
///
/// Where both sides hold an object the keys are merged one by one; anything
/// else in `new` replaces what was there. Keys only present in `current` are
/// kept.
pub fn deep_merge(current: &mut Document, new: Document) {
    for (key, value) in new {
        if let Value::Object(incoming) = value {
            if let Some(Value::Object(existing)) = current.get_mut(&key) {
                deep_merge(existing, incoming);
                continue;
            }
            current.insert(key, Value::Object(incoming));
        } else {
            current.insert(key, value);
        }
    }
}

fn to_document(metadata: &Metadata) -> Document {
    metadata
        .iter()
        .map(|(key, record)| (key.clone(), Value::Object(record.clone())))
        .collect()
}

/// Deep-merge `new_metadata` into `<cache_root>/metadata.json`.
///
/// The current document is copied to a timestamped backup first. The merged
/// document is written to a temporary file and renamed into place. On any
/// failure after the backup was taken the backup is copied back over the
/// document and left on disk; on success it is removed.
pub fn update_metadata(cache_root: &Path, new_metadata: &Metadata) -> Result<(), MetadataError> {
    let backup = backup_path(cache_root, chrono::Local::now());
    commit(cache_root, to_document(new_metadata), &backup)
}

pub(crate) fn commit(cache_root: &Path, new: Document, backup: &Path) -> Result<(), MetadataError> {
    std::fs::create_dir_all(cache_root).map_err(io_error(cache_root))?;
    let doc_path = metadata_path(cache_root);

    let backup_taken = if doc_path.exists() {
        if backup.exists() {
            return Err(MetadataError::BackupCollision(backup.to_path_buf()));
        }
        std::fs::copy(&doc_path, backup).map_err(io_error(backup))?;
        tracing::info!("created metadata backup: {:?}", backup);
        Some(backup)
    } else {
        None
    };

    match merge_and_write(&doc_path, backup_taken.is_some(), new) {
        Ok(()) => {
            tracing::info!("metadata updated: {:?}", doc_path);
            if let Some(backup) = backup_taken {
                tracing::info!("remove metadata backup: {:?}", backup);
                if let Err(e) = std::fs::remove_file(backup) {
                    tracing::warn!("cannot remove metadata backup {:?}: {}", backup, e);
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!("metadata update failed: {}", e);
            if let Some(backup) = backup_taken {
                match std::fs::copy(backup, &doc_path) {
                    Ok(_) => tracing::warn!("backup metadata restored: {:?} -> {:?}", backup, doc_path),
                    Err(re) => tracing::warn!(
                        "cannot restore {:?} from {:?}: {}",
                        doc_path,
                        backup,
                        re
                    ),
                }
            }
            Err(MetadataError::Commit {
                path: doc_path,
                source: Box::new(e),
            })
        }
    }
}

fn merge_and_write(doc_path: &Path, exists: bool, new: Document) -> Result<(), MetadataError> {
    let mut document = if exists {
        read_document(doc_path)?
    } else {
        Document::new()
    };
    deep_merge(&mut document, new);

    // Map keys are ordered, so the output is sorted at every level.
    let text = serde_json::to_string_pretty(&document).map_err(|source| MetadataError::Json {
        path: doc_path.to_path_buf(),
        source,
    })?;

    let tmp = doc_path.with_extension("json.tmp");
    let written = std::fs::write(&tmp, text)
        .map_err(io_error(&tmp))
        .and_then(|_| std::fs::rename(&tmp, doc_path).map_err(io_error(doc_path)));
    if written.is_err() && tmp.is_file() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}
