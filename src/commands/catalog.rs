use crate::import::scanner::{dir_hierarchy, list_files, path_key, DirNode, ScanError};
use crate::photos::catalog::{Catalog, LookupError};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Sorted keys of every photo with a committed record.
pub fn list_photos(catalog: &Catalog) -> Vec<String> {
    catalog.keys().into_iter().map(str::to_string).collect()
}

pub fn photo_metadata(catalog: &Catalog, key: &str) -> Result<Value, LookupError> {
    catalog.record(key).cloned()
}

pub fn preview_file(catalog: &Catalog, key: &str, size: u32) -> Result<PathBuf, LookupError> {
    catalog.preview_file(key, size)
}

/// Directory tree of the input root, without the skipped directories.
pub fn structure<S: AsRef<str>>(input_root: &Path, skip_dirs: &[S]) -> Result<Vec<DirNode>, ScanError> {
    dir_hierarchy(input_root, skip_dirs)
}

/// Supported files directly inside `input_root/dir`, as file keys.
pub fn list_dir<E, S>(
    input_root: &Path,
    dir: &str,
    extensions: &[E],
    skip_dirs: &[S],
) -> Result<Vec<String>, ScanError>
where
    E: AsRef<str>,
    S: AsRef<str>,
{
    let files = list_files(input_root, &input_root.join(dir), extensions, skip_dirs, false)?;
    Ok(files.iter().map(|p| path_key(p)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::scanner::{CACHE_DIR, IMAGE_EXTENSIONS};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_list_dir_is_shallow_and_keyed_from_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("trip/day1")).unwrap();
        std::fs::write(tmp.path().join("trip/a.jpg"), b"").unwrap();
        std::fs::write(tmp.path().join("trip/day1/b.jpg"), b"").unwrap();

        let keys = list_dir(tmp.path(), "trip", IMAGE_EXTENSIONS, &[CACHE_DIR]).unwrap();
        assert_eq!(keys, vec!["trip/a.jpg"]);
    }

    #[test]
    fn test_list_dir_unknown_dir() {
        let tmp = TempDir::new().unwrap();
        let err = list_dir(tmp.path(), "nope", IMAGE_EXTENSIONS, &[CACHE_DIR]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidDirectory(_)));
    }

    #[test]
    fn test_photo_metadata_clones_record() {
        let tmp = TempDir::new().unwrap();
        let doc = json!({"a.jpg": {"preview": {"512": "a_pr512.webp"}}});
        let catalog = Catalog::from_document(tmp.path(), doc.as_object().unwrap().clone());
        assert_eq!(list_photos(&catalog), vec!["a.jpg"]);
        assert_eq!(
            photo_metadata(&catalog, "a.jpg").unwrap(),
            json!({"preview": {"512": "a_pr512.webp"}})
        );
        assert!(photo_metadata(&catalog, "b.jpg").is_err());
    }
}
