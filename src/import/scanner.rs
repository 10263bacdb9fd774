use crate::photos::model::FileKey;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Source extensions picked up by default (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "webp", "png"];

/// Directory holding generated previews and the metadata document.
/// Skipped by default so a second run does not ingest its own output.
pub const CACHE_DIR: &str = ".photoviewer";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Turn a relative path into its lookup key (`a/b/c.jpg` on every platform).
pub fn path_key(rel_path: &Path) -> FileKey {
    rel_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize an extension filter entry: lowercase, no leading dot.
fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&e.to_lowercase()))
        .unwrap_or(false)
}

fn check_directory(dir: &Path) -> Result<(), ScanError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ScanError::InvalidDirectory(dir.to_path_buf()))
    }
}

/// List supported files under `current_dir`, as paths relative to `root`.
///
/// Only the direct children of `current_dir` are considered unless `recursive`
/// is set. Directories whose name appears in `skip_dirs` are pruned at every
/// level together with everything below them. Symlinks are not followed and
/// unreadable entries are logged and skipped. The result is sorted by file key
/// so that sharding is reproducible across runs.
pub fn list_files<E, S>(
    root: &Path,
    current_dir: &Path,
    extensions: &[E],
    skip_dirs: &[S],
    recursive: bool,
) -> Result<Vec<PathBuf>, ScanError>
where
    E: AsRef<str>,
    S: AsRef<str>,
{
    check_directory(current_dir)?;
    tracing::info!("listing files under {:?}", current_dir);

    let allowed: Vec<String> = extensions
        .iter()
        .map(|e| normalize_extension(e.as_ref()))
        .collect();
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files: Vec<(FileKey, PathBuf)> = Vec::new();
    for entry in WalkDir::new(current_dir)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e, skip_dirs))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("scan error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_allowed_extension(entry.path(), &allowed) {
            continue;
        }
        match entry.path().strip_prefix(root) {
            Ok(rel) => files.push((path_key(rel), rel.to_path_buf())),
            Err(_) => tracing::warn!("{:?} is outside root {:?}, skipping", entry.path(), root),
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    tracing::debug!("list_files {:?}: {} files", current_dir, files.len());
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

fn is_skipped_dir<S: AsRef<str>>(entry: &walkdir::DirEntry, skip_dirs: &[S]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    let skipped = skip_dirs.iter().any(|s| s.as_ref() == name);
    if skipped {
        tracing::info!("skip dir: {:?}", entry.path());
    }
    skipped
}

/// One directory in the tree returned by [`dir_hierarchy`].
///
/// Serializes as `{"<name>": [children...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirNode {
    pub name: String,
    pub children: Vec<DirNode>,
}

impl Serialize for DirNode {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.children)?;
        map.end()
    }
}

/// Nested directory structure under `dir`, sorted by name, without files.
pub fn dir_hierarchy<S: AsRef<str>>(dir: &Path, skip_dirs: &[S]) -> Result<Vec<DirNode>, ScanError> {
    check_directory(dir)?;
    let read = std::fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut subdirs: Vec<PathBuf> = read
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    subdirs.sort();

    let mut nodes = Vec::with_capacity(subdirs.len());
    for sub in subdirs {
        let name = match sub.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => continue,
        };
        if skip_dirs.iter().any(|s| s.as_ref() == name) {
            continue;
        }
        let children = dir_hierarchy(&sub, skip_dirs)?;
        nodes.push(DirNode { name, children });
    }
    Ok(nodes)
}
