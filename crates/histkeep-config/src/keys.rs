/// Storage keys derived from file paths.
use std::path::{Path, PathBuf};

/// Prefix of keys that name a file on disk.
pub const FILE_KEY_PREFIX: &str = "file:";

/// Storage key for the history of the file at `path`.
///
/// Existing paths are canonicalized, so different spellings of one file share
/// a key. The path is embedded as-is: keys stay stable across runs and
/// readable when listed.
pub fn storage_key_for_path(path: &Path) -> String {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("{FILE_KEY_PREFIX}{}", canonical.display())
}

/// The file a key was derived from, or `None` for free-form keys.
pub fn path_for_storage_key(key: &str) -> Option<PathBuf> {
    key.strip_prefix(FILE_KEY_PREFIX)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}
