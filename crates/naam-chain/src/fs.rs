//! Whole-file replacement

use std::io::Write;
use std::path::{Path, PathBuf};

/// `.<name>.tmp` next to `path`
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Replace the file at `path` with `bytes`
///
/// Writes and syncs a sibling temporary file, then renames it over `path`.
/// Readers see either the old contents or the new ones. Blocking; run it
/// through `spawn_blocking` so it finishes even if the caller is dropped.
pub(crate) fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replace_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("value");

        replace_file(&path, b"one").unwrap();
        replace_file(&path, b"two").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!temp_path(&path).exists());
        assert_eq!(temp_path(&path), dir.path().join(".value.tmp"));
    }
}
