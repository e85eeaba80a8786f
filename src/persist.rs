//! Shared persistence for the file-backed stores.
//!
//! Both stores are single JSON documents mutated through a read-modify-write
//! cycle. Writes go through a temp file and an atomic rename so a crash
//! mid-write never corrupts the visible document. Files and their directory
//! are restricted to the owning user.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Load a store document, or `None` if the file does not exist yet.
///
/// An unparseable top-level document is a [`StoreError::CorruptStore`];
/// defensive per-entry recovery is the caller's job (entries are loaded as
/// raw values and validated one by one).
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&content) {
        Ok(doc) => Ok(Some(doc)),
        Err(source) => Err(StoreError::CorruptStore {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write a document via temp-file-then-rename, pretty-printed with a
/// trailing newline.
pub fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Validation(format!("store path has no parent: {path:?}")))?;
    ensure_private_dir(parent)?;

    let mut json = serde_json::to_string_pretty(doc)?;
    json.push('\n');

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    restrict_permissions(tmp.path())?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Create the state directory if needed, owner-only on unix.
pub fn ensure_private_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Current time as epoch milliseconds, the unit used by every persisted
/// timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<String>,
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Doc> = load_document(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_round_trip_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            items: vec!["a".to_string(), "b".to_string()],
        };
        write_document(&path, &doc).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));

        let loaded: Doc = load_document(&path).unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_corrupt_document_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_document::<Doc>(&path).unwrap_err();
        assert!(matches!(err, StoreError::CorruptStore { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_document(&path, &Doc { items: vec![] }).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
