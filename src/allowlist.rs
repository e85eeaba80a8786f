//! Allow-list store: durable set of approved identifiers.
//!
//! Stored in `<state dir>/allowlist.json`. Holds both sender and chat
//! tokens; a wildcard entry, if present, satisfies every lookup. Entries are
//! created by pairing approval or explicit `chatgate allow add` and live
//! until explicit removal.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ident::IdentToken;
use crate::lockfile::LockGuard;
use crate::persist::{ensure_private_dir, load_document, write_document};

#[derive(Debug, Serialize)]
struct AllowFile<'a> {
    entries: &'a [IdentToken],
}

/// Load-side counterpart: entries are raw values so one malformed row can be
/// dropped without failing the whole document.
#[derive(Debug, Deserialize)]
struct RawAllowFile {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

/// Durable, lock-guarded set of approved identifiers.
#[derive(Debug, Clone)]
pub struct AllowListStore {
    path: PathBuf,
}

impl AllowListStore {
    /// Store backed by `<state_dir>/allowlist.json`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("allowlist.json"),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    fn lock(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }
        LockGuard::acquire(&self.lock_path())
    }

    fn load(&self) -> Result<Vec<IdentToken>, StoreError> {
        let Some(raw) = load_document::<RawAllowFile>(&self.path)? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<IdentToken> = Vec::with_capacity(raw.entries.len());
        for value in raw.entries {
            match serde_json::from_value::<IdentToken>(value) {
                Ok(token) => {
                    if !entries.contains(&token) {
                        entries.push(token);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed allow-list entry");
                }
            }
        }
        Ok(entries)
    }

    fn persist(&self, entries: &[IdentToken]) -> Result<(), StoreError> {
        write_document(&self.path, &AllowFile { entries })
    }

    /// True if a wildcard entry exists or an entry equals the token.
    pub fn is_allowed(&self, token: &IdentToken) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        let entries = self.load()?;
        Ok(entries.iter().any(|e| e.is_wildcard() || e == token))
    }

    /// Chat lookups use the same set and the same wildcard rule.
    pub fn is_chat_allowed(&self, token: &IdentToken) -> Result<bool, StoreError> {
        self.is_allowed(token)
    }

    /// Normalize and union `raw` into the set. Returns whether a new entry
    /// was inserted; adding an existing entry is a no-op.
    pub fn add(&self, raw: &str) -> Result<bool, StoreError> {
        let token = IdentToken::parse(raw)?;
        let _lock = self.lock()?;
        let mut entries = self.load()?;
        if entries.contains(&token) {
            return Ok(false);
        }
        entries.push(token);
        self.persist(&entries)?;
        Ok(true)
    }

    /// Remove the entry matching `raw`. Returns whether anything was removed.
    pub fn remove(&self, raw: &str) -> Result<bool, StoreError> {
        let token = IdentToken::parse(raw)?;
        let _lock = self.lock()?;
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e != &token);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    /// Current entries in insertion order.
    pub fn list(&self) -> Result<Vec<IdentToken>, StoreError> {
        let _lock = self.lock()?;
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (AllowListStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = AllowListStore::new(dir.path());
        (store, dir)
    }

    fn token(raw: &str) -> IdentToken {
        IdentToken::parse(raw).unwrap()
    }

    #[test]
    fn test_empty_store_allows_nothing() {
        let (store, _dir) = test_store();
        assert!(!store.is_allowed(&token("555")).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let (store, _dir) = test_store();
        assert!(store.add("@Alice").unwrap());
        // Same identity in a different raw shape is the same entry.
        assert!(!store.add("telegram:alice").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.is_allowed(&token("alice")).unwrap());
    }

    #[test]
    fn test_id_and_username_are_distinct_entries() {
        let (store, _dir) = test_store();
        store.add("555").unwrap();
        store.add("alice").unwrap();
        assert!(store.is_allowed(&token("555")).unwrap());
        assert!(store.is_allowed(&token("@Alice")).unwrap());
        assert!(!store.is_allowed(&token("556")).unwrap());
    }

    #[test]
    fn test_wildcard_allows_everything() {
        let (store, _dir) = test_store();
        store.add("*").unwrap();
        assert!(store.is_allowed(&token("555")).unwrap());
        assert!(store.is_allowed(&token("anyone")).unwrap());
        assert!(store.is_chat_allowed(&token("-100999")).unwrap());
    }

    #[test]
    fn test_remove() {
        let (store, _dir) = test_store();
        store.add("alice").unwrap();
        assert!(store.remove("@ALICE").unwrap());
        assert!(!store.remove("alice").unwrap());
        assert!(!store.is_allowed(&token("alice")).unwrap());
    }

    #[test]
    fn test_invalid_input_fails_fast() {
        let (store, _dir) = test_store();
        assert!(matches!(
            store.add("   ").unwrap_err(),
            StoreError::Validation(_)
        ));
        assert!(matches!(
            store.remove("@").unwrap_err(),
            StoreError::Validation(_)
        ));
    }

    #[test]
    fn test_malformed_entry_is_skipped_on_load() {
        let (store, _dir) = test_store();
        store.add("alice").unwrap();

        let raw = std::fs::read_to_string(&store.path).unwrap();
        let mut doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        doc["entries"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"type": "mystery", "value": 7}));
        std::fs::write(&store.path, doc.to_string()).unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.is_allowed(&token("alice")).unwrap());
    }

    #[test]
    fn test_corrupt_document_fails_loudly() {
        let (store, _dir) = test_store();
        std::fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        std::fs::write(&store.path, "not json").unwrap();
        assert!(matches!(
            store.list().unwrap_err(),
            StoreError::CorruptStore { .. }
        ));
    }

    #[test]
    fn test_document_format() {
        let (store, _dir) = test_store();
        store.add("555").unwrap();
        store.add("*").unwrap();
        let raw = std::fs::read_to_string(&store.path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["entries"][0]["type"], "id");
        assert_eq!(doc["entries"][0]["value"], "555");
        assert_eq!(doc["entries"][1]["type"], "wildcard");
    }
}
