//! Pairing store: pending requests awaiting operator approval.
//!
//! Stored in `<state dir>/pairing.json` as a single JSON document. Every
//! operation runs inside one lock acquire/release scope around the
//! read-prune-mutate-write sequence, so concurrent workers and separate
//! processes sharing the store are serialized.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ident::IdentToken;
use crate::lockfile::LockGuard;
use crate::persist::{ensure_private_dir, load_document, now_millis, write_document};

/// Fixed code length.
pub const CODE_LENGTH: usize = 8;
/// Unambiguous alphabet: no 0/O, 1/I/L.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Pending requests expire after one hour.
const PAIRING_TTL_MILLIS: i64 = 60 * 60 * 1000;
/// Max simultaneously pending requests per chat scope.
pub const MAX_PENDING_PER_CHAT: usize = 3;
/// Collision-rejection budget for code generation.
const CODE_ATTEMPTS: usize = 500;

/// A pending pairing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub code: String,
    pub chat_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds; `expires_at <= now` means the request is inert.
    pub expires_at: i64,
}

impl PairingRequest {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Serialize)]
struct PairingFile<'a> {
    pairings: &'a [PairingRequest],
}

/// Load-side counterpart: entries are raw values so one malformed row can be
/// dropped without failing the whole document.
#[derive(Debug, Deserialize)]
struct RawPairingFile {
    #[serde(default)]
    pairings: Vec<serde_json::Value>,
}

/// Durable table of in-flight pairing requests.
#[derive(Debug, Clone)]
pub struct PairingStore {
    path: PathBuf,
}

impl PairingStore {
    /// Store backed by `<state_dir>/pairing.json`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("pairing.json"),
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

    fn load(&self) -> Result<Vec<PairingRequest>, StoreError> {
        let Some(raw) = load_document::<RawPairingFile>(&self.path)? else {
            return Ok(Vec::new());
        };
        let mut requests = Vec::with_capacity(raw.pairings.len());
        for value in raw.pairings {
            match serde_json::from_value::<PairingRequest>(value) {
                Ok(req) if !req.code.is_empty() && !req.user_id.is_empty() => requests.push(req),
                Ok(req) => {
                    tracing::warn!(code = %req.code, "dropping pairing entry with empty fields");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed pairing entry");
                }
            }
        }
        Ok(requests)
    }

    fn persist(&self, requests: &[PairingRequest]) -> Result<(), StoreError> {
        write_document(&self.path, &PairingFile { pairings: requests })
    }

    /// Issue (or refresh) a pairing request for `(chat, user)`.
    ///
    /// Re-contact from the same identity before expiry refreshes the TTL and
    /// returns the existing code instead of minting a duplicate. A chat
    /// scope already holding [`MAX_PENDING_PER_CHAT`] open requests for
    /// other identities rejects the new one with `QuotaExceeded`.
    pub fn generate(
        &self,
        chat: &IdentToken,
        user: &IdentToken,
        username: Option<&str>,
    ) -> Result<String, StoreError> {
        let chat_id = chat.to_string();
        let user_id = user.to_string();
        let username = normalize_username(username);

        let _lock = self.lock()?;
        let now = now_millis();
        let mut requests = self.load()?;
        requests.retain(|r| !r.is_expired(now));

        if let Some(req) = requests
            .iter_mut()
            .find(|r| r.chat_id == chat_id && r.user_id == user_id)
        {
            req.expires_at = now + PAIRING_TTL_MILLIS;
            if username.is_some() {
                req.username = username;
            }
            let code = req.code.clone();
            self.persist(&requests)?;
            return Ok(code);
        }

        let pending_in_chat = requests.iter().filter(|r| r.chat_id == chat_id).count();
        if pending_in_chat >= MAX_PENDING_PER_CHAT {
            return Err(StoreError::QuotaExceeded {
                chat: chat_id,
                max: MAX_PENDING_PER_CHAT,
            });
        }

        let existing: HashSet<String> = requests.iter().map(|r| r.code.clone()).collect();
        let code = generate_unique_code(&existing)?;
        requests.push(PairingRequest {
            code: code.clone(),
            chat_id: chat_id.clone(),
            user_id: user_id.clone(),
            username,
            created_at: now,
            expires_at: now + PAIRING_TTL_MILLIS,
        });
        self.persist(&requests)?;
        tracing::info!(chat = %chat_id, user = %user_id, "created pairing request");
        Ok(code)
    }

    /// Pending (non-expired) requests, oldest first. Prunes expired entries
    /// and persists the pruned table when anything was dropped.
    pub fn list(&self) -> Result<Vec<PairingRequest>, StoreError> {
        let _lock = self.lock()?;
        let now = now_millis();
        let all = self.load()?;
        let before = all.len();
        let mut requests: Vec<_> = all.into_iter().filter(|r| !r.is_expired(now)).collect();
        if requests.len() != before {
            self.persist(&requests)?;
        }
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    /// Approve a code (case-insensitive). Removes and returns the request.
    ///
    /// A code that matches an expired entry surfaces as [`StoreError::Expired`]
    /// so the operator gets different guidance than for a code that never
    /// existed. Either way the entry is gone afterwards; approval is
    /// single-use.
    pub fn approve(&self, code: &str) -> Result<PairingRequest, StoreError> {
        let req = self.take(code)?;
        tracing::info!(user = %req.user_id, chat = %req.chat_id, "pairing request approved");
        Ok(req)
    }

    /// Reject a code: same lookup semantics as approve, but the entry is
    /// discarded rather than promoted. The returned request is for operator
    /// display only.
    pub fn reject(&self, code: &str) -> Result<PairingRequest, StoreError> {
        let req = self.take(code)?;
        tracing::info!(user = %req.user_id, chat = %req.chat_id, "pairing request rejected");
        Ok(req)
    }

    /// Remove the entry matching `code`, distinguishing expired from absent.
    /// Lookup runs before pruning so the expired case is observable; other
    /// expired rows are pruned incidentally.
    fn take(&self, code: &str) -> Result<PairingRequest, StoreError> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(StoreError::Validation("empty pairing code".to_string()));
        }

        let _lock = self.lock()?;
        let now = now_millis();
        let mut requests = self.load()?;
        let before = requests.len();

        let found = requests
            .iter()
            .position(|r| r.code.eq_ignore_ascii_case(&code))
            .map(|i| requests.remove(i));

        requests.retain(|r| !r.is_expired(now));
        if requests.len() != before || found.is_some() {
            self.persist(&requests)?;
        }

        match found {
            Some(req) if req.is_expired(now) => Err(StoreError::Expired(code)),
            Some(req) => Ok(req),
            None => Err(StoreError::NotFound(code)),
        }
    }
}

fn normalize_username(username: Option<&str>) -> Option<String> {
    let u = username?.trim();
    let u = u.strip_prefix('@').unwrap_or(u);
    if u.is_empty() {
        None
    } else {
        Some(u.to_lowercase())
    }
}

fn random_code() -> String {
    // ThreadRng is a CSPRNG; per-character selection from the fixed alphabet.
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

fn generate_unique_code(existing: &HashSet<String>) -> Result<String, StoreError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = random_code();
        if !existing.contains(&code) {
            return Ok(code);
        }
    }
    Err(StoreError::CodeGeneration)
}
