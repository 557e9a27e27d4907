//! File-backed credential storage
//!
//! Manages a JSON file mapping user ids to provider token triples and
//! cached session credentials. All writes use atomic temp-file + rename
//! to prevent corruption on crash. A tokio Mutex serializes access, so
//! a reader can never observe a half-replaced token pair.
//!
//! The file backend has no TTL eviction. Logical validity is governed
//! entirely by `expires_at`; eviction would only ever be a space
//! optimization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A user's provider token triple.
///
/// `expires_at` is a unix timestamp in milliseconds, computed by the
/// lifecycle coordinator as issuance time plus the configured TTL.
/// The three fields are always written together; there is no
/// partial-field update anywhere in the store contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
}

impl ProviderTokens {
    /// Whether the access token is expired at `now_millis`.
    /// The boundary instant itself counts as expired.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at <= now_millis
    }
}

/// On-disk shape: provider tokens and cached session credentials are
/// separate maps, both keyed by user id, mirroring the two logical
/// record kinds the proxy persists.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    tokens: HashMap<String, ProviderTokens>,
    sessions: HashMap<String, String>,
}

/// Thread-safe credential file manager.
///
/// The Mutex serializes all reads and writes; reads clone out of the
/// in-memory state so callers never hold the lock across I/O of their
/// own.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl CredentialStore {
    /// Load the store from the given file path.
    ///
    /// If the file doesn't exist, creates it empty (cold start with no
    /// linked users).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let state: StoreState = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), users = state.tokens.len(), "loaded credential store");
            state
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let state = StoreState::default();
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Upsert the full token triple for a user and persist.
    ///
    /// The triple replaces whatever was stored before; access and
    /// refresh tokens are never mixed across writes.
    pub async fn put_provider_tokens(&self, user_id: &str, tokens: ProviderTokens) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tokens.insert(user_id.to_string(), tokens);
        debug!(user_id, "stored provider tokens");
        write_atomic(&self.path, &state).await
    }

    /// Get a clone of a user's token triple.
    ///
    /// `None` means no record exists — an unknown or never-linked user,
    /// which is a normal condition, not an error.
    pub async fn get_provider_tokens(&self, user_id: &str) -> Option<ProviderTokens> {
        let state = self.state.lock().await;
        state.tokens.get(user_id).cloned()
    }

    /// Cache the issued session credential for a user and persist.
    ///
    /// The signature inside the credential is the source of truth for
    /// validity; this copy exists for lookup and revocation only.
    pub async fn put_session(&self, user_id: &str, credential: String) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.insert(user_id.to_string(), credential);
        debug!(user_id, "cached session credential");
        write_atomic(&self.path, &state).await
    }

    /// Get the cached session credential for a user, if any.
    pub async fn get_session(&self, user_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.sessions.get(user_id).cloned()
    }

    /// Remove all state for a user (tokens and cached session).
    ///
    /// Returns whether anything was removed. Removing an unknown user
    /// is a no-op, not an error.
    pub async fn remove(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let had_tokens = state.tokens.remove(user_id).is_some();
        let had_session = state.sessions.remove(user_id).is_some();
        if had_tokens || had_session {
            debug!(user_id, "removed user state");
            write_atomic(&self.path, &state).await?;
        }
        Ok(had_tokens || had_session)
    }

    /// Number of users with stored provider tokens.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.tokens.len()
    }

    /// Whether no users are linked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the store state to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it
/// over the target. Permissions are set to 0600 since the file holds
/// provider tokens.
async fn write_atomic(path: &Path, state: &StoreState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| Error::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}
