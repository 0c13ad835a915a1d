//! API key storage
//!
//! The key lives in a dotenv file as `MPX_SDK_BEARER_TOKEN='<key>'`,
//! readable only by the owner on Unix.

use crate::client::RemoteClient;
use mpx_core::{MpxError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TOKEN_VAR: &str = "MPX_SDK_BEARER_TOKEN";
pub const PLACEHOLDER_TOKEN: &str = "<your_bearer_token_here>";

/// A credentials file on disk
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.mpx/.env`
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|h| Self::new(h.join(".mpx").join(".env")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A token that is neither blank nor the template placeholder
    pub fn is_usable_token(token: &str) -> bool {
        let token = token.trim();
        !token.is_empty() && token != PLACEHOLDER_TOKEN
    }

    /// Overwrite the file with `key`
    pub fn save(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = open_private(&self.path)?;
        file.write_all(format!("{}='{}'\n", TOKEN_VAR, key.trim()).as_bytes())?;

        tracing::info!(path = %self.path.display(), "stored API key");
        Ok(())
    }

    /// The stored token, if the file exists and holds a usable one
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let entries = dotenvy::from_path_iter(&self.path)
            .map_err(|e| MpxError::ConfigError(format!("{}: {}", self.path.display(), e)))?;

        let mut token = None;
        for entry in entries {
            match entry {
                Ok((name, value)) if name == TOKEN_VAR => token = Some(value),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "skipping unreadable credentials line")
                }
            }
        }
        Ok(token.filter(|t| Self::is_usable_token(t)))
    }
}

/// Open for writing with owner-only access, tightening an existing file too
#[cfg(unix)]
fn open_private(path: &Path) -> Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Success,
    Error,
}

/// Result of an API key setup attempt, shaped for a JSON reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupOutcome {
    pub status: SetupStatus,
    pub message: String,
}

impl SetupOutcome {
    fn success(message: &str) -> Self {
        Self {
            status: SetupStatus::Success,
            message: message.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            status: SetupStatus::Error,
            message: message.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SetupStatus::Success
    }
}

/// Validate `key` against the backend and store it.
///
/// `connect` builds a client that authenticates with the given key.
pub fn setup_api_key<F>(key: &str, store: &CredentialStore, connect: F) -> SetupOutcome
where
    F: FnOnce(&str) -> Result<Box<dyn RemoteClient>>,
{
    if !CredentialStore::is_usable_token(key) {
        return SetupOutcome::error("API key is missing");
    }

    let tested = connect(key.trim()).and_then(|client| client.connection_test());
    if let Err(e) = tested {
        tracing::warn!(error = %e, "connection test failed");
        return SetupOutcome::error("API Key is invalid! Please check the key and try again.");
    }

    match store.save(key) {
        Ok(()) => SetupOutcome::success("API key stored successfully"),
        Err(e) => {
            tracing::error!(error = %e, "failed to store API key");
            SetupOutcome::error("Failed to store API key")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClient;

    fn temp_store() -> (PathBuf, CredentialStore) {
        let dir = std::env::temp_dir().join(format!("mpx_cred_test_{}", uuid::Uuid::new_v4()));
        let store = CredentialStore::new(dir.join("nested").join(".env"));
        (dir, store)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (dir, store) = temp_store();
        assert_eq!(store.load().unwrap(), None);

        store.save("sk-test-123").unwrap();
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "MPX_SDK_BEARER_TOKEN='sk-test-123'\n");
        assert_eq!(store.load().unwrap().as_deref(), Some("sk-test-123"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, store) = temp_store();
        store.save("sk-perm").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_placeholder_is_not_a_token() {
        let (dir, store) = store_with(&format!("{}=\"{}\"\n", TOKEN_VAR, PLACEHOLDER_TOKEN));
        assert_eq!(store.load().unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    fn store_with(content: &str) -> (PathBuf, CredentialStore) {
        let (dir, store) = temp_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), content).unwrap();
        (dir, store)
    }

    #[test]
    fn test_load_reads_dotenv_syntax() {
        let (dir, store) = store_with("# comment\nOTHER=1\nexport MPX_SDK_BEARER_TOKEN=\"quoted\"\n");
        assert_eq!(store.load().unwrap().as_deref(), Some("quoted"));
        std::fs::remove_dir_all(&dir).ok();

        let (dir, store) = store_with("MPX_SDK_BEARER_TOKEN=\"abc\" # note\n");
        assert_eq!(store.load().unwrap().as_deref(), Some("abc"));
        std::fs::remove_dir_all(&dir).ok();

        let (dir, store) = store_with("MPX_SDK_BEARER_TOKEN='lit$eral'\n");
        assert_eq!(store.load().unwrap().as_deref(), Some("lit$eral"));
        std::fs::remove_dir_all(&dir).ok();

        let (dir, store) = store_with("A=b\n");
        assert_eq!(store.load().unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_save_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, store) = store_with("MPX_SDK_BEARER_TOKEN=old\n");
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save("sk-new").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap().as_deref(), Some("sk-new"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_setup_rejects_blank_key() {
        let (_dir, store) = temp_store();
        let outcome = setup_api_key("  ", &store, |_| {
            Ok(Box::new(MockClient::canned()) as Box<dyn RemoteClient>)
        });
        assert_eq!(outcome.status, SetupStatus::Error);
        assert_eq!(outcome.message, "API key is missing");
        assert!(!store.path().exists());
    }

    #[test]
    fn test_setup_rejects_invalid_key() {
        let (_dir, store) = temp_store();
        let outcome = setup_api_key("bad", &store, |_| {
            Ok(Box::new(MockClient::canned().rejecting_credentials()) as Box<dyn RemoteClient>)
        });
        assert!(!outcome.is_success());
        assert!(outcome.message.contains("invalid"));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_setup_stores_valid_key() {
        let (dir, store) = temp_store();
        let outcome = setup_api_key("sk-good", &store, |key| {
            assert_eq!(key, "sk-good");
            Ok(Box::new(MockClient::canned()) as Box<dyn RemoteClient>)
        });
        assert!(outcome.is_success());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"status": "success", "message": "API key stored successfully"})
        );
        assert_eq!(store.load().unwrap().as_deref(), Some("sk-good"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
