use crate::shared::fs_atomic::atomic_write_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA_VERSION: u32 = 1;
const USER_TOKEN_PREFIX: &str = "xoxc-";
const COOKIE_PREFIX: &str = "xoxd-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    Initial,
    AutoRefresh,
    ManualRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    pub last_refreshed: String,
    pub refresh_count: u64,
    pub source: CredentialSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub token: String,
    pub cookie: String,
    pub workspace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub version: u32,
    pub credentials: CredentialPair,
    pub metadata: CredentialMetadata,
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoredCredentials {
    pub fn new(
        token: String,
        cookie: String,
        workspace: String,
        source: CredentialSource,
    ) -> Result<Self, CredentialsError> {
        let record = Self {
            version: SCHEMA_VERSION,
            credentials: CredentialPair {
                token,
                cookie,
                workspace,
            },
            metadata: CredentialMetadata {
                last_refreshed: Utc::now().to_rfc3339(),
                refresh_count: 0,
                source,
            },
        };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), CredentialsError> {
        if self.version != SCHEMA_VERSION {
            return Err(CredentialsError::Storage(format!(
                "unsupported credentials schema version {}",
                self.version
            )));
        }
        if !self.credentials.token.starts_with(USER_TOKEN_PREFIX) {
            return Err(CredentialsError::Storage(
                "token must start with xoxc-".to_string(),
            ));
        }
        if !self.credentials.cookie.starts_with(COOKIE_PREFIX) {
            return Err(CredentialsError::Storage(
                "cookie must start with xoxd-".to_string(),
            ));
        }
        if self.credentials.workspace.trim().is_empty() {
            return Err(CredentialsError::Storage(
                "workspace must be non-empty".to_string(),
            ));
        }
        DateTime::parse_from_rfc3339(&self.metadata.last_refreshed).map_err(|_| {
            CredentialsError::Storage("lastRefreshed is not a valid RFC 3339 instant".to_string())
        })?;
        Ok(())
    }
}

/// Validated, atomically written, owner-only (0600) credentials file.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<StoredCredentials, CredentialsError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| CredentialsError::Storage(format!("failed to read credentials: {e}")))?;
        let record: StoredCredentials = serde_json::from_str(&raw)
            .map_err(|e| CredentialsError::Storage(format!("malformed credentials file: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    pub fn save(&self, record: &StoredCredentials) -> Result<(), CredentialsError> {
        record.validate()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CredentialsError::Storage(format!("failed to create credentials dir: {e}"))
                })?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
                }
            }
        }
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| CredentialsError::Storage(format!("failed to encode credentials: {e}")))?;
        atomic_write_file(&self.path, &body, 0o600)
            .map_err(|e| CredentialsError::Storage(format!("failed to write credentials: {e}")))
    }

    pub fn create_initial(
        &self,
        token: String,
        cookie: String,
        workspace: String,
    ) -> Result<StoredCredentials, CredentialsError> {
        let record = StoredCredentials::new(token, cookie, workspace, CredentialSource::Initial)?;
        self.save(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> StoredCredentials {
        StoredCredentials::new(
            "xoxc-abc".to_string(),
            "xoxd-def".to_string(),
            "acme".to_string(),
            CredentialSource::Initial,
        )
        .expect("valid sample")
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let record = sample();
        store.save(&record).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded, record);
    }

    #[test]
    fn save_sets_owner_only_permissions() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&sample()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path())
                .expect("meta")
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn save_rejects_invalid_record() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let mut record = sample();
        record.credentials.token = "bad-prefix".to_string();
        let err = store.save(&record).expect_err("should reject");
        assert!(matches!(err, CredentialsError::Storage(_)));
        assert!(!store.exists());
    }

    #[test]
    fn load_missing_file_is_storage_error() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path().join("missing.json"));
        assert!(store.load().is_err());
    }

    #[test]
    fn load_rejects_unknown_schema_version() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        fs::write(
            &path,
            r#"{"version":2,"credentials":{"token":"xoxc-a","cookie":"xoxd-b","workspace":"acme"},"metadata":{"lastRefreshed":"2026-01-01T00:00:00Z","refreshCount":0,"source":"initial"}}"#,
        )
        .expect("seed");
        let store = CredentialStore::new(path);
        assert!(store.load().is_err());
    }
}
