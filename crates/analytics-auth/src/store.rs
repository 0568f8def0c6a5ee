//! Credential persistence
//!
//! `TokenStore` is the durability boundary for the lifecycle manager. It does
//! no freshness checks. The file implementation writes via temp file + rename
//! so a crash mid-write never leaves a truncated token file behind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Boxed future returned by `TokenStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Load/save/clear a single credential record.
///
/// Uses `Pin<Box<dyn Future>>` return types so the manager can hold an
/// `Arc<dyn TokenStore>`.
pub trait TokenStore: Send + Sync {
    /// Returns `Error::NotFound` when nothing has been stored.
    fn load(&self) -> StoreFuture<'_, Credential>;

    fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()>;

    /// Removing an absent record succeeds.
    fn clear(&self) -> StoreFuture<'_, ()>;
}

/// JSON file store with owner-only permissions.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::NotFound(format!(
                        "no credential at {}",
                        self.path.display()
                    )));
                }
                Err(e) => return Err(Error::Io(format!("reading token file: {e}"))),
            };
            let credential: Credential = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing token file: {e}")))?;
            debug!(path = %self.path.display(), "loaded credential");
            Ok(credential)
        })
    }

    fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()> {
        Box::pin(async move { write_atomic(&self.path, credential).await })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    info!(path = %self.path.display(), "cleared stored credential");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing token file: {e}"))),
            }
        })
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move {
            self.slot
                .lock()
                .await
                .clone()
                .ok_or_else(|| Error::NotFound("memory store is empty".into()))
        })
    }

    fn save<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            *self.slot.lock().await = Some(credential.clone());
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.slot.lock().await.take();
            Ok(())
        })
    }
}

/// Write the credential to `path` atomically with 0600 permissions.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Io(format!("creating token directory: {e}")))?;

    let tmp_path = dir.join(format!(".token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn test_credential(suffix: &str) -> Credential {
        Credential {
            access_token: format!("at_{suffix}"),
            refresh_token: Some(format!("rt_{suffix}")),
            expiry: 1_735_500_000_000,
            scopes: BTreeSet::from(["analytics.readonly".to_string()]),
            client_id: "client-123".into(),
            client_secret: "shh".into(),
        }
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));

        store.save(&test_credential("1")).await.unwrap();

        let reopened = FileTokenStore::new(dir.path().join("token.json"));
        let cred = reopened.load().await.unwrap();
        assert_eq!(cred, test_credential("1"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("absent.json"));
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let err = FileTokenStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, Error::CredentialParse(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token").join("nested").join("token.json");
        let store = FileTokenStore::new(path.clone());
        store.save(&test_credential("1")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn save_overwrites_previous_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&test_credential("1")).await.unwrap();
        store.save(&test_credential("2")).await.unwrap();
        assert_eq!(store.load().await.unwrap().access_token, "at_2");
    }

    #[tokio::test]
    async fn clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = FileTokenStore::new(path.clone());
        store.save(&test_credential("1")).await.unwrap();

        store.clear().await.unwrap();
        assert!(!path.exists());
        store.clear().await.unwrap();
        assert!(matches!(store.load().await, Err(Error::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        FileTokenStore::new(path.clone())
            .save(&test_credential("1"))
            .await
            .unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn memory_store_lifecycle() {
        let store = MemoryTokenStore::new();
        assert!(matches!(store.load().await, Err(Error::NotFound(_))));

        store.save(&test_credential("1")).await.unwrap();
        assert_eq!(store.load().await.unwrap().access_token, "at_1");

        store.clear().await.unwrap();
        assert!(matches!(store.load().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn stores_are_usable_as_trait_objects() {
        let dir = tempfile::tempdir().unwrap();
        let stores: Vec<std::sync::Arc<dyn TokenStore>> = vec![
            std::sync::Arc::new(FileTokenStore::new(dir.path().join("token.json"))),
            std::sync::Arc::new(MemoryTokenStore::with_credential(test_credential("0"))),
        ];
        for store in stores {
            store.save(&test_credential("9")).await.unwrap();
            assert_eq!(store.load().await.unwrap().access_token, "at_9");
        }
    }
}
