//! Credential stores.
//!
//! The manager only ever reads a store. Login, logout and token refresh
//! flows write to it and then hand the new value to
//! [`ConnectionManager::rotate_credential`](crate::ConnectionManager::rotate_credential).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::CredentialError;

/// Key-value store holding bearer tokens.
pub trait CredentialStore: Send + Sync {
    /// Returns the value for `key`. Empty values read as absent.
    fn read(&self, key: &str) -> Option<String>;

    fn write(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    fn remove(&self, key: &str) -> Result<(), CredentialError>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a single entry.
    pub fn with(key: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Credential store persisted to a JSON file.
///
/// Values are cached in memory; every write rewrites the file.
pub struct FileCredentialStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileCredentialStore {
    /// Opens a store, loading existing values from disk.
    pub fn open(path: PathBuf) -> Result<Self, CredentialError> {
        let values = load_values(&path)?;
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `update` to a copy of the values, writes the copy to disk and
    /// only then swaps it in, so a failed write leaves the cache untouched.
    fn commit<F>(&self, update: F) -> Result<(), CredentialError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = values.clone();
        update(&mut next);
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), CredentialError> {
        let json = serde_json::to_string_pretty(map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("persisted {} credential(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn read(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.commit(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        self.commit(|values| {
            values.remove(key);
        })
    }
}

fn load_values(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let values: HashMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} credential(s) from {:?}", values.len(), path);
    Ok(values)
}

/// Returns the default credential file path.
pub fn default_credential_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("learnhub").join("credentials.json"))
}

/// Returns the platform-specific config directory.
pub(crate) fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FileCredentialStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(tmp.path().join("credentials.json")).unwrap();
        (tmp, store)
    }

    #[test]
    fn memory_store_read_write_remove() {
        let store = MemoryCredentialStore::new();
        assert!(store.read("accessToken").is_none());
        store.write("accessToken", "abc").unwrap();
        assert_eq!(store.read("accessToken").as_deref(), Some("abc"));
        store.remove("accessToken").unwrap();
        assert!(store.read("accessToken").is_none());
    }

    #[test]
    fn empty_value_reads_as_absent() {
        let store = MemoryCredentialStore::with("accessToken", "");
        assert!(store.read("accessToken").is_none());
    }

    #[test]
    fn file_store_starts_empty() {
        let (_tmp, store) = test_store();
        assert!(store.read("accessToken").is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("credentials.json");

        {
            let store = FileCredentialStore::open(path.clone()).unwrap();
            store.write("accessToken", "tok-1").unwrap();
            store.write("refreshToken", "tok-2").unwrap();
        }

        let reloaded = FileCredentialStore::open(path).unwrap();
        assert_eq!(reloaded.read("accessToken").as_deref(), Some("tok-1"));
        assert_eq!(reloaded.read("refreshToken").as_deref(), Some("tok-2"));
    }

    #[test]
    fn file_store_remove_persists() {
        let (_tmp, store) = test_store();
        store.write("accessToken", "abc").unwrap();
        store.remove("accessToken").unwrap();

        let reloaded = FileCredentialStore::open(store.path().to_path_buf()).unwrap();
        assert!(reloaded.read("accessToken").is_none());
    }

    #[test]
    fn failed_persist_leaves_cache_unchanged() {
        let (_tmp, store) = test_store();
        store.write("accessToken", "abc").unwrap();

        // A directory in place of the file makes every write fail.
        std::fs::remove_file(store.path()).unwrap();
        std::fs::create_dir(store.path()).unwrap();

        assert!(matches!(
            store.write("accessToken", "xyz"),
            Err(CredentialError::Io(_))
        ));
        assert_eq!(store.read("accessToken").as_deref(), Some("abc"));

        assert!(store.remove("accessToken").is_err());
        assert_eq!(store.read("accessToken").as_deref(), Some("abc"));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, store) = test_store();
        store.write("accessToken", "abc").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_malformed_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileCredentialStore::open(path),
            Err(CredentialError::Json(_))
        ));
    }
}
