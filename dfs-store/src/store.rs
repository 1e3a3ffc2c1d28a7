//! Disk store.
//!
//! Every entry is one file at `{root}/{PathKey::full_path}`. Writes overwrite
//! unconditionally and the store keeps no state besides its configuration,
//! so several stores may share a root.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::path::{PassthroughPathTransform, PathKey, PathTransform};

/// Root used when none is configured.
pub const DEFAULT_ROOT: &str = "dfs_store";

/// What [`Store::delete`] removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteScope {
    /// The key's file, then any parent directories left empty.
    #[default]
    Entry,
    /// The key's whole first-level directory, including every other entry
    /// sharing it.
    Shard,
}

/// Configuration for [`Store`].
#[derive(Clone)]
pub struct StoreConfig {
    /// Directory all entries live under.
    pub root: PathBuf,
    /// Key to path mapping.
    pub path_transform: Arc<dyn PathTransform>,
    /// Delete granularity.
    pub delete_scope: DeleteScope,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            path_transform: Arc::new(PassthroughPathTransform),
            delete_scope: DeleteScope::default(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("root", &self.root)
            .field("delete_scope", &self.delete_scope)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// Create a configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Set the path transform.
    pub fn with_path_transform(mut self, transform: impl PathTransform + 'static) -> Self {
        self.path_transform = Arc::new(transform);
        self
    }

    /// Set the delete scope.
    pub fn with_delete_scope(mut self, scope: DeleteScope) -> Self {
        self.delete_scope = scope;
        self
    }
}

/// Key/value store on the local filesystem.
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
}

impl Store {
    /// Create a store. An empty root falls back to [`DEFAULT_ROOT`]. Nothing
    /// is created on disk until the first write.
    pub fn new(mut config: StoreConfig) -> Self {
        if config.root.as_os_str().is_empty() {
            config.root = PathBuf::from(DEFAULT_ROOT);
        }
        Self { config }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Where `key` lives, relative to the root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for an empty key or one whose path
    /// would leave the root.
    pub fn path_key(&self, key: &str) -> StoreResult<PathKey> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key is empty".to_string()));
        }
        let path_key = self.config.path_transform.transform(key);
        path_key.validate()?;
        Ok(path_key)
    }

    fn entry_path(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.config.root.join(self.path_key(key)?.full_path()))
    }

    /// Whether an entry exists for `key`.
    pub async fn has(&self, key: &str) -> StoreResult<bool> {
        match fs::metadata(self.entry_path(key)?).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write everything `reader` yields under `key`, replacing any previous
    /// entry. Returns the number of bytes written.
    pub async fn write<R>(&self, key: &str, mut reader: R) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let path_key = self.path_key(key)?;
        let dir = self.config.root.join(path_key.directory());
        fs::create_dir_all(&dir).await?;

        let path = dir.join(&path_key.file_name);
        let mut file = fs::File::create(&path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        debug!(key, path = %path.display(), bytes = written, "Stored entry");
        Ok(written)
    }

    /// Write a byte slice under `key`.
    pub async fn write_bytes(&self, key: &str, data: &[u8]) -> StoreResult<u64> {
        self.write(key, data).await
    }

    /// Read the whole entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if there is no entry.
    pub async fn read(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.entry_path(key)?;
        let content = fs::read(&path)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;

        trace!(key, bytes = content.len(), "Read entry");
        Ok(Bytes::from(content))
    }

    /// Open the entry for `key` for streaming. Returns its size and the open
    /// file.
    pub async fn read_stream(&self, key: &str) -> StoreResult<(u64, fs::File)> {
        let path = self.entry_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        let size = file.metadata().await?.len();
        Ok((size, file))
    }

    /// Remove the entry for `key`. Removing a missing entry succeeds.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let path_key = self.path_key(key)?;

        match self.config.delete_scope {
            DeleteScope::Entry => {
                let dir = self.config.root.join(path_key.directory());
                match fs::remove_file(dir.join(&path_key.file_name)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        trace!(key, "Delete of missing entry");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
                self.prune_empty_dirs(&dir).await;
            }
            DeleteScope::Shard => {
                let shard = match path_key.first_segment() {
                    Some(first) => self.config.root.join(first),
                    None => self.config.root.join(&path_key.file_name),
                };
                let removed = if fs::metadata(&shard).await.map(|m| m.is_dir()).unwrap_or(false) {
                    fs::remove_dir_all(&shard).await
                } else {
                    fs::remove_file(&shard).await
                };
                match removed {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        debug!(key, scope = ?self.config.delete_scope, "Deleted entry");
        Ok(())
    }

    /// Remove `dir` and its ancestors below the root while they are empty.
    async fn prune_empty_dirs(&self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(path) = current {
            if path == self.config.root || !path.starts_with(&self.config.root) {
                break;
            }
            // Fails on the first non-empty directory.
            if fs::remove_dir(path).await.is_err() {
                break;
            }
            current = path.parent();
        }
    }

    /// Remove the root and everything under it.
    pub async fn clear(&self) -> StoreResult<()> {
        match fs::remove_dir_all(&self.config.root).await {
            Ok(()) => {
                debug!(root = %self.config.root.display(), "Cleared store");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::path::CasPathTransform;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn cas_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = StoreConfig::new(temp_dir.path().join("store"))
            .with_path_transform(CasPathTransform::default());
        (Store::new(config), temp_dir)
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (store, _temp) = cas_store();
        let data = b"some jpg bytes";

        assert!(!store.has("picture").await.unwrap());
        let written = store.write_bytes("picture", data).await.unwrap();
        assert_eq!(written, data.len() as u64);
        assert!(store.has("picture").await.unwrap());
        assert_eq!(store.read("picture").await.unwrap(), &data[..]);
    }

    #[tokio::test]
    async fn test_write_lands_on_cas_path() {
        let (store, _temp) = cas_store();
        store.write_bytes("hi how are you bruh", b"x").await.unwrap();

        let expected = store
            .root()
            .join("a8657/b2b50/8f114/51d28/ac942/85a85/e44ce/65362")
            .join("a8657b2b508f11451d28ac94285a85e44ce65362");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (store, _temp) = cas_store();
        store.write_bytes("key", b"first version").await.unwrap();
        store.write_bytes("key", b"second").await.unwrap();

        assert_eq!(store.read("key").await.unwrap(), &b"second"[..]);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (store, _temp) = cas_store();
        assert_eq!(store.write_bytes("empty", b"").await.unwrap(), 0);
        assert!(store.has("empty").await.unwrap());
        assert!(store.read("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let (store, _temp) = cas_store();
        let result = store.read("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound(ref k)) if k == "missing"));

        let result = store.read_stream("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_stream() {
        let (store, _temp) = cas_store();
        store.write_bytes("streamed", b"0123456789").await.unwrap();

        let (size, mut file) = store.read_stream("streamed").await.unwrap();
        assert_eq!(size, 10);

        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"0123456789");
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let (store, _temp) = cas_store();
        store.write_bytes("hi how are you bruh", b"x").await.unwrap();

        store.delete("hi how are you bruh").await.unwrap();
        assert!(!store.has("hi how are you bruh").await.unwrap());
        assert!(!store.root().join("a8657").exists());
        assert!(store.root().exists());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (store, _temp) = cas_store();
        store.write_bytes("key", b"data").await.unwrap();

        store.delete("key").await.unwrap();
        store.delete("key").await.unwrap();
        assert!(matches!(store.read("key").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_shard_delete_removes_first_level() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(
            StoreConfig::new(temp_dir.path())
                .with_path_transform(CasPathTransform::default())
                .with_delete_scope(DeleteScope::Shard),
        );
        store.write_bytes("hi how are you bruh", b"x").await.unwrap();

        store.delete("hi how are you bruh").await.unwrap();
        assert!(!temp_dir.path().join("a8657").exists());
        store.delete("hi how are you bruh").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(StoreConfig::new(temp_dir.path()));

        for key in ["", "..", "a/b", "/abs"] {
            assert!(matches!(store.has(key).await, Err(StoreError::InvalidKey(_))));
            assert!(matches!(
                store.write_bytes(key, b"x").await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp) = cas_store();
        store.write_bytes("a", b"1").await.unwrap();
        store.write_bytes("b", b"2").await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.root().exists());
        assert!(!store.has("a").await.unwrap());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_errors_other_than_not_found_propagate() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(
            StoreConfig::new(temp_dir.path())
                .with_path_transform(|key: &str| PathKey::new(vec!["blocker".to_string()], key)),
        );
        // A regular file where the shard directory should be.
        std::fs::write(temp_dir.path().join("blocker"), b"not a dir").unwrap();

        assert!(matches!(store.has("entry").await, Err(StoreError::Io(_))));
        assert!(matches!(store.read("entry").await, Err(StoreError::Io(_))));
        assert!(matches!(store.write_bytes("entry", b"x").await, Err(StoreError::Io(_))));
    }

    #[test]
    fn test_empty_root_uses_default() {
        let store = Store::new(StoreConfig::new(""));
        assert_eq!(store.root(), Path::new(DEFAULT_ROOT));
        assert_eq!(store.config().delete_scope, DeleteScope::Entry);
    }
}
