//! Filesystem [`Store`] backend (C2).
//!
//! Blob `N` lives at `<root>/<n0>/<n1>/<n2>/<rest-of-name>` where `n0..n2`
//! are the first three characters of `N`'s Base58 textual name (directory
//! fan-out, so no directory ever holds more than a handful of blobs per
//! leading-character bucket). A write opens a sibling temp file
//! (`<rest-of-name>.upload_<n>`), streams into it, then renames over the
//! destination on commit; cancel closes and unlinks the temp file. Missing
//! intermediate directories are created on demand.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use vaultree_name::BlobName;
use vaultree_storage::{BlobWriter, Store, StoreError, StoreResult};

/// Deployable config for an [`FsStore`], in the style of the reference
/// workspace's `LocalStoreConfig`: a single required field, constructed
/// programmatically or deserialized from whatever config format the
/// embedding application picks (no format is mandated here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStoreConfig {
    /// Root directory blobs fan out under.
    pub root: PathBuf,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

/// A `Store` backed by a directory tree on local disk.
#[derive(Debug, Clone)]
pub struct FsStore {
    inner: Arc<Inner>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn from_config(config: FsStoreConfig) -> Self {
        Self::new(config.root)
    }

    fn blob_path(&self, name: &BlobName) -> PathBuf {
        fan_out_path(&self.inner.root, &name.to_string())
    }
}

/// Splits `<root>/<n0>/<n1>/<n2>/<rest>` the way the module docs describe.
fn fan_out_path(root: &Path, text: &str) -> PathBuf {
    let mut chars = text.chars();
    let n0 = chars.next().unwrap_or('_');
    let n1 = chars.next().unwrap_or('_');
    let n2 = chars.next().unwrap_or('_');
    let rest: String = chars.collect();
    root.join(n0.to_string())
        .join(n1.to_string())
        .join(n2.to_string())
        .join(rest)
}

#[async_trait]
impl Store for FsStore {
    async fn open_read(&self, name: &BlobName) -> StoreResult<Box<dyn AsyncRead + Send + Unpin>> {
        let path = self.blob_path(name);
        let file = File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, name: &BlobName) -> StoreResult<Box<dyn BlobWriter>> {
        let key = name.to_string();
        {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            if !in_flight.insert(key.clone()) {
                return Err(StoreError::UploadInProgress(key));
            }
        }

        let dest = self.blob_path(name);
        let parent = dest.parent().expect("blob path always has a parent").to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        let suffix: u64 = rand::rng().random();
        let file_name = dest
            .file_name()
            .expect("blob path always has a file name")
            .to_string_lossy()
            .into_owned();
        let temp_path = parent.join(format!("{file_name}.upload_{suffix}"));

        let file = match File::create(&temp_path).await {
            Ok(f) => f,
            Err(e) => {
                self.inner.in_flight.lock().unwrap().remove(&key);
                return Err(StoreError::Io(e));
            }
        };

        Ok(Box::new(FsWriter {
            inner: self.inner.clone(),
            key,
            dest,
            temp_path,
            file: Some(file),
            finished: false,
        }))
    }

    async fn exists(&self, name: &BlobName) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(name)).await?)
    }

    async fn delete(&self, name: &BlobName) -> StoreResult<()> {
        match tokio::fs::remove_file(self.blob_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

struct FsWriter {
    inner: Arc<Inner>,
    key: String,
    dest: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
    finished: bool,
}

impl Drop for FsWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.in_flight.lock().unwrap().remove(&self.key);
        }
    }
}

#[async_trait]
impl BlobWriter for FsWriter {
    async fn write_all(&mut self, buf: &[u8]) -> StoreResult<()> {
        let file = self.file.as_mut().expect("writer used after commit/cancel");
        file.write_all(buf).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let mut file = self.file.take().expect("writer used after commit/cancel");
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.temp_path, &self.dest).await?;
        self.inner.in_flight.lock().unwrap().remove(&self.key);
        self.finished = true;
        Ok(())
    }

    async fn cancel(mut self: Box<Self>) -> StoreResult<()> {
        self.file.take();
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) | Err(_) => {}
        }
        self.inner.in_flight.lock().unwrap().remove(&self.key);
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultree_storage::testutil::StoreTests;

    #[tokio::test]
    async fn conforms_to_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        StoreTests::new(&store).run_all().await;
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = FsStoreConfig {
            root: PathBuf::from("/var/lib/vaultree/blobs"),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: FsStoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[tokio::test]
    async fn fans_out_by_leading_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let hash = [9u8; 32];
        let name =
            BlobName::from_hash_and_type(&hash, vaultree_name::BlobType::STATIC).unwrap();

        let mut w = store.open_write(&name).await.unwrap();
        w.write_all(b"payload").await.unwrap();
        w.commit().await.unwrap();

        let text = name.to_string();
        let mut chars = text.chars();
        let expected = dir
            .path()
            .join(chars.next().unwrap().to_string())
            .join(chars.next().unwrap().to_string())
            .join(chars.next().unwrap().to_string())
            .join(chars.collect::<String>());
        assert!(expected.exists());
    }
}
