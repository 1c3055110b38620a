//! In-memory [`Store`] backend (C2): a map guarded by a reader/writer lock,
//! plus a set of names currently under write.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use vaultree_name::BlobName;
use vaultree_storage::{BlobWriter, Store, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    blobs: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    in_flight: RwLock<HashSet<Vec<u8>>>,
}

/// A `Store` that keeps every blob in a process-local map. Useful for tests
/// and ephemeral deployments; nothing is persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn open_read(&self, name: &BlobName) -> StoreResult<Box<dyn AsyncRead + Send + Unpin>> {
        let blobs = self.inner.blobs.read().await;
        let bytes = blobs
            .get(name.as_bytes())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?
            .clone();
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn open_write(&self, name: &BlobName) -> StoreResult<Box<dyn BlobWriter>> {
        let mut in_flight = self.inner.in_flight.write().await;
        let key = name.as_bytes().to_vec();
        if !in_flight.insert(key.clone()) {
            return Err(StoreError::UploadInProgress(name.to_string()));
        }
        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
            key,
            buf: Vec::new(),
            finished: false,
        }))
    }

    async fn exists(&self, name: &BlobName) -> StoreResult<bool> {
        Ok(self.inner.blobs.read().await.contains_key(name.as_bytes()))
    }

    async fn delete(&self, name: &BlobName) -> StoreResult<()> {
        self.inner.blobs.write().await.remove(name.as_bytes());
        Ok(())
    }
}

struct MemoryWriter {
    inner: Arc<Inner>,
    key: Vec<u8>,
    buf: Vec<u8>,
    finished: bool,
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if !self.finished {
            let inner = self.inner.clone();
            let key = self.key.clone();
            tokio::spawn(async move {
                inner.in_flight.write().await.remove(&key);
            });
        }
    }
}

#[async_trait]
impl BlobWriter for MemoryWriter {
    async fn write_all(&mut self, buf: &[u8]) -> StoreResult<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let buf = std::mem::take(&mut self.buf);
        self.inner.blobs.write().await.insert(self.key.clone(), buf);
        self.inner.in_flight.write().await.remove(&self.key);
        self.finished = true;
        Ok(())
    }

    async fn cancel(mut self: Box<Self>) -> StoreResult<()> {
        self.inner.in_flight.write().await.remove(&self.key);
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
        let store = MemoryStore::new();
        StoreTests::new(&store).run_all().await;
    }
}
