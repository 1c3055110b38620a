//! Datastore (C3): the single read/write face over a [`Store`], parameterized
//! by a handler registry keyed on [`BlobType`].
//!
//! `read` re-validates bytes against the hash embedded in the blob's own
//! name; `update` routes through the type's `Ingest` handler and commits or
//! cancels the pending write depending on the outcome.

mod handler;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;
use vaultree_name::{BlobName, BlobType};
use vaultree_storage::{Store, StoreError};

pub use handler::{BlobTypeHandler, StaticBlobHandler};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("static blob hash does not match its name")]
    InvalidStaticBlobHash,
    #[error("{0}")]
    Other(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DatastoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("upload already in progress for: {0}")]
    UploadInProgress(String),
    #[error("unknown blob type: {0}")]
    UnknownBlobType(BlobType),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DatastoreResult<T> = Result<T, DatastoreError>;

impl From<StoreError> for DatastoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(n) => DatastoreError::NotFound(n),
            StoreError::UploadInProgress(n) => DatastoreError::UploadInProgress(n),
            StoreError::Io(e) => DatastoreError::Io(e),
        }
    }
}

/// Per-`BlobType` dispatch table of [`BlobTypeHandler`]s.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u8, Arc<dyn BlobTypeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in `static` handler under [`BlobType::STATIC`].
    pub fn with_static_handler(mut self) -> Self {
        self.register(BlobType::STATIC, Arc::new(StaticBlobHandler));
        self
    }

    pub fn register(&mut self, ty: BlobType, handler: Arc<dyn BlobTypeHandler>) {
        self.handlers.insert(ty.0, handler);
    }

    fn get(&self, ty: BlobType) -> DatastoreResult<&Arc<dyn BlobTypeHandler>> {
        self.handlers
            .get(&ty.0)
            .ok_or(DatastoreError::UnknownBlobType(ty))
    }
}

/// The content-addressed datastore: a [`Store`] plus a [`HandlerRegistry`].
#[derive(Debug, Clone)]
pub struct Datastore {
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
}

impl Datastore {
    pub fn new(store: Arc<dyn Store>, registry: HandlerRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// Convenience constructor wired with only the built-in `static` handler.
    pub fn with_static_handler(store: Arc<dyn Store>) -> Self {
        Self::new(store, HandlerRegistry::new().with_static_handler())
    }

    /// Reads a blob, piping its bytes through the type handler's `Validate`
    /// into `sink`. Fails with [`DatastoreError::Validation`] — not a silent
    /// truncated read — if the bytes don't hash to the name.
    #[instrument(skip(self, sink), fields(name = %name))]
    pub async fn read(
        &self,
        name: &BlobName,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> DatastoreResult<()> {
        let handler = self.registry.get(name.ty())?;
        let mut reader = self.store.open_read(name).await?;
        handler.validate(name.hash(), reader.as_mut(), sink).await
    }

    /// Opens a streaming, hash-verifying reader directly over a blob's
    /// bytes, for callers that want a reader rather than a sink (e.g. the
    /// decrypting facade in `vaultree_blobcrypt`). A hash mismatch surfaces
    /// as an I/O error on the reader's final `read`, not upfront.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn open_read(
        &self,
        name: &BlobName,
    ) -> DatastoreResult<Box<dyn AsyncRead + Send + Unpin>> {
        let handler = self.registry.get(name.ty())?;
        let reader = self.store.open_read(name).await?;
        Ok(handler.open_validated(name.hash().to_vec(), reader))
    }

    /// Updates (creates or replaces) a blob. Opens an exclusive write,
    /// optionally the current version, and hands both to the type's
    /// `Ingest` handler. Any error cancels the pending write; success
    /// commits it.
    #[instrument(skip(self, source), fields(name = %name))]
    pub async fn update(
        &self,
        name: &BlobName,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DatastoreResult<()> {
        let handler = self.registry.get(name.ty())?;

        let mut writer = self.store.open_write(name).await?;

        let current: Option<Box<dyn AsyncRead + Send + Unpin>> =
            match self.store.exists(name).await {
                Ok(true) => self.store.open_read(name).await.ok(),
                _ => None,
            };

        match handler.ingest(name.hash(), current, source, writer.as_mut()).await {
            Ok(()) => writer.commit().await.map_err(Into::into),
            Err(e) => {
                let _ = writer.cancel().await;
                Err(e)
            }
        }
    }

    pub async fn exists(&self, name: &BlobName) -> DatastoreResult<bool> {
        Ok(self.store.exists(name).await?)
    }

    pub async fn delete(&self, name: &BlobName) -> DatastoreResult<()> {
        Ok(self.store.delete(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use vaultree_storage_memory::MemoryStore;

    fn static_name(bytes: &[u8]) -> BlobName {
        let hash = Sha256::digest(bytes);
        BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap()
    }

    #[tokio::test]
    async fn update_then_read_round_trips() {
        let ds = Datastore::with_static_handler(Arc::new(MemoryStore::new()));
        let data = b"hello datastore".to_vec();
        let name = static_name(&data);

        ds.update(&name, &mut std::io::Cursor::new(data.clone()))
            .await
            .unwrap();

        let mut out = Vec::new();
        ds.read(&name, &mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn mismatched_bytes_fail_validation_and_dont_commit() {
        let ds = Datastore::with_static_handler(Arc::new(MemoryStore::new()));
        let real = static_name(b"expected bytes");
        let wrong_bytes = b"this is not it".to_vec();

        let err = ds
            .update(&real, &mut std::io::Cursor::new(wrong_bytes))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DatastoreError::Validation(ValidationFailure::InvalidStaticBlobHash)
        ));
        assert!(!ds.exists(&real).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_blob_type_is_rejected() {
        let ds = Datastore::with_static_handler(Arc::new(MemoryStore::new()));
        let name = BlobName::from_hash_and_type(&[1u8; 4], BlobType(0x7f)).unwrap();
        let err = ds
            .update(&name, &mut std::io::Cursor::new(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::UnknownBlobType(_)));
    }

    #[tokio::test]
    async fn empty_blob_round_trips() {
        let ds = Datastore::with_static_handler(Arc::new(MemoryStore::new()));
        let name = static_name(b"");
        ds.update(&name, &mut std::io::Cursor::new(Vec::<u8>::new()))
            .await
            .unwrap();
        let mut out = Vec::new();
        ds.read(&name, &mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn bad_ciphertext_on_disk_is_rejected_not_treated_as_eof() {
        let store = Arc::new(MemoryStore::new());
        let ds = Datastore::with_static_handler(store.clone());
        let data = b"some bytes to corrupt".to_vec();
        let name = static_name(&data);
        ds.update(&name, &mut std::io::Cursor::new(data.clone()))
            .await
            .unwrap();

        // Flip a byte directly in the backend, bypassing the datastore.
        use vaultree_storage::Store;
        let mut corrupted = data.clone();
        corrupted[0] ^= 0xff;
        let mut w = store.open_write(&name).await.unwrap();
        use vaultree_storage::BlobWriter;
        w.write_all(&corrupted).await.unwrap();
        w.commit().await.unwrap();

        let mut out = Vec::new();
        let err = ds.read(&name, &mut out).await.unwrap_err();
        assert!(matches!(
            err,
            DatastoreError::Validation(ValidationFailure::InvalidStaticBlobHash)
        ));
    }
}
