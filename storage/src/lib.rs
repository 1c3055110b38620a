//! Storage backends (C2): per-name streaming read/write with atomic publish
//! or cancel.
//!
//! A backend offers `open_read`, `open_write`, `exists` and `delete` over a
//! [`vaultree_name::BlobName`]. Writes are atomic: until a writer's
//! [`BlobWriter::commit`] succeeds, neither `exists` nor `open_read` observes
//! the new bytes. [`BlobWriter::cancel`] leaves any prior version intact and
//! never observable. At most one write per name may be in flight; a second
//! concurrent `open_write` for the same name fails fast with
//! [`StoreError::UploadInProgress`].

use async_trait::async_trait;
use std::io;
use tokio::io::AsyncRead;
use vaultree_name::BlobName;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("upload already in progress for: {0}")]
    UploadInProgress(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single blob's open write, streamed into incrementally.
///
/// Exactly one of `commit` or `cancel` must be called to release the
/// backend's per-name write exclusion; dropping a writer without calling
/// either is equivalent to `cancel` for backends that can detect it, but
/// callers should not rely on `Drop` for cleanup — always call one
/// explicitly.
#[async_trait]
pub trait BlobWriter: Send {
    /// Appends bytes to the pending write. Not guaranteed visible to readers
    /// until `commit` succeeds.
    async fn write_all(&mut self, buf: &[u8]) -> StoreResult<()>;

    /// Publishes the write atomically. After this returns `Ok`, `exists` and
    /// `open_read` observe the new bytes.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discards the write. The prior version (if any) is left untouched and
    /// no bytes of this attempt become observable.
    async fn cancel(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    /// Opens a stream over a blob's current committed bytes.
    async fn open_read(&self, name: &BlobName) -> StoreResult<Box<dyn AsyncRead + Send + Unpin>>;

    /// Opens an exclusive write for `name`. Fails with
    /// [`StoreError::UploadInProgress`] if another write for the same name
    /// is already open.
    async fn open_write(&self, name: &BlobName) -> StoreResult<Box<dyn BlobWriter>>;

    async fn exists(&self, name: &BlobName) -> StoreResult<bool>;

    /// Deletes a blob. Deleting a nonexistent blob is not an error.
    async fn delete(&self, name: &BlobName) -> StoreResult<()>;
}

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
