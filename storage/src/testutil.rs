//! Conformance test suite for [`Store`] implementations.
//!
//! Every backend crate (`vaultree_storage_memory`, `vaultree_storage_fs`)
//! runs this suite against itself so the atomicity and not-found contract in
//! the module docs stays enforced uniformly.
//!
//! ```ignore
//! use vaultree_storage::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn conforms() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await;
//! }
//! ```

use crate::{Store, StoreError};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use vaultree_name::{BlobName, BlobType};

pub struct StoreTests<'a, S> {
    store: &'a S,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn name_for(bytes: &[u8]) -> BlobName {
        let hash = Sha256::digest(bytes);
        BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap()
    }

    pub async fn run_all(&self) {
        self.round_trips_write_then_read().await;
        self.missing_blob_is_not_found().await;
        self.cancel_leaves_no_trace().await;
        self.concurrent_write_is_rejected().await;
        self.delete_is_idempotent().await;
    }

    pub async fn round_trips_write_then_read(&self) {
        let data = random_bytes(4096);
        let name = Self::name_for(&data);

        assert!(!self.store.exists(&name).await.unwrap());

        let mut w = self.store.open_write(&name).await.unwrap();
        w.write_all(&data).await.unwrap();
        w.commit().await.unwrap();

        assert!(self.store.exists(&name).await.unwrap());
        let mut r = self.store.open_read(&name).await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, data);
    }

    pub async fn missing_blob_is_not_found(&self) {
        let name = Self::name_for(b"never written");
        match self.store.open_read(&name).await {
            Err(StoreError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    pub async fn cancel_leaves_no_trace(&self) {
        let data = random_bytes(256);
        let name = Self::name_for(&data);

        let mut w = self.store.open_write(&name).await.unwrap();
        w.write_all(&data).await.unwrap();
        w.cancel().await.unwrap();

        assert!(!self.store.exists(&name).await.unwrap());
        assert!(self.store.open_read(&name).await.is_err());
    }

    pub async fn concurrent_write_is_rejected(&self) {
        let data = random_bytes(128);
        let name = Self::name_for(&data);

        let first = self.store.open_write(&name).await.unwrap();
        match self.store.open_write(&name).await {
            Err(StoreError::UploadInProgress(_)) => {}
            other => panic!("expected UploadInProgress, got {other:?}"),
        }
        first.cancel().await.unwrap();

        // Now that the first writer released the slot, a new one succeeds.
        let w = self.store.open_write(&name).await.unwrap();
        w.cancel().await.unwrap();
    }

    pub async fn delete_is_idempotent(&self) {
        let data = random_bytes(64);
        let name = Self::name_for(&data);

        let mut w = self.store.open_write(&name).await.unwrap();
        w.write_all(&data).await.unwrap();
        w.commit().await.unwrap();

        self.store.delete(&name).await.unwrap();
        assert!(!self.store.exists(&name).await.unwrap());
        // Deleting again is not an error.
        self.store.delete(&name).await.unwrap();
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}
