//! Root persistence: the external collaborator that remembers the tree's
//! root `(blob_name, key)` pair across process restarts. Both strings empty
//! means "no root yet, create an empty directory."

use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait RootPersistence: Send + Sync {
    async fn get(&self) -> std::io::Result<(String, String)>;
    async fn set(&self, blob_name: String, key: String) -> std::io::Result<()>;
}

/// An in-process root pointer, useful for tests and single-process
/// deployments where the root doesn't need to outlive the program.
#[derive(Debug, Default)]
pub struct InMemoryRootPersistence {
    state: Mutex<(String, String)>,
}

impl InMemoryRootPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RootPersistence for InMemoryRootPersistence {
    async fn get(&self) -> std::io::Result<(String, String)> {
        Ok(self.state.lock().await.clone())
    }

    async fn set(&self, blob_name: String, key: String) -> std::io::Result<()> {
        *self.state.lock().await = (blob_name, key);
        Ok(())
    }
}
