//! [`FileNode`]: a leaf blob with no internal structure of its own. Unlike
//! a directory, a file's save is immediate and uncoalesced — there's no
//! listing to batch multiple writers against, so every `save` call produces
//! its own blob and notifies the parent directly.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use vaultree_keygen::BoxedAsyncRead;
use vaultree_name::BlobName;

use crate::entry_point::EntryPointHandle;
use crate::epoch::EpochSet;
use crate::error::{NodeGraphError, NodeGraphResult};
use crate::node::Node;

struct FileState {
    blob_name: String,
    key: String,
}

pub(crate) struct FileNodeShared {
    entry_point: EntryPointHandle,
    parent: RwLock<Option<Node>>,
    state: RwLock<FileState>,
}

/// A cheap, cloneable handle to a file node. An empty `blob_name` means the
/// file has never been saved; reading it yields zero bytes.
#[derive(Clone)]
pub struct FileNode(pub(crate) Arc<FileNodeShared>);

impl FileNode {
    pub(crate) fn new(entry_point: EntryPointHandle, blob_name: String, key: String, parent: Option<Node>) -> Self {
        FileNode(Arc::new(FileNodeShared {
            entry_point,
            parent: RwLock::new(parent),
            state: RwLock::new(FileState { blob_name, key }),
        }))
    }

    pub(crate) fn entry_point_handle(&self) -> &EntryPointHandle {
        &self.0.entry_point
    }

    pub(crate) fn is(&self, other: &FileNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) async fn clear_parent(&self) {
        *self.0.parent.write().await = None;
    }

    pub(crate) async fn current_blob_name_and_key(&self) -> (String, String) {
        let s = self.0.state.read().await;
        (s.blob_name.clone(), s.key.clone())
    }

    /// Mints a real (empty-content) blob for a never-saved file, so it has
    /// a name a parent directory's listing can reference. A no-op once the
    /// file has been saved at least once.
    pub(crate) async fn ensure_initial_blob(&self) -> NodeGraphResult<()> {
        let needs_save = self.0.state.read().await.blob_name.is_empty();
        if needs_save {
            self.save(Box::pin(std::io::Cursor::new(Vec::new()))).await?;
        }
        Ok(())
    }

    /// Opens the file's current contents for reading. A never-saved file
    /// reads as empty.
    pub async fn open(&self) -> NodeGraphResult<Box<dyn AsyncRead + Send + Unpin>> {
        let (blob_name, key) = self.current_blob_name_and_key().await;
        if blob_name.is_empty() {
            return Ok(Box::new(std::io::Cursor::new(Vec::<u8>::new())));
        }
        let name = BlobName::from_string(&blob_name).map_err(|e| NodeGraphError::LoadFailed(e.to_string()))?;
        let reader = vaultree_blobcrypt::open(&self.0.entry_point.datastore, &name, &key).await?;
        Ok(reader)
    }

    /// Encrypts and stores `source` as this file's new contents, then
    /// notifies the parent directory (if attached) that this entry's
    /// pointer changed.
    pub async fn save(&self, source: BoxedAsyncRead) -> NodeGraphResult<()> {
        let (name, key) =
            vaultree_blobcrypt::save(&self.0.entry_point.datastore, self.0.entry_point.key_gen.as_ref(), source)
                .await?;
        let blob_name_text = name.to_string();

        {
            let mut s = self.0.state.write().await;
            s.blob_name = blob_name_text.clone();
            s.key = key.clone();
        }

        // A file's save is synchronous and already committed by this point,
        // so it has no outstanding epochs of its own to report — only the
        // parent's own listing pointer is now stale, which `persist_child_change`
        // accounts for with a fresh epoch of its own.
        let parent = self.0.parent.read().await.clone();
        if let Some(Node::Dir(p)) = parent {
            p.persist_child_change(&Node::File(self.clone()), blob_name_text, key, EpochSet::empty())
                .await;
        }

        Ok(())
    }
}
