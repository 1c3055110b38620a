use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use vaultree_datastore::Datastore;
use vaultree_keygen::{ContentsHashKey, KeyGenerator};

use crate::dir::DirNode;
use crate::error::NodeGraphResult;
use crate::file::FileNode;
use crate::root::RootPersistence;

/// The bundle of shared state every node needs: where blobs live, how keys
/// are derived, and the counter handing out monotonic mutation epochs.
/// Kept crate-private — callers only ever see [`EntryPoint`], [`DirNode`]
/// and [`FileNode`].
#[derive(Clone)]
pub(crate) struct EntryPointHandle {
    pub(crate) datastore: Datastore,
    pub(crate) key_gen: Arc<dyn KeyGenerator>,
    epoch: Arc<AtomicI64>,
}

impl EntryPointHandle {
    pub(crate) fn next_epoch(&self) -> i64 {
        self.epoch.fetch_add(1, Ordering::SeqCst)
    }

    /// Two handles are the same `EntryPoint` iff they share the same epoch
    /// counter — every node made by one `EntryPoint` holds a clone of it.
    pub(crate) fn same_entry_point(&self, other: &EntryPointHandle) -> bool {
        Arc::ptr_eq(&self.epoch, &other.epoch)
    }
}

/// Process-wide handle bundling a datastore, a default key generator, a
/// persistence sink for the root `(blob_name, key)`, a root [`DirNode`],
/// and the monotonic epoch counter nodes use to timestamp mutations.
pub struct EntryPoint {
    handle: EntryPointHandle,
    root: DirNode,
}

impl EntryPoint {
    /// Loads (or initializes, if both strings are empty) the root directory
    /// from `root_persistence`, deriving blob keys with `key_gen`.
    pub async fn new(
        datastore: Datastore,
        key_gen: Arc<dyn KeyGenerator>,
        root_persistence: Arc<dyn RootPersistence>,
    ) -> NodeGraphResult<Self> {
        let (blob_name, key) = root_persistence.get().await?;
        let handle = EntryPointHandle {
            datastore,
            key_gen,
            epoch: Arc::new(AtomicI64::new(0)),
        };
        let root = DirNode::new(handle.clone(), blob_name, key, None);
        root.set_root_sink(root_persistence).await;
        Ok(Self { handle, root })
    }

    /// Convenience constructor using the deterministic content-hash
    /// generator, the default this system saves with.
    pub async fn with_default_key_gen(
        datastore: Datastore,
        root_persistence: Arc<dyn RootPersistence>,
    ) -> NodeGraphResult<Self> {
        Self::new(datastore, Arc::new(ContentsHashKey), root_persistence).await
    }

    /// A cheap handle to the root directory; clones share the same
    /// underlying node.
    pub fn root(&self) -> DirNode {
        self.root.clone()
    }

    /// A fresh, detached directory not yet attached anywhere. Attach it to
    /// a parent with [`DirNode::set_entry`].
    pub fn new_detached_dir(&self) -> DirNode {
        DirNode::new(self.handle.clone(), String::new(), String::new(), None)
    }

    /// A fresh, detached empty file.
    pub fn new_detached_file(&self) -> FileNode {
        FileNode::new(self.handle.clone(), String::new(), String::new(), None)
    }
}
