//! File/directory node graph (C10): a mutable hierarchical overlay over the
//! content-addressed, encrypted blob store in `vaultree_blobcrypt`.
//!
//! A directory's listing is itself stored as an encrypted blob (wire format
//! in `vaultree_dircodec`); a [`DirNode`] keeps that listing cached in
//! memory, lazily loading it on first access and deferring/coalescing
//! writes so that a burst of mutations produces one save, not one per
//! mutation. [`FileNode`] is a plain leaf blob with no listing of its own.
//!
//! [`EntryPoint`] is the crate's top-level handle: it owns the datastore,
//! the default key generator, the root directory, and the counter handing
//! out the monotonic mutation epochs nodes use to know when their subtree
//! has finished saving (see [`DirNode::sync`]).

mod dir;
mod entry_point;
mod epoch;
mod error;
mod file;
mod iter;
mod metadata;
mod node;
mod root;

pub use dir::DirNode;
pub use entry_point::EntryPoint;
pub use epoch::EpochSet;
pub use error::{NodeGraphError, NodeGraphResult};
pub use file::FileNode;
pub use iter::{EntriesIterator, EntriesItem};
pub use metadata::{MetadataError, MetadataMap};
pub use node::Node;
pub use root::{InMemoryRootPersistence, RootPersistence};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vaultree_datastore::Datastore;
    use vaultree_storage_memory::MemoryStore;

    async fn entry_point() -> EntryPoint {
        let datastore = Datastore::with_static_handler(Arc::new(MemoryStore::new()));
        EntryPoint::with_default_key_gen(datastore, Arc::new(InMemoryRootPersistence::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_root_is_empty() {
        let ep = entry_point().await;
        let root = ep.root();
        let mut it = root.entries().await.unwrap();
        assert!(!it.next());
    }

    #[tokio::test]
    async fn set_entry_then_get_entry_round_trips() {
        let ep = entry_point().await;
        let root = ep.root();

        let file = ep.new_detached_file();
        file.save(Box::pin(std::io::Cursor::new(b"hello".to_vec())))
            .await
            .unwrap();

        root.set_entry("greeting.txt", &Node::File(file), MetadataMap::new())
            .await
            .unwrap();

        let (node, _meta) = root.get_entry("greeting.txt").await.unwrap().unwrap();
        let mut reader = node.as_file().unwrap().open().await.unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn sync_waits_for_a_saved_root_to_become_durable() {
        let ep = entry_point().await;
        let root = ep.root();

        let file = ep.new_detached_file();
        file.save(Box::pin(std::io::Cursor::new(b"data".to_vec())))
            .await
            .unwrap();
        root.set_entry("a", &Node::File(file), MetadataMap::new()).await.unwrap();

        root.sync().await.unwrap();

        let (blob_name, key) = root.current_blob_name_and_key().await;
        assert!(!blob_name.is_empty());
        assert!(!key.is_empty());
    }

    #[tokio::test]
    async fn delete_entry_removes_it() {
        let ep = entry_point().await;
        let root = ep.root();

        let file = ep.new_detached_file();
        root.set_entry("temp", &Node::File(file), MetadataMap::new()).await.unwrap();
        assert!(root.get_entry("temp").await.unwrap().is_some());

        assert!(root.delete_entry("temp").await.unwrap());
        assert!(root.get_entry("temp").await.unwrap().is_none());
        assert!(!root.delete_entry("temp").await.unwrap());
    }

    #[tokio::test]
    async fn nested_directory_mutation_propagates_to_root_save() {
        let ep = entry_point().await;
        let root = ep.root();

        let child_dir = ep.new_detached_dir();
        root.set_entry("sub", &Node::Dir(child_dir.clone()), MetadataMap::new())
            .await
            .unwrap();

        let (node, _) = root.get_entry("sub").await.unwrap().unwrap();
        let attached_dir = node.as_dir().unwrap().clone();

        let file = ep.new_detached_file();
        file.save(Box::pin(std::io::Cursor::new(b"nested".to_vec())))
            .await
            .unwrap();
        attached_dir
            .set_entry("inner.txt", &Node::File(file), MetadataMap::new())
            .await
            .unwrap();

        root.sync().await.unwrap();

        let (root_blob, _) = root.current_blob_name_and_key().await;
        assert!(!root_blob.is_empty());
    }

    #[tokio::test]
    async fn set_entry_rejects_a_node_from_a_different_entry_point() {
        let ep_a = entry_point().await;
        let ep_b = entry_point().await;

        let root_a = ep_a.root();
        let file_from_b = ep_b.new_detached_file();

        let err = root_a
            .set_entry("x", &Node::File(file_from_b), MetadataMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGraphError::IncompatibleNode));
    }

    #[tokio::test]
    async fn forked_node_is_independent_of_its_source() {
        let ep = entry_point().await;
        let root = ep.root();

        let file = ep.new_detached_file();
        file.save(Box::pin(std::io::Cursor::new(b"v1".to_vec())))
            .await
            .unwrap();
        let node = Node::File(file.clone());

        root.set_entry("a", &node, MetadataMap::new()).await.unwrap();
        root.set_entry("b", &node, MetadataMap::new()).await.unwrap();

        // Mutating the original after both attaches must not affect either
        // attached copy, since set_entry forked it at attach time.
        file.save(Box::pin(std::io::Cursor::new(b"v2-original-only".to_vec())))
            .await
            .unwrap();

        let (a_node, _) = root.get_entry("a").await.unwrap().unwrap();
        let mut reader = a_node.as_file().unwrap().open().await.unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out).await.unwrap();
        assert_eq!(out, b"v1");
    }
}
