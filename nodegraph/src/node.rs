//! [`Node`]: the sum type every directory entry points at, plus the cheap
//! "fork" clone `DirNode::set_entry` uses to attach a node under a new
//! parent without disturbing the original.

use crate::dir::DirNode;
use crate::entry_point::EntryPointHandle;
use crate::file::FileNode;

/// A child of a directory listing: either another directory or a file.
/// Cloning a `Node` is cheap — it clones the `Arc` handle, not the node's
/// content — see [`Node::fork`] for the deeper, still-cheap clone used when
/// attaching a node under a second parent.
#[derive(Clone)]
pub enum Node {
    Dir(DirNode),
    File(FileNode),
}

impl Node {
    pub(crate) fn entry_point_handle(&self) -> &EntryPointHandle {
        match self {
            Node::Dir(d) => d.entry_point_handle(),
            Node::File(f) => f.entry_point_handle(),
        }
    }

    /// Produces a new, detached node bound to `parent`, pointing at the same
    /// currently-persisted `(blob_name, key)` as `self`. It loads lazily and
    /// independently of `self` on first access — mutations of one do not
    /// reach the other, matching the attach-by-reference semantics
    /// `DirNode::set_entry` needs.
    pub(crate) async fn fork(&self, parent: Node) -> Node {
        match self {
            Node::Dir(d) => {
                let (blob_name, key) = d.current_blob_name_and_key().await;
                Node::Dir(DirNode::new(d.entry_point_handle().clone(), blob_name, key, Some(parent)))
            }
            Node::File(f) => {
                let (blob_name, key) = f.current_blob_name_and_key().await;
                Node::File(FileNode::new(f.entry_point_handle().clone(), blob_name, key, Some(parent)))
            }
        }
    }

    pub(crate) async fn clear_parent(&self) {
        match self {
            Node::Dir(d) => d.clear_parent().await,
            Node::File(f) => f.clear_parent().await,
        }
    }

    pub(crate) async fn current_blob_name_and_key(&self) -> (String, String) {
        match self {
            Node::Dir(d) => d.current_blob_name_and_key().await,
            Node::File(f) => f.current_blob_name_and_key().await,
        }
    }

    pub(crate) async fn ensure_initial_blob(&self) -> crate::error::NodeGraphResult<()> {
        match self {
            Node::Dir(d) => d.ensure_initial_blob().await,
            Node::File(f) => f.ensure_initial_blob().await,
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Dir(a), Node::Dir(b)) => a.is(b),
            (Node::File(a), Node::File(b)) => a.is(b),
            _ => false,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }
}
