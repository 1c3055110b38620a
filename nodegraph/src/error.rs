use std::sync::Arc;

use crate::metadata::MetadataError;

#[derive(thiserror::Error, Debug, Clone)]
pub enum NodeGraphError {
    #[error("entry name is empty")]
    EmptyName,
    #[error("entry name is {0} bytes, exceeds the limit of 1024")]
    NameTooLong(usize),
    #[error("node belongs to a different EntryPoint")]
    IncompatibleNode,
    #[error("iteration was cancelled")]
    IterationCancelled,
    #[error("directory failed to load: {0}")]
    LoadFailed(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("directory blob is malformed: {0}")]
    Malformed(#[from] vaultree_dircodec::MalformedDirectoryBlob),
    #[error("blob operation failed: {0}")]
    Blob(Arc<vaultree_blobcrypt::BlobCryptError>),
    #[error("{0}")]
    Io(Arc<std::io::Error>),
}

impl From<vaultree_blobcrypt::BlobCryptError> for NodeGraphError {
    fn from(e: vaultree_blobcrypt::BlobCryptError) -> Self {
        NodeGraphError::Blob(Arc::new(e))
    }
}

impl From<std::io::Error> for NodeGraphError {
    fn from(e: std::io::Error) -> Self {
        NodeGraphError::Io(Arc::new(e))
    }
}

pub type NodeGraphResult<T> = Result<T, NodeGraphError>;
