use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use vaultree_storage::BlobWriter;

use crate::{DatastoreError, DatastoreResult, ValidationFailure};

/// Per-blob-type plug-in. Registered into a [`crate::HandlerRegistry`] under
/// the [`vaultree_name::BlobType`] it serves.
#[async_trait]
pub trait BlobTypeHandler: std::fmt::Debug + Send + Sync + 'static {
    /// Streams `reader` through to `sink`, verifying that the bytes hash to
    /// `hash`. Bytes are forwarded to `sink` as they're read; on a hash
    /// mismatch at EOF this returns [`DatastoreError::Validation`] instead of
    /// treating end-of-stream as success — the caller must be able to tell
    /// truncation or mutation apart from a clean read.
    async fn validate(
        &self,
        hash: &[u8],
        reader: &mut (dyn AsyncRead + Send + Unpin),
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> DatastoreResult<()>;

    /// Decides the final bytes for an update: given the hash the name
    /// commits to, the blob's current bytes (if any), and the proposed
    /// source bytes, writes the bytes that should be committed into
    /// `output`. Returning an error aborts the update (the pending write is
    /// cancelled, never promoted).
    async fn ingest(
        &self,
        hash: &[u8],
        current: Option<Box<dyn AsyncRead + Send + Unpin>>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut dyn BlobWriter,
    ) -> DatastoreResult<()>;

    /// Wraps a freshly-opened storage reader in whatever streaming
    /// verification this type needs, so a caller can read the blob directly
    /// without routing through a sink. A mismatch surfaces as an I/O error
    /// on the final read rather than a silently truncated stream.
    fn open_validated(
        &self,
        hash: Vec<u8>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Box<dyn AsyncRead + Send + Unpin>;
}

/// Streams `inner` through unchanged while hashing it, and on reaching EOF
/// checks the digest against `expected` — surfacing a mismatch as an I/O
/// error on that final read instead of silently returning truncated data.
struct HashVerifyingReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    hasher: Sha256,
    expected: Vec<u8>,
    done: bool,
}

impl AsyncRead for HashVerifyingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let after = buf.filled().len();
                if after > before {
                    this.hasher.update(&buf.filled()[before..after]);
                } else {
                    this.done = true;
                    let digest = this.hasher.clone().finalize();
                    if !bool::from(digest.as_slice().ct_eq(&this.expected)) {
                        return Poll::Ready(Err(std::io::Error::other(
                            ValidationFailure::InvalidStaticBlobHash,
                        )));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Handler for [`vaultree_name::BlobType::STATIC`]: SHA-256 content-addressed,
/// immutable blobs.
///
/// `ingest` is, at this revision, simply "validate the incoming stream and
/// copy to output" — the current version (if any) is ignored, since static
/// blobs are addressed by their own hash and an update that doesn't match
/// the name's hash is rejected regardless of what's already stored.
#[derive(Debug, Default)]
pub struct StaticBlobHandler;

const CHUNK: usize = 64 * 1024;

#[async_trait]
impl BlobTypeHandler for StaticBlobHandler {
    async fn validate(
        &self,
        hash: &[u8],
        reader: &mut (dyn AsyncRead + Send + Unpin),
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> DatastoreResult<()> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink.write_all(&buf[..n]).await?;
        }
        sink.flush().await?;

        let digest = hasher.finalize();
        if bool::from(digest.as_slice().ct_eq(hash)) {
            Ok(())
        } else {
            Err(DatastoreError::Validation(ValidationFailure::InvalidStaticBlobHash))
        }
    }

    async fn ingest(
        &self,
        hash: &[u8],
        _current: Option<Box<dyn AsyncRead + Send + Unpin>>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut dyn BlobWriter,
    ) -> DatastoreResult<()> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            output.write_all(&buf[..n]).await?;
        }

        let digest = hasher.finalize();
        if bool::from(digest.as_slice().ct_eq(hash)) {
            Ok(())
        } else {
            Err(DatastoreError::Validation(ValidationFailure::InvalidStaticBlobHash))
        }
    }

    fn open_validated(
        &self,
        hash: Vec<u8>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(HashVerifyingReader {
            inner: reader,
            hasher: Sha256::new(),
            expected: hash,
            done: false,
        })
    }
}
