//! Key derivation (C6): how a blob's symmetric key comes into being.
//!
//! [`ContentsHashKey`] derives a key deterministically from the plaintext
//! itself (SHA-256 of the bytes), so saving the same content twice under the
//! same algorithm always yields the same blob name — useful for dedup.
//! [`RandomKey`] instead draws fresh, unrelated key material every time.
//!
//! Because deriving a key from content means consuming the source stream
//! before the key is even known, [`KeyGenerator::derive`] hands back a
//! *replacement* reader standing in for the original: for [`ContentsHashKey`]
//! that's a replay of a [`vaultree_scratch`] buffer, re-hashed as it's read
//! back and checked against the first pass.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use vaultree_cipher::Algorithm;
use vaultree_scratch::ScratchWriter;

#[derive(thiserror::Error, Debug)]
pub enum KeyGenError {
    #[error("key generator produced {0} bytes of key data, need at least 32")]
    InsufficientKeyData(usize),
    #[error("replayed scratch buffer hash does not match the first pass")]
    HashValidationError,
    #[error("malformed key text: {0}")]
    InvalidKeyText(String),
    #[error(transparent)]
    Cipher(#[from] vaultree_cipher::CipherError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raw key-data produced by a generator, before it's truncated to whatever
/// size a particular [`Algorithm`] needs.
#[derive(Clone)]
pub struct KeyData(pub Vec<u8>);

impl KeyData {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

/// Produces the symmetric key-data for a blob being saved.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Whether the same source bytes always yield the same key-data.
    fn is_deterministic(&self) -> bool;

    /// Consumes `source` and returns its key-data plus a reader standing in
    /// for `source` — the caller must read the blob's plaintext from the
    /// returned reader from here on, not from the original.
    async fn derive(&self, source: BoxedAsyncRead) -> Result<(KeyData, BoxedAsyncRead), KeyGenError>;
}

/// Derives key-data as SHA-256 of the plaintext, by spilling it through a
/// [`vaultree_scratch`] buffer so it can be replayed after hashing.
pub struct ContentsHashKey;

#[async_trait]
impl KeyGenerator for ContentsHashKey {
    fn is_deterministic(&self) -> bool {
        true
    }

    async fn derive(&self, mut source: BoxedAsyncRead) -> Result<(KeyData, BoxedAsyncRead), KeyGenError> {
        let mut scratch = ScratchWriter::new().await?;
        let mut hasher = Sha256::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            scratch.write(&chunk[..n]).await?;
        }
        let digest: [u8; 32] = hasher.finalize().into();

        let reader = scratch.reader().await?;
        let verifying = HashVerifyingReader {
            inner: reader,
            hasher: Sha256::new(),
            expected: digest,
            done: false,
        };
        Ok((KeyData(digest.to_vec()), Box::pin(verifying)))
    }
}

/// Wraps a scratch buffer's replay reader, re-hashing every byte read back
/// and comparing the finished digest to the one computed on the first pass.
/// A mismatch means the scratch buffer was corrupted or tampered with
/// between write and replay; it surfaces as an I/O error on the final read.
struct HashVerifyingReader {
    inner: vaultree_scratch::ScratchReader,
    hasher: Sha256,
    expected: [u8; 32],
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
                    let digest: [u8; 32] = this.hasher.clone().finalize().into();
                    if !bool::from(digest.ct_eq(&this.expected)) {
                        return Poll::Ready(Err(std::io::Error::other(KeyGenError::HashValidationError)));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Draws fresh, content-independent random key-data every time.
pub struct RandomKey;

#[async_trait]
impl KeyGenerator for RandomKey {
    fn is_deterministic(&self) -> bool {
        false
    }

    async fn derive(&self, source: BoxedAsyncRead) -> Result<(KeyData, BoxedAsyncRead), KeyGenError> {
        let mut bytes = vec![0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Ok((KeyData(bytes), source))
    }
}

/// Encodes `algorithm`'s textual key as `Base58(algorithm_tag || first
/// key_size() bytes of key_data)`. The saving facade always runs this with
/// key-data of at least 32 bytes (see [`KeyGenError::InsufficientKeyData`]),
/// so there's always enough to take a prefix from regardless of algorithm.
pub fn encode_key_text(algorithm: Algorithm, key_data: &KeyData) -> Result<String, KeyGenError> {
    let key_size = algorithm.key_size();
    if key_data.len() < key_size {
        return Err(KeyGenError::InsufficientKeyData(key_data.len()));
    }
    let mut bytes = Vec::with_capacity(1 + key_size);
    bytes.push(algorithm.tag());
    bytes.extend_from_slice(&key_data.0[..key_size]);
    Ok(bs58::encode(bytes).into_string())
}

/// Parses a textual key into a ready-to-use [`vaultree_cipher::KeyInfo`].
///
/// A strict parse demands the decoded payload be exactly `1 +
/// algorithm.key_size()` bytes. A non-strict parse only demands *at least*
/// that many, silently ignoring trailing bytes — for key-data that was
/// produced with a larger algorithm in mind (e.g. a 32-byte content hash
/// being opened with a 24-byte AES key).
pub fn parse_key_text(text: &str, strict: bool) -> Result<vaultree_cipher::KeyInfo, KeyGenError> {
    let raw = bs58::decode(text)
        .into_vec()
        .map_err(|e| KeyGenError::InvalidKeyText(e.to_string()))?;
    let tag = *raw
        .first()
        .ok_or_else(|| KeyGenError::InvalidKeyText("empty key text".to_string()))?;
    let algorithm = Algorithm::from_tag(tag)?;
    let key_bytes = &raw[1..];
    if strict && key_bytes.len() != algorithm.key_size() {
        return Err(KeyGenError::InvalidKeyText(format!(
            "expected exactly {} key bytes, got {}",
            algorithm.key_size(),
            key_bytes.len()
        )));
    }
    if key_bytes.len() < algorithm.key_size() {
        return Err(KeyGenError::InvalidKeyText(format!(
            "expected at least {} key bytes, got {}",
            algorithm.key_size(),
            key_bytes.len()
        )));
    }
    let key = key_bytes[..algorithm.key_size()].to_vec();
    Ok(vaultree_cipher::KeyInfo::with_zero_iv(algorithm, key)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contents_hash_key_is_deterministic() {
        let gen = ContentsHashKey;
        let (key_a, mut reader_a) = gen
            .derive(Box::pin(std::io::Cursor::new(b"same bytes".to_vec())))
            .await
            .unwrap();
        let (key_b, _) = gen
            .derive(Box::pin(std::io::Cursor::new(b"same bytes".to_vec())))
            .await
            .unwrap();
        assert_eq!(key_a.0, key_b.0);

        let mut replayed = Vec::new();
        reader_a.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"same bytes");
    }

    #[tokio::test]
    async fn contents_hash_key_differs_for_different_content() {
        let gen = ContentsHashKey;
        let (key_a, _) = gen
            .derive(Box::pin(std::io::Cursor::new(b"alpha".to_vec())))
            .await
            .unwrap();
        let (key_b, _) = gen
            .derive(Box::pin(std::io::Cursor::new(b"beta".to_vec())))
            .await
            .unwrap();
        assert_ne!(key_a.0, key_b.0);
    }

    #[tokio::test]
    async fn random_key_is_not_deterministic() {
        let gen = RandomKey;
        let (key_a, _) = gen
            .derive(Box::pin(std::io::Cursor::new(b"same".to_vec())))
            .await
            .unwrap();
        let (key_b, _) = gen
            .derive(Box::pin(std::io::Cursor::new(b"same".to_vec())))
            .await
            .unwrap();
        assert_ne!(key_a.0, key_b.0);
        assert!(!gen.is_deterministic());
    }

    #[test]
    fn key_text_round_trips_strict() {
        let key_data = KeyData(vec![9u8; 32]);
        let text = encode_key_text(Algorithm::ChaCha20, &key_data).unwrap();
        let info = parse_key_text(&text, true).unwrap();
        assert_eq!(info.algorithm, Algorithm::ChaCha20);
        assert_eq!(info.key, vec![9u8; 32]);
    }

    #[test]
    fn key_text_non_strict_accepts_truncated_algorithm() {
        // 32-byte content hash, but encoded for the 24-byte AES key.
        let key_data = KeyData(vec![3u8; 32]);
        let text = encode_key_text(Algorithm::Aes256Ctr, &key_data).unwrap();
        let info = parse_key_text(&text, false).unwrap();
        assert_eq!(info.algorithm, Algorithm::Aes256Ctr);
        assert_eq!(info.key.len(), 24);
    }

    #[test]
    fn encode_rejects_insufficient_key_data() {
        let key_data = KeyData(vec![1u8; 8]);
        let err = encode_key_text(Algorithm::ChaCha20, &key_data).unwrap_err();
        assert!(matches!(err, KeyGenError::InsufficientKeyData(8)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_key_text("not-base-58-!!!", true).is_err());
    }
}
