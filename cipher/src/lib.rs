//! Cipher factory (C5): stream ciphers keyed by `(algorithm-tag, key, iv)`
//! with strict key/iv size checks.
//!
//! These are unauthenticated keystream ciphers — authenticity of the
//! plaintext is provided by the surrounding content hash (see
//! `vaultree_datastore`), never by the cipher itself. Because a stream
//! cipher's "encrypt" and "decrypt" operations are both "XOR with the
//! keystream", a single [`CipherReader`] adapter serves both directions:
//! wrapping a plaintext reader produces a ciphertext reader, and wrapping a
//! ciphertext reader produces a plaintext reader.

use std::pin::Pin;
use std::task::{Context, Poll};

use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use tokio::io::{AsyncRead, ReadBuf};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key: expected {expected_key} key bytes and {expected_iv} iv bytes for {algorithm:?}, got {actual_key}/{actual_iv}")]
    InvalidKey {
        algorithm: Algorithm,
        expected_key: usize,
        expected_iv: usize,
        actual_key: usize,
        actual_iv: usize,
    },
    #[error("unknown cipher algorithm tag {0:#04x}")]
    UnknownAlgorithm(u8),
}

/// Stream cipher algorithm, tagged by the leading byte of a textual key.
///
/// Key sizes follow spec.md literally: the 24-byte "AES-256-CTR" key is
/// implemented with the AES block cipher variant that actually takes a
/// 24-byte key (AES-192 in conventional terminology) run in CTR mode — see
/// DESIGN.md for why the spec's own nomenclature and key size disagree and
/// how that's resolved here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Aes256Ctr,
    ChaCha20,
}

impl Algorithm {
    pub const TAG_AES_256_CTR: u8 = 0x01;
    pub const TAG_CHACHA20: u8 = 0x02;

    pub fn from_tag(tag: u8) -> Result<Self, CipherError> {
        match tag {
            Self::TAG_AES_256_CTR => Ok(Algorithm::Aes256Ctr),
            Self::TAG_CHACHA20 => Ok(Algorithm::ChaCha20),
            other => Err(CipherError::UnknownAlgorithm(other)),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Algorithm::Aes256Ctr => Self::TAG_AES_256_CTR,
            Algorithm::ChaCha20 => Self::TAG_CHACHA20,
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            Algorithm::Aes256Ctr => 24,
            Algorithm::ChaCha20 => 32,
        }
    }

    pub fn iv_size(&self) -> usize {
        match self {
            Algorithm::Aes256Ctr => 16,
            Algorithm::ChaCha20 => 12,
        }
    }
}

/// `(algorithm, key_bytes, iv_bytes)`, validated on construction.
#[derive(Clone)]
pub struct KeyInfo {
    pub algorithm: Algorithm,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl KeyInfo {
    pub fn new(algorithm: Algorithm, key: Vec<u8>, iv: Vec<u8>) -> Result<Self, CipherError> {
        if key.len() != algorithm.key_size() || iv.len() != algorithm.iv_size() {
            return Err(CipherError::InvalidKey {
                algorithm,
                expected_key: algorithm.key_size(),
                expected_iv: algorithm.iv_size(),
                actual_key: key.len(),
                actual_iv: iv.len(),
            });
        }
        Ok(Self { algorithm, key, iv })
    }

    /// Builds a `KeyInfo` with an all-zero iv, the convention this system
    /// uses since the key itself is never reused across blobs.
    pub fn with_zero_iv(algorithm: Algorithm, key: Vec<u8>) -> Result<Self, CipherError> {
        Self::new(algorithm, key, vec![0u8; algorithm.iv_size()])
    }
}

trait DynStreamCipher: Send {
    fn apply(&mut self, buf: &mut [u8]);
}

impl<T: StreamCipher + Send> DynStreamCipher for T {
    fn apply(&mut self, buf: &mut [u8]) {
        self.apply_keystream(buf);
    }
}

fn build(info: &KeyInfo) -> Result<Box<dyn DynStreamCipher>, CipherError> {
    match info.algorithm {
        Algorithm::Aes256Ctr => {
            let key = cipher::generic_array::GenericArray::from_slice(&info.key);
            let iv = cipher::generic_array::GenericArray::from_slice(&info.iv);
            Ok(Box::new(Ctr128BE::<aes::Aes192>::new(key, iv)))
        }
        Algorithm::ChaCha20 => {
            let key = cipher::generic_array::GenericArray::from_slice(&info.key);
            let iv = cipher::generic_array::GenericArray::from_slice(&info.iv);
            Ok(Box::new(ChaCha20::new(key, iv)))
        }
    }
}

/// Wraps any `AsyncRead` so that bytes read through it are XORed with the
/// cipher's keystream — encrypting a plaintext source, or decrypting a
/// ciphertext one, depending only on what you hand it.
pub struct CipherReader<R> {
    inner: R,
    cipher: Box<dyn DynStreamCipher>,
}

impl<R: AsyncRead + Unpin> CipherReader<R> {
    pub fn new(info: &KeyInfo, inner: R) -> Result<Self, CipherError> {
        Ok(Self {
            inner,
            cipher: build(info)?,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                self.cipher.apply(&mut buf.filled_mut()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn chacha20_round_trips() {
        let info = KeyInfo::with_zero_iv(Algorithm::ChaCha20, vec![7u8; 32]).unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();

        let mut ciphertext = Vec::new();
        CipherReader::new(&info, std::io::Cursor::new(plaintext.clone()))
            .unwrap()
            .read_to_end(&mut ciphertext)
            .await
            .unwrap();
        assert_ne!(ciphertext, plaintext);

        let mut roundtripped = Vec::new();
        CipherReader::new(&info, std::io::Cursor::new(ciphertext))
            .unwrap()
            .read_to_end(&mut roundtripped)
            .await
            .unwrap();
        assert_eq!(roundtripped, plaintext);
    }

    #[tokio::test]
    async fn aes_ctr_round_trips() {
        let info = KeyInfo::with_zero_iv(Algorithm::Aes256Ctr, vec![b'*'; 24]).unwrap();
        let plaintext = b"Hello".to_vec();

        let mut ciphertext = Vec::new();
        CipherReader::new(&info, std::io::Cursor::new(plaintext.clone()))
            .unwrap()
            .read_to_end(&mut ciphertext)
            .await
            .unwrap();

        let mut roundtripped = Vec::new();
        CipherReader::new(&info, std::io::Cursor::new(ciphertext))
            .unwrap()
            .read_to_end(&mut roundtripped)
            .await
            .unwrap();
        assert_eq!(roundtripped, plaintext);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = KeyInfo::new(Algorithm::ChaCha20, vec![0u8; 16], vec![0u8; 12]).unwrap_err();
        assert!(matches!(err, CipherError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_unknown_algorithm_tag() {
        assert!(matches!(
            Algorithm::from_tag(0xee),
            Err(CipherError::UnknownAlgorithm(0xee))
        ));
    }
}
