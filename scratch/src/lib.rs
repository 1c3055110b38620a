//! Secure scratch buffer (C7): a write-once, read-once temporary file
//! encrypted with a fresh random ChaCha20 key+nonce kept only in memory.
//!
//! [`ScratchBuffer::new`] opens a temp file and two cipher instances seeded
//! from the same key/nonce (one for writing, one for the eventual replay
//! read — their plaintext offsets line up exactly because the replay reads
//! back exactly what was written). The on-disk contents are ciphertext: if
//! the process dies, the key is gone with it and the file is meaningless.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The writer half of a scratch buffer. Call [`ScratchWriter::write`]
/// repeatedly, then either [`ScratchWriter::reader`] (to replay what was
/// written) or [`ScratchWriter::close`] (to discard it immediately).
pub struct ScratchWriter {
    file: Option<File>,
    path: PathBuf,
    write_cipher: ChaCha20,
    read_cipher: Option<ChaCha20>,
    responsible_for_cleanup: bool,
}

/// The reader half: rewound to offset 0, decrypting on the fly as it's read.
pub struct ScratchReader {
    file: File,
    path: PathBuf,
    cipher: ChaCha20,
    closed: bool,
}

impl ScratchWriter {
    /// Creates a fresh scratch file under the system temp directory, with a
    /// newly generated random key and nonce that live only in memory.
    pub async fn new() -> std::io::Result<Self> {
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut key);
        rand::rng().fill_bytes(&mut nonce);

        let mut suffix = [0u8; 16];
        rand::rng().fill_bytes(&mut suffix);
        let path = std::env::temp_dir().join(format!("vaultree-scratch-{}", hex(&suffix)));
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let write_cipher = ChaCha20::new(&key.into(), &nonce.into());
        let read_cipher = ChaCha20::new(&key.into(), &nonce.into());

        Ok(Self {
            file: Some(file),
            path,
            write_cipher,
            read_cipher: Some(read_cipher),
            responsible_for_cleanup: true,
        })
    }

    /// Encrypts `bytes` with the write-side keystream and appends them.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut buf = bytes.to_vec();
        self.write_cipher.apply_keystream(&mut buf);
        let file = self.file.as_mut().expect("scratch writer used after close/reader");
        file.write_all(&buf).await?;
        Ok(())
    }

    /// Rewinds to the start and returns a reader that decrypts on the fly.
    /// The writer is no longer usable afterward; file deletion responsibility
    /// transfers to the returned reader.
    pub async fn reader(mut self) -> std::io::Result<ScratchReader> {
        let mut file = self.file.take().expect("scratch writer used after close/reader");
        file.flush().await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        self.responsible_for_cleanup = false;
        Ok(ScratchReader {
            file,
            path: self.path.clone(),
            cipher: self.read_cipher.take().expect("read cipher consumed twice"),
            closed: false,
        })
    }

    /// Closes the writer without ever having taken a reader, unlinking the
    /// scratch file immediately.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.file.take();
        self.responsible_for_cleanup = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

impl Drop for ScratchWriter {
    fn drop(&mut self) {
        if self.responsible_for_cleanup {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl ScratchReader {
    /// Unlinks the scratch file. Safe to call even if reads are incomplete.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.closed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

impl Drop for ScratchReader {
    fn drop(&mut self) {
        if !self.closed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl AsyncRead for ScratchReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.file).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                self.cipher.apply_keystream(&mut buf.filled_mut()[before..]);
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
    async fn replays_exactly_what_was_written() {
        let mut w = ScratchWriter::new().await.unwrap();
        w.write(b"hello, ").await.unwrap();
        w.write(b"scratch buffer").await.unwrap();

        let path = w.path.clone();
        assert!(path.exists());

        let mut r = w.reader().await.unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello, scratch buffer");

        r.close().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn on_disk_bytes_are_ciphertext() {
        let mut w = ScratchWriter::new().await.unwrap();
        w.write(b"plaintext marker").await.unwrap();
        let path = w.path.clone();

        let raw = tokio::fs::read(&path).await.unwrap();
        assert_ne!(raw, b"plaintext marker");

        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_before_reader_deletes_immediately() {
        let mut w = ScratchWriter::new().await.unwrap();
        w.write(b"abandoned").await.unwrap();
        let path = w.path.clone();
        w.close().await.unwrap();
        assert!(!path.exists());
    }
}
