//! Blob-encryption facade (C8): composes the datastore (C3), cipher factory
//! (C5), key derivation (C6) and scratch buffer (C7) into two operations,
//! [`save`] and [`open`].
//!
//! `save` must learn a blob's name — the SHA-256 hash of its *ciphertext* —
//! before it can call [`Datastore::update`], which takes the name up front.
//! So the ciphertext is spilled through its own scratch buffer while being
//! hashed, exactly the same shape as [`vaultree_keygen::ContentsHashKey`]
//! hashing the plaintext; once the hash (and therefore the name) is known,
//! the scratch buffer is replayed as the update's source.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use vaultree_cipher::{Algorithm, CipherError, CipherReader, KeyInfo};
use vaultree_datastore::{Datastore, DatastoreError};
use vaultree_keygen::{encode_key_text, parse_key_text, BoxedAsyncRead, KeyGenError, KeyGenerator};
use vaultree_name::{BlobName, BlobNameError, BlobType};
use vaultree_scratch::ScratchWriter;

/// The algorithm `save` picks when the caller leaves it unspecified.
///
/// `save` always encrypts with this algorithm — there is no parameter to
/// pick AES-256-CTR here. A `Save` that produces an AES-keyed blob only
/// exists one layer down, by driving [`vaultree_cipher`]/[`vaultree_keygen`]
/// directly with an AES [`KeyInfo`] and calling `Datastore::update` oneself.
pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::ChaCha20;

/// A generator must report at least this many bytes of key-data; fewer
/// means it under-seeded, a sign something upstream is broken rather than a
/// legitimate short key (the textual format always needs up to 32 bytes to
/// serve any supported algorithm).
const MIN_KEY_DATA_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum BlobCryptError {
    #[error("key generator reported only {0} bytes of key data, need at least {MIN_KEY_DATA_LEN}")]
    InvalidKeyDataGenerator(usize),
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
    #[error(transparent)]
    Keygen(#[from] KeyGenError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Name(#[from] BlobNameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BlobCryptResult<T> = Result<T, BlobCryptError>;

const CHUNK: usize = 64 * 1024;

/// Encrypts `source` under a key produced by `key_gen`, stores the
/// ciphertext as a static blob, and returns its name and textual key.
///
/// On any failure, no blob is committed and any scratch file opened along
/// the way is unlinked — the input stream and scratch resources are each
/// closed exactly once, whether that's via an explicit `close`/`reader` or
/// the fallback `Drop` of whichever half never got consumed.
pub async fn save(
    datastore: &Datastore,
    key_gen: &dyn KeyGenerator,
    source: BoxedAsyncRead,
) -> BlobCryptResult<(BlobName, String)> {
    let (key_data, equivalent) = key_gen.derive(source).await?;
    if key_data.len() < MIN_KEY_DATA_LEN {
        return Err(BlobCryptError::InvalidKeyDataGenerator(key_data.len()));
    }

    let algorithm = DEFAULT_ALGORITHM;
    let key_info = KeyInfo::with_zero_iv(algorithm, key_data.0[..algorithm.key_size()].to_vec())?;
    let mut encrypting = CipherReader::new(&key_info, equivalent)?;

    let mut scratch = ScratchWriter::new().await?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK];
    loop {
        let n = encrypting.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        scratch.write(&chunk[..n]).await?;
    }
    let digest = hasher.finalize();
    let name = BlobName::from_hash_and_type(&digest, BlobType::STATIC)?;

    let mut replay = scratch.reader().await?;
    let update_result = datastore.update(&name, &mut replay).await;
    let close_result = replay.close().await;
    update_result?;
    close_result?;

    let key_text = encode_key_text(algorithm, &key_data)?;
    Ok((name, key_text))
}

/// Opens a blob by name and decrypts it with `key_text`, itself the
/// `Base58(algorithm_byte || key_bytes)` form `save` returned.
///
/// The returned reader re-verifies the ciphertext's hash against `name` as
/// it's read (see [`Datastore::open_read`]); the caller must close it (drop
/// or read to completion) exactly once, which in turn closes the underlying
/// storage stream.
pub async fn open(
    datastore: &Datastore,
    name: &BlobName,
    key_text: &str,
) -> BlobCryptResult<Box<dyn AsyncRead + Send + Unpin>> {
    let key_info = parse_key_text(key_text, true)?;
    let ciphertext = datastore.open_read(name).await?;
    Ok(Box::new(CipherReader::new(&key_info, ciphertext)?))
}

pub async fn exists(datastore: &Datastore, name: &BlobName) -> BlobCryptResult<bool> {
    Ok(datastore.exists(name).await?)
}

pub async fn delete(datastore: &Datastore, name: &BlobName) -> BlobCryptResult<()> {
    Ok(datastore.delete(name).await?)
}
