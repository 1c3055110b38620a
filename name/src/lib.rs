//! Blob naming (C1): encodes `(content-hash, blob-type)` into a
//! self-describing, Base58-textual name.
//!
//! A [`BlobName`] is the byte string `type_byte || content_hash`. Its textual
//! form is the Base58 encoding of those raw bytes. The hash length embedded
//! in a name must match the length mandated by its [`BlobType`]; for the one
//! built-in type, `Static`, that's a 32-byte SHA-256 digest.

use std::fmt;

/// Single-byte discriminator for what a blob's name means.
///
/// The design admits further types (signed mutable blobs, etc.) through a
/// handler registry — see `vaultree_datastore` — but this crate only knows
/// about the hash-length contract of each type, not how to validate or
/// ingest its content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobType(pub u8);

impl BlobType {
    /// SHA-256 content-addressed, immutable blob.
    pub const STATIC: BlobType = BlobType(0x00);

    /// Expected raw hash length in bytes for this type, if known.
    ///
    /// Returns `None` for any type this crate doesn't recognize; callers
    /// that need strict validation for unknown types must consult a
    /// handler registry (see `vaultree_datastore::HandlerRegistry`).
    pub fn hash_len(&self) -> Option<usize> {
        match *self {
            BlobType::STATIC => Some(32),
            _ => None,
        }
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobNameError {
    #[error("hash must not be empty")]
    EmptyHash,
    #[error("invalid base58 string: {0}")]
    InvalidBase58(String),
    #[error("name too short: expected at least 2 bytes, got {0}")]
    TooShort(usize),
    #[error("hash length mismatch for type {0}: expected {expected}, got {actual}", expected = .1, actual = .2)]
    HashLengthMismatch(BlobType, usize, usize),
}

/// A self-describing, content-addressed blob name: `type_byte || hash`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobName {
    bytes: Vec<u8>,
}

impl BlobName {
    /// Builds a name from a raw hash and blob type.
    ///
    /// Fails if `hash` is empty. If the type's expected hash length is
    /// known and doesn't match, fails with [`BlobNameError::HashLengthMismatch`].
    pub fn from_hash_and_type(hash: &[u8], ty: BlobType) -> Result<Self, BlobNameError> {
        if hash.is_empty() {
            return Err(BlobNameError::EmptyHash);
        }
        if let Some(expected) = ty.hash_len() {
            if expected != hash.len() {
                return Err(BlobNameError::HashLengthMismatch(ty, expected, hash.len()));
            }
        }
        let mut bytes = Vec::with_capacity(1 + hash.len());
        bytes.push(ty.0);
        bytes.extend_from_slice(hash);
        Ok(Self { bytes })
    }

    /// Parses a Base58 textual name.
    ///
    /// Fails when decoding yields fewer than 2 bytes (a type byte plus at
    /// least one hash byte) or when the declared type's hash length doesn't
    /// match the decoded length.
    pub fn from_string(s: &str) -> Result<Self, BlobNameError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| BlobNameError::InvalidBase58(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Builds a name from already-decoded `type_byte || hash` bytes, e.g.
    /// when a name arrives embedded in another binary format rather than as
    /// Base58 text.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BlobNameError> {
        if bytes.len() < 2 {
            return Err(BlobNameError::TooShort(bytes.len()));
        }
        let ty = BlobType(bytes[0]);
        let hash_len = bytes.len() - 1;
        if let Some(expected) = ty.hash_len() {
            if expected != hash_len {
                return Err(BlobNameError::HashLengthMismatch(ty, expected, hash_len));
            }
        }
        Ok(Self { bytes })
    }

    pub fn ty(&self) -> BlobType {
        BlobType(self.bytes[0])
    }

    pub fn hash(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Raw `type_byte || hash` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

impl fmt::Debug for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobName").field(&self.to_string()).finish()
    }
}

impl std::str::FromStr for BlobName {
    type Err = BlobNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobName::from_string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text() {
        let hash = [7u8; 32];
        let name = BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap();
        let text = name.to_string();
        let parsed = BlobName::from_string(&text).unwrap();
        assert_eq!(name, parsed);
        assert_eq!(parsed.ty(), BlobType::STATIC);
        assert_eq!(parsed.hash(), &hash);
    }

    #[test]
    fn equal_bytes_yield_equal_names() {
        let a = BlobName::from_hash_and_type(&[1u8; 32], BlobType::STATIC).unwrap();
        let b = BlobName::from_hash_and_type(&[1u8; 32], BlobType::STATIC).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn rejects_empty_hash() {
        assert_eq!(
            BlobName::from_hash_and_type(&[], BlobType::STATIC).unwrap_err(),
            BlobNameError::EmptyHash
        );
    }

    #[test]
    fn rejects_wrong_length_for_static() {
        assert!(matches!(
            BlobName::from_hash_and_type(&[1u8; 16], BlobType::STATIC),
            Err(BlobNameError::HashLengthMismatch(BlobType::STATIC, 32, 16))
        ));
    }

    #[test]
    fn from_bytes_matches_from_hash_and_type() {
        let hash = [2u8; 32];
        let a = BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap();
        let b = BlobName::from_bytes(a.as_bytes().to_vec()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_short_decoded_name() {
        let text = bs58::encode([0x00u8]).into_string();
        assert!(matches!(
            BlobName::from_string(&text),
            Err(BlobNameError::TooShort(1))
        ));
    }

    #[test]
    fn rejects_invalid_base58() {
        assert!(BlobName::from_string("not-valid-base58-0OIl").is_err());
    }

    proptest::proptest! {
        #[test]
        fn any_32_byte_hash_round_trips(hash in proptest::collection::vec(proptest::num::u8::ANY, 32..=32)) {
            let name = BlobName::from_hash_and_type(&hash, BlobType::STATIC).unwrap();
            let parsed = BlobName::from_string(&name.to_string()).unwrap();
            proptest::prop_assert_eq!(name, parsed);
        }
    }
}
