//! Directory blob wire format (C9): a varint-framed listing of entries,
//! each pointing at a child blob by name and carrying its decryption key
//! and a small metadata map.
//!
//! ```text
//! entry_count : varuint
//! entry_count × {
//!   name          : varuint length, then bytes     (1..=MAX_NAME)
//!   node_type     : varuint  (1 = dir, 2 = file)
//!   child_name    : varuint length, then bytes     (<=MAX_BLOB_NAME)
//!   key_info_tag  : varuint  (must equal 1; embedded key)
//!   child_key     : varuint length, then bytes     (<=MAX_KEY)
//!   meta_count    : varuint  (0..=MAX_META_KEYS)
//!   meta_count × {
//!     meta_key    : varuint length, then bytes     (1..=MAX_META_KEY)
//!     meta_value  : varuint length, then bytes     (0..=MAX_META_VALUE)
//!   }
//! }
//! ```
//!
//! Varints are unsigned LEB128. Metadata keys are always encoded sorted by
//! byte-wise order; decoding rejects a listing whose keys aren't strictly
//! increasing, rather than silently re-sorting it.

use std::collections::BTreeMap;

pub const MAX_ENTRIES: usize = 1024;
pub const MAX_NAME: usize = 1024;
pub const MAX_BLOB_NAME: usize = 128;
pub const MAX_KEY: usize = 1024;
pub const MAX_META_KEYS: usize = 128;
pub const MAX_META_KEY: usize = 128;
pub const MAX_META_VALUE: usize = 1024;

const KEY_INFO_TAG: u64 = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedDirectoryBlob {
    #[error("unexpected end of input while decoding a directory blob")]
    UnexpectedEof,
    #[error("varint too long (more than 10 bytes)")]
    VarintTooLong,
    #[error("{0} entries exceeds the limit of {MAX_ENTRIES}")]
    TooManyEntries(u64),
    #[error("entry name is empty")]
    EmptyName,
    #[error("entry name is {0} bytes, exceeds the limit of {MAX_NAME}")]
    NameTooLong(usize),
    #[error("duplicate entry name {0:?}")]
    DuplicateName(String),
    #[error("unknown node_type tag {0}")]
    UnknownNodeType(u64),
    #[error("child blob name is {0} bytes, exceeds the limit of {MAX_BLOB_NAME}")]
    BlobNameTooLong(usize),
    #[error("key_info_tag {0} is not the expected embedded-key tag {KEY_INFO_TAG}")]
    WrongKeyInfoTag(u64),
    #[error("child key is {0} bytes, exceeds the limit of {MAX_KEY}")]
    KeyTooLong(usize),
    #[error("{0} metadata keys exceeds the limit of {MAX_META_KEYS}")]
    TooManyMetaKeys(u64),
    #[error("metadata key is empty")]
    EmptyMetaKey,
    #[error("metadata key is {0} bytes, exceeds the limit of {MAX_META_KEY}")]
    MetaKeyTooLong(usize),
    #[error("duplicate metadata key {0:?}")]
    DuplicateMetaKey(String),
    #[error("metadata key {0:?} is out of the required sorted order")]
    OutOfOrderMetaKey(String),
    #[error("metadata value is {0} bytes, exceeds the limit of {MAX_META_VALUE}")]
    MetaValueTooLong(usize),
    #[error("entry name is not valid UTF-8")]
    InvalidUtf8Name,
}

pub type DecodeResult<T> = Result<T, MalformedDirectoryBlob>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Dir,
    File,
}

impl NodeType {
    fn tag(self) -> u64 {
        match self {
            NodeType::Dir => 1,
            NodeType::File => 2,
        }
    }

    fn from_tag(tag: u64) -> DecodeResult<Self> {
        match tag {
            1 => Ok(NodeType::Dir),
            2 => Ok(NodeType::File),
            other => Err(MalformedDirectoryBlob::UnknownNodeType(other)),
        }
    }
}

/// One directory listing entry: a name pointing at a child blob, its
/// decryption key, and a small metadata map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
    pub child_blob_name: Vec<u8>,
    pub child_key: Vec<u8>,
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl DirEntry {
    pub fn new(
        name: impl Into<String>,
        node_type: NodeType,
        child_blob_name: Vec<u8>,
        child_key: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            node_type,
            child_blob_name,
            child_key,
            metadata: BTreeMap::new(),
        }
    }
}

/// A decoded (or to-be-encoded) directory listing: an ordered set of
/// entries with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<DirEntry>,
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &[u8], pos: &mut usize) -> DecodeResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 70 {
            return Err(MalformedDirectoryBlob::VarintTooLong);
        }
        let byte = *input
            .get(*pos)
            .ok_or(MalformedDirectoryBlob::UnexpectedEof)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Serializes `listing` into its wire form. Metadata is always written
/// sorted by key (guaranteed already, since [`DirEntry::metadata`] is a
/// `BTreeMap`).
pub fn encode(listing: &Listing) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, listing.entries.len() as u64);
    for entry in &listing.entries {
        write_bytes(&mut out, entry.name.as_bytes());
        write_varint(&mut out, entry.node_type.tag());
        write_bytes(&mut out, &entry.child_blob_name);
        write_varint(&mut out, KEY_INFO_TAG);
        write_bytes(&mut out, &entry.child_key);
        write_varint(&mut out, entry.metadata.len() as u64);
        for (key, value) in &entry.metadata {
            write_bytes(&mut out, key.as_bytes());
            write_bytes(&mut out, value);
        }
    }
    out
}

/// Parses a wire-format directory listing, enforcing every limit and
/// ordering constraint on the way.
pub fn decode(input: &[u8]) -> DecodeResult<Listing> {
    let mut pos = 0usize;
    let entry_count = read_varint(input, &mut pos)?;
    if entry_count > MAX_ENTRIES as u64 {
        return Err(MalformedDirectoryBlob::TooManyEntries(entry_count));
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut seen_names = std::collections::HashSet::with_capacity(entry_count as usize);

    for _ in 0..entry_count {
        let name_bytes = read_name_bytes(input, &mut pos, MAX_NAME)?;
        if name_bytes.is_empty() {
            return Err(MalformedDirectoryBlob::EmptyName);
        }
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| MalformedDirectoryBlob::InvalidUtf8Name)?;
        if !seen_names.insert(name.clone()) {
            return Err(MalformedDirectoryBlob::DuplicateName(name));
        }

        let node_type = NodeType::from_tag(read_varint(input, &mut pos)?)?;

        let child_blob_name =
            read_length_checked(input, &mut pos, MAX_BLOB_NAME, |n| MalformedDirectoryBlob::BlobNameTooLong(n))?
                .to_vec();

        let key_info_tag = read_varint(input, &mut pos)?;
        if key_info_tag != KEY_INFO_TAG {
            return Err(MalformedDirectoryBlob::WrongKeyInfoTag(key_info_tag));
        }

        let child_key =
            read_length_checked(input, &mut pos, MAX_KEY, |n| MalformedDirectoryBlob::KeyTooLong(n))?.to_vec();

        let meta_count = read_varint(input, &mut pos)?;
        if meta_count > MAX_META_KEYS as u64 {
            return Err(MalformedDirectoryBlob::TooManyMetaKeys(meta_count));
        }

        let mut metadata = BTreeMap::new();
        let mut prev_key: Option<String> = None;
        for _ in 0..meta_count {
            let key_bytes =
                read_length_checked(input, &mut pos, MAX_META_KEY, |n| MalformedDirectoryBlob::MetaKeyTooLong(n))?;
            if key_bytes.is_empty() {
                return Err(MalformedDirectoryBlob::EmptyMetaKey);
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| MalformedDirectoryBlob::InvalidUtf8Name)?;
            if let Some(prev) = &prev_key {
                if *prev == key {
                    return Err(MalformedDirectoryBlob::DuplicateMetaKey(key));
                }
                if *prev > key {
                    return Err(MalformedDirectoryBlob::OutOfOrderMetaKey(key));
                }
            }
            let value = read_length_checked(input, &mut pos, MAX_META_VALUE, |n| {
                MalformedDirectoryBlob::MetaValueTooLong(n)
            })?
            .to_vec();
            prev_key = Some(key.clone());
            metadata.insert(key, value);
        }

        entries.push(DirEntry {
            name,
            node_type,
            child_blob_name,
            child_key,
            metadata,
        });
    }

    Ok(Listing { entries })
}

fn read_name_bytes<'a>(input: &'a [u8], pos: &mut usize, max_len: usize) -> DecodeResult<&'a [u8]> {
    read_length_checked(input, pos, max_len, |n| MalformedDirectoryBlob::NameTooLong(n))
}

fn read_length_checked<'a>(
    input: &'a [u8],
    pos: &mut usize,
    max_len: usize,
    too_long: impl FnOnce(usize) -> MalformedDirectoryBlob,
) -> DecodeResult<&'a [u8]> {
    let len = read_varint(input, pos)? as usize;
    if len > max_len {
        return Err(too_long(len));
    }
    let end = pos.checked_add(len).ok_or(MalformedDirectoryBlob::UnexpectedEof)?;
    let slice = input.get(*pos..end).ok_or(MalformedDirectoryBlob::UnexpectedEof)?;
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DirEntry {
        DirEntry::new(name, NodeType::File, vec![0xAB; 33], vec![0xCD; 32])
    }

    #[test]
    fn round_trips_empty_listing() {
        let listing = Listing::default();
        let bytes = encode(&listing);
        assert_eq!(decode(&bytes).unwrap(), listing);
    }

    #[test]
    fn round_trips_entries_with_metadata() {
        let mut e = entry("a.txt");
        e.metadata.insert("created".to_string(), b"today".to_vec());
        e.metadata.insert("size".to_string(), b"4".to_vec());
        let listing = Listing { entries: vec![e] };

        let bytes = encode(&listing);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, listing);
    }

    #[test]
    fn metadata_is_always_encoded_sorted() {
        let mut e = entry("z");
        e.metadata.insert("zeta".to_string(), vec![]);
        e.metadata.insert("alpha".to_string(), vec![]);
        let listing = Listing { entries: vec![e] };
        let bytes = encode(&listing);

        // Decode manually far enough to see the two meta keys in order.
        let decoded = decode(&bytes).unwrap();
        let keys: Vec<_> = decoded.entries[0].metadata.keys().collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn rejects_duplicate_entry_names() {
        let listing = Listing {
            entries: vec![entry("dup"), entry("dup")],
        };
        let bytes = encode(&listing);
        assert_eq!(
            decode(&bytes).unwrap_err(),
            MalformedDirectoryBlob::DuplicateName("dup".to_string())
        );
    }

    #[test]
    fn rejects_empty_name() {
        let listing = Listing {
            entries: vec![entry("")],
        };
        let bytes = encode(&listing);
        assert_eq!(decode(&bytes).unwrap_err(), MalformedDirectoryBlob::EmptyName);
    }

    #[test]
    fn rejects_too_many_entries() {
        let mut out = Vec::new();
        write_varint(&mut out, MAX_ENTRIES as u64 + 1);
        assert_eq!(
            decode(&out).unwrap_err(),
            MalformedDirectoryBlob::TooManyEntries(MAX_ENTRIES as u64 + 1)
        );
    }

    #[test]
    fn rejects_unknown_node_type() {
        let mut out = Vec::new();
        write_varint(&mut out, 1);
        write_bytes(&mut out, b"x");
        write_varint(&mut out, 9);
        assert_eq!(decode(&out).unwrap_err(), MalformedDirectoryBlob::UnknownNodeType(9));
    }

    #[test]
    fn rejects_wrong_key_info_tag() {
        let mut out = Vec::new();
        write_varint(&mut out, 1);
        write_bytes(&mut out, b"x");
        write_varint(&mut out, NodeType::File.tag());
        write_bytes(&mut out, &[0u8; 4]);
        write_varint(&mut out, 2); // should be 1
        assert_eq!(decode(&out).unwrap_err(), MalformedDirectoryBlob::WrongKeyInfoTag(2));
    }

    #[test]
    fn rejects_duplicate_meta_keys() {
        let mut e = entry("a");
        e.metadata.insert("dup".to_string(), vec![]);
        let listing = Listing { entries: vec![e] };
        let mut bytes = encode(&listing);

        // Splice in a second identical meta entry by re-encoding by hand:
        // easier to just build the bytes directly for this malformed case.
        let mut out = Vec::new();
        write_varint(&mut out, 1);
        write_bytes(&mut out, b"a");
        write_varint(&mut out, NodeType::File.tag());
        write_bytes(&mut out, &[0u8; 4]);
        write_varint(&mut out, 1);
        write_bytes(&mut out, &[0u8; 4]);
        write_varint(&mut out, 2);
        write_bytes(&mut out, b"dup");
        write_bytes(&mut out, b"");
        write_bytes(&mut out, b"dup");
        write_bytes(&mut out, b"");
        bytes = out;

        assert_eq!(
            decode(&bytes).unwrap_err(),
            MalformedDirectoryBlob::DuplicateMetaKey("dup".to_string())
        );
    }

    #[test]
    fn rejects_out_of_order_meta_keys() {
        let mut out = Vec::new();
        write_varint(&mut out, 1);
        write_bytes(&mut out, b"a");
        write_varint(&mut out, NodeType::File.tag());
        write_bytes(&mut out, &[0u8; 4]);
        write_varint(&mut out, 1);
        write_bytes(&mut out, &[0u8; 4]);
        write_varint(&mut out, 2);
        write_bytes(&mut out, b"zeta");
        write_bytes(&mut out, b"");
        write_bytes(&mut out, b"alpha");
        write_bytes(&mut out, b"");

        assert_eq!(
            decode(&out).unwrap_err(),
            MalformedDirectoryBlob::OutOfOrderMetaKey("alpha".to_string())
        );
    }

    #[test]
    fn rejects_truncated_input() {
        let listing = Listing {
            entries: vec![entry("a")],
        };
        let mut bytes = encode(&listing);
        bytes.truncate(bytes.len() - 3);
        assert_eq!(decode(&bytes).unwrap_err(), MalformedDirectoryBlob::UnexpectedEof);
    }

    proptest::proptest! {
        #[test]
        fn any_small_listing_round_trips(
            names in proptest::collection::vec("[a-z]{1,10}", 0..8),
        ) {
            let mut seen = std::collections::HashSet::new();
            let entries: Vec<DirEntry> = names
                .into_iter()
                .filter(|n| seen.insert(n.clone()))
                .map(|n| entry(&n))
                .collect();
            let listing = Listing { entries };
            let bytes = encode(&listing);
            proptest::prop_assert_eq!(decode(&bytes).unwrap(), listing);
        }
    }
}
