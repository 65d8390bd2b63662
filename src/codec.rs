//! Binary encoding of a whole map
//!
//! The record is self-describing: it carries the type names of its key and value
//! types, so it can be checked against the receiving map without a separate
//! schema. All integers are little-endian.
//!
//! ```text
//! magic      4 bytes    b"CMAP"
//! version    u8         FORMAT_VERSION
//! key tag    u32 len    + UTF-8 type name of K
//! value tag  u32 len    + UTF-8 type name of V
//! count      u64        number of entries
//! entries    count x { u32 len + key payload, u32 len + value payload }
//! ```
//!
//! Payloads use bincode's default options (varint integers, trailing bytes
//! rejected). Type names come from [`core::any::type_name`], whose text is only
//! guaranteed for a single compiler version, which is enough for an in-memory
//! snapshot format.
//!
//! Most callers go through [`ConcurrentMap::encode`](crate::ConcurrentMap::encode)
//! and [`ConcurrentMap::decode`](crate::ConcurrentMap::decode); the functions here
//! work on a plain `HashMap`.

use crate::{DecodeError, EncodeError};
use bincode::Options;
use core::any::type_name;
use core::hash::{BuildHasher, Hash};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Leading bytes of every record
pub const MAGIC: [u8; 4] = *b"CMAP";
/// Current record layout version
pub const FORMAT_VERSION: u8 = 1;

const LEN_PREFIX: usize = core::mem::size_of::<u32>();
/// Smallest possible entry: two empty payloads
const MIN_ENTRY_LEN: usize = 2 * LEN_PREFIX;

#[inline]
fn options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Encode every entry of `entries` into a single record
///
/// # Errors
///
/// Returns [`EncodeError`] if a key or value cannot be serialized, or if one of
/// them serializes to more than `u32::MAX` bytes.
///
/// # Examples
///
/// ```rust
/// use cachemap::codec;
/// use std::collections::HashMap;
///
/// let mut entries = HashMap::new();
/// entries.insert("x".to_string(), 10u32);
///
/// let bytes = codec::encode(&entries)?;
/// let decoded: HashMap<String, u32> = codec::decode(&bytes, Default::default())?;
/// assert_eq!(decoded, entries);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn encode<K, V, S>(entries: &HashMap<K, V, S>) -> Result<Vec<u8>, EncodeError>
where
    K: Serialize,
    V: Serialize,
{
    let key_tag = type_name::<K>();
    let value_tag = type_name::<V>();

    let header_len = MAGIC.len() + 1 + 2 * LEN_PREFIX + key_tag.len() + value_tag.len() + 8;
    let mut out = Vec::with_capacity(header_len + entries.len() * MIN_ENTRY_LEN);

    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    write_tag(&mut out, key_tag)?;
    write_tag(&mut out, value_tag)?;
    out.extend_from_slice(&(entries.len() as u64).to_le_bytes());

    for (key, value) in entries {
        let start = begin_payload(&mut out);
        options()
            .serialize_into(&mut out, key)
            .map_err(|source| EncodeError::Key { source })?;
        finish_payload(&mut out, start)?;

        let start = begin_payload(&mut out);
        options()
            .serialize_into(&mut out, value)
            .map_err(|source| EncodeError::Value { source })?;
        finish_payload(&mut out, start)?;
    }

    Ok(out)
}

/// Decode a record produced by [`encode`] into a fresh map built with `hasher`
///
/// Nothing is returned unless the whole record parses, so callers can swap the
/// result in without ever exposing a partially decoded map.
///
/// # Errors
///
/// Returns [`DecodeError`] if the record is truncated or malformed, was written
/// for other key or value types, repeats a key, or is followed by extra bytes.
pub fn decode<K, V, S>(bytes: &[u8], hasher: S) -> Result<HashMap<K, V, S>, DecodeError>
where
    K: DeserializeOwned + Hash + Eq,
    V: DeserializeOwned,
    S: BuildHasher,
{
    let mut reader = Reader::new(bytes);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    check_tag(reader.read_tag()?, type_name::<K>())?;
    check_tag(reader.read_tag()?, type_name::<V>())?;

    let count = reader.read_u64()?;
    // The declared count is untrusted; never reserve more than the input could hold.
    let capacity = usize::try_from(count)
        .unwrap_or(usize::MAX)
        .min(reader.remaining() / MIN_ENTRY_LEN);
    let mut entries = HashMap::with_capacity_and_hasher(capacity, hasher);

    for index in 0..count {
        let payload = reader.read_payload()?;
        let key: K = options()
            .with_limit(payload.len() as u64)
            .deserialize(payload)
            .map_err(|source| DecodeError::Key { index, source })?;

        let payload = reader.read_payload()?;
        let value: V = options()
            .with_limit(payload.len() as u64)
            .deserialize(payload)
            .map_err(|source| DecodeError::Value { index, source })?;

        if entries.insert(key, value).is_some() {
            return Err(DecodeError::DuplicateKey { index });
        }
    }

    match reader.remaining() {
        0 => Ok(entries),
        extra => Err(DecodeError::TrailingBytes(extra)),
    }
}

fn write_tag(out: &mut Vec<u8>, tag: &str) -> Result<(), EncodeError> {
    let len = u32::try_from(tag.len())
        .map_err(|_| EncodeError::PayloadTooLarge { len: tag.len() })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(tag.as_bytes());
    Ok(())
}

/// Reserve a length prefix and return where it starts
fn begin_payload(out: &mut Vec<u8>) -> usize {
    let start = out.len();
    out.extend_from_slice(&[0; LEN_PREFIX]);
    start
}

/// Patch the length prefix at `start` with the size of what followed it
fn finish_payload(out: &mut [u8], start: usize) -> Result<(), EncodeError> {
    let len = out.len() - start - LEN_PREFIX;
    let prefix = u32::try_from(len).map_err(|_| EncodeError::PayloadTooLarge { len })?;
    out[start..start + LEN_PREFIX].copy_from_slice(&prefix.to_le_bytes());
    Ok(())
}

fn check_tag(found: &str, expected: &str) -> Result<(), DecodeError> {
    if found == expected {
        Ok(())
    } else {
        Err(DecodeError::TypeMismatch {
            expected: expected.to_owned(),
            found: found.to_owned(),
        })
    }
}

/// Bounds-checked cursor over the input
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        let slice = &self.bytes[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut array = [0; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take_array().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take_array().map(u64::from_le_bytes)
    }

    fn read_payload(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    fn read_tag(&mut self) -> Result<&'a str, DecodeError> {
        let bytes = self.read_payload()?;
        core::str::from_utf8(bytes).map_err(DecodeError::InvalidTag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::{SerializeSeq, Serializer};

    fn sample() -> HashMap<String, u32> {
        let mut entries = HashMap::new();
        entries.insert("x".to_string(), 10);
        entries.insert("y".to_string(), 20);
        entries
    }

    fn decode_std<K, V>(bytes: &[u8]) -> Result<HashMap<K, V>, DecodeError>
    where
        K: DeserializeOwned + Hash + Eq,
        V: DeserializeOwned,
    {
        decode(bytes, Default::default())
    }

    /// Serializes as a sequence without announcing its length
    struct LengthlessSeq(Vec<u32>);

    impl Serialize for LengthlessSeq {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(None)?;
            for item in &self.0 {
                seq.serialize_element(item)?;
            }
            seq.end()
        }
    }

    #[test]
    fn test_header_layout() {
        let entries: HashMap<u8, u8> = HashMap::new();
        let bytes = encode(&entries).unwrap();

        assert_eq!(&bytes[..4], b"CMAP");
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(u32::from_le_bytes(bytes[5..9].try_into().unwrap()), 2);
        assert_eq!(&bytes[9..11], b"u8");
        assert_eq!(u32::from_le_bytes(bytes[11..15].try_into().unwrap()), 2);
        assert_eq!(&bytes[15..17], b"u8");
        assert_eq!(u64::from_le_bytes(bytes[17..25].try_into().unwrap()), 0);
        assert_eq!(bytes.len(), 25);
    }

    #[test]
    fn test_entry_layout() {
        let mut entries: HashMap<u8, bool> = HashMap::new();
        entries.insert(7, true);
        let bytes = encode(&entries).unwrap();

        // Header is 4 + 1 + (4 + 2) + (4 + 4) + 8 bytes for tags "u8" and "bool"
        let body = &bytes[27..];
        assert_eq!(body, &[1, 0, 0, 0, 7, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_round_trip() {
        let entries = sample();
        let bytes = encode(&entries).unwrap();
        assert_eq!(decode_std::<String, u32>(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_round_trip_nested_values() {
        let mut entries: HashMap<u64, Vec<Option<String>>> = HashMap::new();
        entries.insert(1, vec![Some("a".to_string()), None]);
        entries.insert(2, Vec::new());
        let bytes = encode(&entries).unwrap();
        assert_eq!(decode_std::<u64, Vec<Option<String>>>(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_encode_rejects_unsupported_value() {
        let mut entries = HashMap::new();
        entries.insert(1u32, LengthlessSeq(vec![1, 2, 3]));
        assert!(matches!(encode(&entries), Err(EncodeError::Value { .. })));
    }

    #[test]
    fn test_type_mismatch() {
        let bytes = encode(&sample()).unwrap();

        let err = decode_std::<String, u64>(&bytes).unwrap_err();
        match err {
            DecodeError::TypeMismatch { expected, found } => {
                assert_eq!(expected, "u64");
                assert_eq!(found, "u32");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            decode_std::<u32, u32>(&bytes),
            Err(DecodeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_every_truncation_fails() {
        let bytes = encode(&sample()).unwrap();
        for len in 0..bytes.len() {
            assert!(
                decode_std::<String, u32>(&bytes[..len]).is_err(),
                "prefix of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4] = FORMAT_VERSION + 1;
        assert!(matches!(
            decode_std::<String, u32>(&bytes),
            Err(DecodeError::UnsupportedVersion(v)) if v == FORMAT_VERSION + 1
        ));

        bytes[0] = b'X';
        assert!(matches!(
            decode_std::<String, u32>(&bytes),
            Err(DecodeError::BadMagic)
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            decode_std::<String, u32>(&bytes),
            Err(DecodeError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_duplicate_key() {
        let mut entries = HashMap::new();
        entries.insert(5u8, 1u8);
        let mut bytes = encode(&entries).unwrap();

        // Bump the count and repeat the single entry
        let entry = bytes[bytes.len() - 10..].to_vec();
        let count_at = bytes.len() - 10 - 8;
        bytes[count_at..count_at + 8].copy_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&entry);

        assert!(matches!(
            decode_std::<u8, u8>(&bytes),
            Err(DecodeError::DuplicateKey { index: 1 })
        ));
    }

    #[test]
    fn test_huge_declared_count_is_truncation() {
        let entries: HashMap<u8, u8> = HashMap::new();
        let mut bytes = encode(&entries).unwrap();
        let count_at = bytes.len() - 8;
        bytes[count_at..].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode_std::<u8, u8>(&bytes),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_corrupt_payload_reports_entry() {
        let mut entries = HashMap::new();
        entries.insert(1u8, "hello".to_string());
        let mut bytes = encode(&entries).unwrap();

        // Value payload is a varint length (5) followed by the text; claim 50
        let len_at = bytes.len() - 6;
        bytes[len_at] = 50;
        assert!(matches!(
            decode_std::<u8, String>(&bytes),
            Err(DecodeError::Value { index: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_tag() {
        let mut bytes = encode(&sample()).unwrap();
        // First byte of the key tag
        bytes[9] = 0xff;
        assert!(matches!(
            decode_std::<String, u32>(&bytes),
            Err(DecodeError::InvalidTag(_))
        ));
    }
}
