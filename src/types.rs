//! Internal keys: `user_key ++ u64 LE((sequence << 8) | type)`, ordered by
//! user key ascending and then trailer descending, so the newest version of
//! a key comes first.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Global write-order counter. Every committed operation gets its own.
pub type SequenceNumber = u64;

/// Sequence numbers share a 64-bit trailer with the value type, leaving 56 bits.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Size of the `(sequence << 8) | type` trailer appended to every user key.
pub const INTERNAL_KEY_TRAILER: usize = 8;

/// Distinguishes puts, deletes and merge operands in the storage engine.
/// A Delete writes a tombstone: the key is marked deleted, not removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Delete = 0x00,
    /// A normal put operation.
    Put = 0x01,
    /// An operand folded into the older value by the merge operator.
    Merge = 0x02,
}

/// Seek keys carry the highest type so they sort before every entry of the
/// same user key with an equal or lower sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Merge;

impl ValueType {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(ValueType::Delete),
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Merge),
            other => Err(Error::corruption(format!("unknown value type {other:#04x}"))),
        }
    }
}

/// Borrowed view over an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

pub fn pack_trailer(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

pub fn append_internal_key(
    buf: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    buf.reserve(user_key.len() + INTERNAL_KEY_TRAILER);
    buf.extend_from_slice(user_key);
    buf.put_u64_le(pack_trailer(sequence, value_type));
}

pub fn encode_internal_key(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER);
    append_internal_key(&mut buf, user_key, sequence, value_type);
    buf
}

pub fn parse_internal_key(data: &[u8]) -> Result<ParsedInternalKey<'_>> {
    if data.len() < INTERNAL_KEY_TRAILER {
        return Err(Error::corruption(format!(
            "internal key too short: {} bytes",
            data.len()
        )));
    }
    let split = data.len() - INTERNAL_KEY_TRAILER;
    let mut trailer = &data[split..];
    let packed = trailer.get_u64_le();
    Ok(ParsedInternalKey {
        user_key: &data[..split],
        sequence: packed >> 8,
        value_type: ValueType::from_u8((packed & 0xff) as u8)?,
    })
}

/// User key portion of an encoded internal key. Callers guarantee the trailer exists.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    &internal_key[..internal_key.len().saturating_sub(INTERNAL_KEY_TRAILER)]
}

/// Internal key that positions a cursor at the newest entry of `user_key`
/// visible at `sequence`.
pub fn lookup_key(user_key: &[u8], sequence: SequenceNumber) -> Vec<u8> {
    encode_internal_key(user_key, sequence, VALUE_TYPE_FOR_SEEK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_key_parses_back() {
        let raw = encode_internal_key(b"user", 42, ValueType::Merge);
        assert_eq!(raw.len(), 4 + INTERNAL_KEY_TRAILER);
        let parsed = parse_internal_key(&raw).unwrap();
        assert_eq!(parsed.user_key, b"user");
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.value_type, ValueType::Merge);
        assert_eq!(extract_user_key(&raw), b"user");
    }

    #[test]
    fn seek_key_uses_highest_type() {
        let seek = lookup_key(b"k", 7);
        assert_eq!(parse_internal_key(&seek).unwrap().value_type, VALUE_TYPE_FOR_SEEK);
        assert!(pack_trailer(7, VALUE_TYPE_FOR_SEEK) > pack_trailer(7, ValueType::Put));
    }

    #[test]
    fn short_key_is_corruption() {
        assert!(parse_internal_key(b"abc").unwrap_err().is_corruption());
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut raw = b"k".to_vec();
        raw.put_u64_le((5 << 8) | 0x7f);
        assert!(parse_internal_key(&raw).is_err());
    }
}
