//! Varint and length-prefixed slice helpers shared by the block, batch and
//! table formats. Fixed-width fields go through `bytes::{Buf, BufMut}` directly.

use crate::error::{Error, Result};

pub fn put_varint32(buf: &mut Vec<u8>, v: u32) {
    put_varint64(buf, v as u64);
}

pub fn put_varint64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub fn varint_length(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint from the front of `data`, returning the value and the
/// number of bytes consumed.
pub fn get_varint64(data: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in data.iter().enumerate().take(10) {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(Error::corruption("malformed varint"))
}

pub fn get_varint32(data: &[u8]) -> Result<(u32, usize)> {
    let (v, n) = get_varint64(data)?;
    let v = u32::try_from(v).map_err(|_| Error::corruption("varint32 overflow"))?;
    Ok((v, n))
}

pub fn put_length_prefixed_slice(buf: &mut Vec<u8>, s: &[u8]) {
    put_varint32(buf, s.len() as u32);
    buf.extend_from_slice(s);
}

/// Reads a varint length followed by that many bytes; returns the slice and
/// total bytes consumed.
pub fn get_length_prefixed_slice(data: &[u8]) -> Result<(&[u8], usize)> {
    let (len, n) = get_varint32(data)?;
    let end = n + len as usize;
    if end > data.len() {
        return Err(Error::corruption("length-prefixed slice overruns buffer"));
    }
    Ok((&data[n..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            assert_eq!(buf.len(), varint_length(v));
            assert_eq!(get_varint64(&buf).unwrap(), (v, buf.len()));
        }
    }

    #[test]
    fn truncated_varint_is_corruption() {
        assert!(get_varint64(&[0x80, 0x80]).is_err());
        assert!(get_varint32(&[0xff, 0xff, 0xff, 0xff, 0x7f]).is_err());
    }

    #[test]
    fn length_prefixed_overrun() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"hello");
        assert_eq!(get_length_prefixed_slice(&buf).unwrap(), (&b"hello"[..], 6));
        assert!(get_length_prefixed_slice(&buf[..4]).is_err());
    }
}
