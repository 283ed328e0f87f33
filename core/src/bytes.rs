//! Endian-safe fixed-width primitive read/write. The wire protocol and the
//! block log are both little-endian throughout, so these helpers never take
//! an endianness parameter.

use crate::error::CodecError;
use std::io::{self, Read, Write};

pub fn write_u16_le<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_i64_le<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u16_le<R: Read>(r: &mut R) -> Result<u16, CodecError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEof)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEof)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> Result<u64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEof)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_i64_le<R: Read>(r: &mut R) -> Result<i64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEof)?;
    Ok(i64::from_le_bytes(buf))
}

/// Read `n` bytes and return them, short of doing a full `Read` trait
/// object dance at every call site in the codec.
pub fn read_exact_vec<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEof)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 0xdeadbeef).unwrap();
        assert_eq!(buf, vec![0xef, 0xbe, 0xad, 0xde]);
        let mut cursor = &buf[..];
        assert_eq!(read_u32_le(&mut cursor).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn u64_roundtrip() {
        let mut buf = Vec::new();
        write_u64_le(&mut buf, u64::MAX).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(read_u64_le(&mut cursor).unwrap(), u64::MAX);
    }

    #[test]
    fn short_read_is_unexpected_eof() {
        let buf = [0u8; 2];
        let mut cursor = &buf[..];
        assert_eq!(read_u32_le(&mut cursor), Err(CodecError::UnexpectedEof));
    }
}
