//! Log header: `version | [first_block_num] | (genesis | chain_id) | totem`.
//!
//! `genesis_state`'s own byte layout is defined by the chain controller
//! (out of scope here, per spec.md's non-goals); the header only needs to
//! know its length to skip over it, so it is stored length-prefixed rather
//! than parsed.

use crate::error::{BlockLogError, Result};
use crate::version::{LogVersion, TOTEM};
use glint_core::bytes::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use glint_core::BlockNum;
use glint_core::{decode_varuint32, encode_varuint32};
use std::io::{Read, Write};

#[derive(Debug, Clone)]
pub enum ChainIdentity {
    Genesis(Vec<u8>),
    ChainId([u8; 32]),
}

#[derive(Debug, Clone)]
pub struct LogHeader {
    pub version: LogVersion,
    pub first_block_num: BlockNum,
    pub identity: ChainIdentity,
}

impl LogHeader {
    pub fn new_genesis(version: LogVersion, genesis_state: Vec<u8>) -> Self {
        LogHeader { version, first_block_num: 1, identity: ChainIdentity::Genesis(genesis_state) }
    }

    pub fn new_chain_id(version: LogVersion, first_block_num: BlockNum, chain_id: [u8; 32]) -> Self {
        LogHeader { version, first_block_num, identity: ChainIdentity::ChainId(chain_id) }
    }

    /// Writes the header and returns its total byte length (the byte offset
    /// at which the first block entry begins).
    pub fn write(&self, w: &mut impl Write) -> Result<u64> {
        let mut written: u64 = 0;
        write_u32_le(w, self.version.raw_value())?;
        written += 4;
        if self.version.has_first_block_num_field() {
            write_u32_le(w, self.first_block_num)?;
            written += 4;
        }
        match &self.identity {
            ChainIdentity::Genesis(bytes) => {
                let mut len_buf = Vec::new();
                encode_varuint32(bytes.len() as u32, &mut len_buf);
                w.write_all(&len_buf)?;
                written += len_buf.len() as u64;
                w.write_all(bytes)?;
                written += bytes.len() as u64;
            }
            ChainIdentity::ChainId(id) => {
                w.write_all(id)?;
                written += 32;
            }
        }
        write_u64_le(w, TOTEM)?;
        written += 8;
        Ok(written)
    }

    /// Reads a header from the start of `r`, returning the header along
    /// with its total byte length.
    pub fn read(r: &mut impl Read) -> Result<(Self, u64)> {
        let mut consumed: u64 = 0;
        let raw_version = read_u32_le(r)?;
        consumed += 4;
        let version = LogVersion::new(raw_version);
        if version.version() == 0 || version.version() > crate::version::CURRENT_VERSION {
            return Err(BlockLogError::UnsupportedVersion(version.version()));
        }

        let first_block_num = if version.has_first_block_num_field() {
            let n = read_u32_le(r)?;
            consumed += 4;
            n
        } else {
            // Version 1 has no field; always starts from genesis at block 1.
            1
        };

        let identity = if first_block_num == 1 {
            let mut len_byte_buf = Vec::with_capacity(5);
            loop {
                let mut b = [0u8; 1];
                r.read_exact(&mut b)?;
                len_byte_buf.push(b[0]);
                consumed += 1;
                if b[0] & 0x80 == 0 || len_byte_buf.len() >= 5 {
                    break;
                }
            }
            let (len, _) = decode_varuint32(&len_byte_buf)?;
            let mut genesis = vec![0u8; len as usize];
            r.read_exact(&mut genesis)?;
            consumed += len as u64;
            ChainIdentity::Genesis(genesis)
        } else {
            let mut id = [0u8; 32];
            r.read_exact(&mut id)?;
            consumed += 32;
            ChainIdentity::ChainId(id)
        };

        let totem = read_u64_le(r)?;
        consumed += 8;
        if totem != TOTEM {
            return Err(BlockLogError::Exception(format!(
                "header totem mismatch: expected {TOTEM:#x}, found {totem:#x}"
            )));
        }

        Ok((LogHeader { version, first_block_num, identity }, consumed))
    }

    /// Chain-id derivation from a genesis blob is the chain controller's
    /// concern (it owns the hash function used elsewhere for block ids);
    /// the block log only needs a caller-supplied value to carry.
    pub fn chain_id_from_genesis(derive: impl FnOnce(&[u8]) -> [u8; 32], genesis_state: &[u8]) -> [u8; 32] {
        derive(genesis_state)
    }
}

/// Fallback chain-id derivation for a log that was opened with a genesis
/// identity and is pruned past block 1 with no caller-supplied
/// `chain_id_if_needed`: the genesis blob can no longer be carried once it
/// falls outside the retained window, but this crate has no hash function
/// of its own to replace it with (signature/hash algorithms are out of
/// scope), so it folds the genesis bytes into 32 bytes deterministically
/// instead.
pub fn fallback_chain_id(genesis_state: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, b) in genesis_state.iter().enumerate() {
        out[i % 32] ^= b.wrapping_add((i / 32) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_header_roundtrips() {
        let header = LogHeader::new_genesis(LogVersion::unpruned(3), b"genesis-blob".to_vec());
        let mut buf = Vec::new();
        let written = header.write(&mut buf).unwrap();
        assert_eq!(written, buf.len() as u64);
        let (back, consumed) = LogHeader::read(&mut &buf[..]).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(back.first_block_num, 1);
        match back.identity {
            ChainIdentity::Genesis(g) => assert_eq!(g, b"genesis-blob"),
            _ => panic!("expected genesis identity"),
        }
    }

    #[test]
    fn chain_id_header_roundtrips() {
        let header = LogHeader::new_chain_id(LogVersion::unpruned(3), 91, [7u8; 32]);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let (back, _) = LogHeader::read(&mut &buf[..]).unwrap();
        assert_eq!(back.first_block_num, 91);
        match back.identity {
            ChainIdentity::ChainId(id) => assert_eq!(id, [7u8; 32]),
            _ => panic!("expected chain-id identity"),
        }
    }

    #[test]
    fn rejects_bad_totem() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 3).unwrap();
        write_u32_le(&mut buf, 1).unwrap();
        buf.push(0); // zero-length genesis
        write_u64_le(&mut buf, 0xDEAD_BEEF_DEAD_BEEF).unwrap();
        let err = LogHeader::read(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, BlockLogError::Exception(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 99).unwrap();
        let err = LogHeader::read(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, BlockLogError::UnsupportedVersion(99)));
    }
}
