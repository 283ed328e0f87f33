//! The block identifier: a 32-byte id whose high 32 bits (the first four
//! bytes, since the number is stored big-endian within the id) encode the
//! block number. This lets any holder of an id recover the block number
//! without reading the block payload at all.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type BlockNum = u32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        BlockId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Recover the block number from the high 32 bits of the id.
    pub fn block_num(&self) -> BlockNum {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Build an id whose block number reads back as `num`, with the
    /// remainder of the id filled from `tail` (typically a content hash of
    /// the block payload). Used by tests and by the "make an id for a
    /// block number we don't otherwise have" trick the sync manager's
    /// `last_irr_catch_up` notice relies on.
    pub fn with_num_and_tail(num: BlockNum, tail: &[u8; 28]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0..4].copy_from_slice(&num.to_be_bytes());
        bytes[4..32].copy_from_slice(tail);
        BlockId(bytes)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}, #{})", crate::hexutil::encode(&self.0), self.block_num())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::hexutil::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_num_recovered_from_id() {
        let id = BlockId::with_num_and_tail(42, &[0xab; 28]);
        assert_eq!(id.block_num(), 42);
    }

    #[test]
    fn zero_id_has_block_num_zero() {
        assert_eq!(BlockId::ZERO.block_num(), 0);
    }

    #[test]
    fn ordering_follows_raw_bytes() {
        let a = BlockId::with_num_and_tail(1, &[0; 28]);
        let b = BlockId::with_num_and_tail(2, &[0; 28]);
        assert!(a < b);
    }
}
