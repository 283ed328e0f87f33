//! Unlinkable block cache (spec.md §4.F): blocks we've accepted the bytes
//! of but cannot yet connect to our chain because we don't hold their
//! parent. Grounded on `net_plugin.cpp`'s `unlinkable_block_state_cache`
//! (a `boost::multi_index_container` keyed by id, ordered by timestamp for
//! LRU eviction and by `previous` for linkage lookups) — translated to a
//! handful of owned maps since Rust has no multi-index container in std.

use glint_core::{BlockId, BlockNum};
use std::collections::HashMap;

pub const CACHE_CAP: usize = 30;

#[derive(Debug, Clone)]
pub struct UnlinkableBlock {
    pub id: BlockId,
    pub previous: BlockId,
    pub block_num: BlockNum,
    pub timestamp_ns: i64,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct UnlinkableBlockCache {
    by_id: HashMap<BlockId, UnlinkableBlock>,
}

impl UnlinkableBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Inserts `block`, ignored if its id is already present. If the cache
    /// grows past [`CACHE_CAP`], evicts the oldest-by-timestamp entry and
    /// returns its id so the caller can also drop any peer-block bookkeeping
    /// for it.
    pub fn add(&mut self, block: UnlinkableBlock) -> Option<BlockId> {
        if self.by_id.contains_key(&block.id) {
            return None;
        }
        self.by_id.insert(block.id, block);

        if self.by_id.len() > CACHE_CAP {
            let oldest = self
                .by_id
                .values()
                .min_by_key(|b| b.timestamp_ns)
                .map(|b| b.id)
                .expect("cache just grew past cap, so it is non-empty");
            self.by_id.remove(&oldest);
            return Some(oldest);
        }
        None
    }

    /// Removes and returns any cached block whose `previous` is `parent_id`.
    pub fn pop_linkable(&mut self, parent_id: &BlockId) -> Option<UnlinkableBlock> {
        let child_id = self
            .by_id
            .values()
            .find(|b| &b.previous == parent_id)
            .map(|b| b.id)?;
        self.by_id.remove(&child_id)
    }

    /// Drops every entry with `block_num <= lib_num` — they can never link
    /// to anything we still care about.
    pub fn expire(&mut self, lib_num: BlockNum) {
        self.by_id.retain(|_, b| b.block_num > lib_num);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id_byte: u8, num: BlockNum, previous: BlockId, ts: i64) -> UnlinkableBlock {
        UnlinkableBlock {
            id: BlockId::with_num_and_tail(num, &[id_byte; 28]),
            previous,
            block_num: num,
            timestamp_ns: ts,
            payload: vec![id_byte],
        }
    }

    #[test]
    fn duplicate_id_is_ignored() {
        let mut cache = UnlinkableBlockCache::new();
        let b = block(1, 5, BlockId::ZERO, 100);
        assert!(cache.add(b.clone()).is_none());
        assert!(cache.add(b).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_oldest_timestamp_past_cap() {
        let mut cache = UnlinkableBlockCache::new();
        for n in 0..CACHE_CAP as u32 {
            cache.add(block(n as u8, n + 1, BlockId::ZERO, n as i64));
        }
        assert_eq!(cache.len(), CACHE_CAP);

        let evicted = cache.add(block(200, 200, BlockId::ZERO, 1_000_000));
        assert_eq!(evicted, Some(BlockId::with_num_and_tail(1, &[0u8; 28])));
        assert_eq!(cache.len(), CACHE_CAP);
    }

    #[test]
    fn pop_linkable_finds_child_of_parent() {
        let mut cache = UnlinkableBlockCache::new();
        let parent_id = BlockId::with_num_and_tail(1, &[9; 28]);
        cache.add(block(2, 2, parent_id, 1));

        let found = cache.pop_linkable(&parent_id).unwrap();
        assert_eq!(found.block_num, 2);
        assert!(cache.pop_linkable(&parent_id).is_none());
    }

    #[test]
    fn expire_drops_at_or_below_lib() {
        let mut cache = UnlinkableBlockCache::new();
        cache.add(block(1, 10, BlockId::ZERO, 1));
        cache.add(block(2, 20, BlockId::ZERO, 2));
        cache.expire(10);
        assert_eq!(cache.len(), 1);
    }
}
