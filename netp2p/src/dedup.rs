//! Peer-block and node-transaction dedup indices (spec.md §4.G). The
//! reference keeps these as `boost::multi_index_container`s so they can be
//! range-scanned several ways at once; this translation keeps one primary
//! `HashMap` per structure plus the secondary orderings it actually needs
//! (`peer_has`/`anyone_has` need block-id lookup, `expire` needs expiry
//! order), matching `net_plugin.cpp`'s `peer_block_state_index` and
//! `node_transaction_index`.

use glint_core::BlockId;
use std::collections::{BTreeSet, HashMap, HashSet};

pub type ConnectionId = u32;

#[derive(Default)]
pub struct PeerBlockIndex {
    /// id -> set of connections known to have it.
    by_block: HashMap<BlockId, HashSet<ConnectionId>>,
    /// block_num -> ids at that number, for range-scan eviction by lib.
    by_num: std::collections::BTreeMap<u32, HashSet<BlockId>>,
}

impl PeerBlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `conn` has `id`. Returns `true` iff this is a new
    /// `(id, conn)` pair.
    pub fn add(&mut self, id: BlockId, conn: ConnectionId) -> bool {
        let inserted = self.by_block.entry(id).or_default().insert(conn);
        if inserted {
            self.by_num.entry(id.block_num()).or_default().insert(id);
        }
        inserted
    }

    pub fn peer_has(&self, id: &BlockId, conn: ConnectionId) -> bool {
        self.by_block.get(id).map(|s| s.contains(&conn)).unwrap_or(false)
    }

    pub fn anyone_has(&self, id: &BlockId) -> bool {
        self.by_block.get(id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Any connection known to have `id`, for `retry_fetch`'s peer search.
    pub fn holders(&self, id: &BlockId) -> Vec<ConnectionId> {
        self.by_block.get(id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn remove(&mut self, id: &BlockId) {
        if self.by_block.remove(id).is_some() {
            if let Some(set) = self.by_num.get_mut(&id.block_num()) {
                set.remove(id);
                if set.is_empty() {
                    self.by_num.remove(&id.block_num());
                }
            }
        }
    }

    /// Drops every entry at or below `lib`.
    pub fn expire(&mut self, lib: u32) {
        let stale: Vec<u32> = self.by_num.range(..=lib).map(|(n, _)| *n).collect();
        for num in stale {
            if let Some(ids) = self.by_num.remove(&num) {
                for id in ids {
                    self.by_block.remove(&id);
                }
            }
        }
    }
}

#[derive(Clone, Eq, PartialEq)]
struct TxKey {
    id: [u8; 32],
    conn: ConnectionId,
}

impl std::hash::Hash for TxKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.conn.hash(state);
    }
}

#[derive(Default)]
pub struct NodeTransactionIndex {
    entries: HashMap<TxKey, u32>,
    /// (expires, id, conn) for in-order expiry scanning.
    by_expiry: BTreeSet<(u32, [u8; 32], ConnectionId)>,
}

impl NodeTransactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as known-held-by `conn`, expiring no later than
    /// `min(trx_expires, now + dedup_window)`. Returns `true` iff newly
    /// inserted.
    pub fn add(&mut self, id: [u8; 32], trx_expires: u32, conn: ConnectionId, now: u32, dedup_window: u32) -> bool {
        let key = TxKey { id, conn };
        if self.entries.contains_key(&key) {
            return false;
        }
        let expires = trx_expires.min(now.saturating_add(dedup_window));
        self.entries.insert(key, expires);
        self.by_expiry.insert((expires, id, conn));
        true
    }

    pub fn have(&self, id: &[u8; 32]) -> bool {
        self.entries.keys().any(|k| &k.id == id)
    }

    /// Drops every record with `expires <= now`.
    pub fn expire(&mut self, now: u32) {
        let stale: Vec<(u32, [u8; 32], ConnectionId)> =
            self.by_expiry.range(..=(now, [0xffu8; 32], ConnectionId::MAX)).cloned().collect();
        for (expires, id, conn) in stale {
            self.by_expiry.remove(&(expires, id, conn));
            self.entries.remove(&TxKey { id, conn });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
