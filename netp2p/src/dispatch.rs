//! Dispatch manager (spec.md §4.H): exclusive owner of the peer-block and
//! node-transaction indices, grounded on `net_plugin.cpp`'s
//! `dispatch_manager`. Broadcast fan-out and retry-fetch live here; catch-up
//! flow decisions belong to [`crate::sync::SyncManager`].

use glint_core::{BlockId, BlockNum};
use std::sync::Mutex;

use crate::dedup::{ConnectionId, NodeTransactionIndex, PeerBlockIndex};
use crate::unlinkable::UnlinkableBlockCache;

/// What a recipient connection looks like from the dispatch manager's point
/// of view — enough to decide whether it is an eligible broadcast target.
#[derive(Debug, Clone, Copy)]
pub struct RecipientInfo {
    pub conn: ConnectionId,
    pub is_syncing_from_us: bool,
    pub carries_blocks: bool,
    pub carries_trx: bool,
    pub peer_lib: BlockNum,
}

#[derive(Debug, Clone)]
pub struct Enqueued {
    pub conn: ConnectionId,
}

/// Default dedup window (seconds) used when the caller doesn't pass one
/// explicitly — matches the reference's node-transaction-index default.
pub const DEFAULT_DEDUP_WINDOW_SECS: u32 = 120;

pub struct DispatchManager {
    peer_blocks: Mutex<PeerBlockIndex>,
    node_trx: Mutex<NodeTransactionIndex>,
    unlinkable: Mutex<UnlinkableBlockCache>,
}

impl Default for DispatchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchManager {
    pub fn new() -> Self {
        DispatchManager {
            peer_blocks: Mutex::new(PeerBlockIndex::new()),
            node_trx: Mutex::new(NodeTransactionIndex::new()),
            unlinkable: Mutex::new(UnlinkableBlockCache::new()),
        }
    }

    /// For every non-syncing, "blocks"-role recipient, records that it now
    /// has `id` and, if that's new and the peer's advertised lib is behind
    /// `block_num`, returns it as a send target.
    pub fn bcast_block(&self, block_num: BlockNum, id: BlockId, recipients: &[RecipientInfo]) -> Vec<Enqueued> {
        let mut targets = Vec::new();
        let mut peer_blocks = self.peer_blocks.lock().expect("peer-block index mutex poisoned");
        for r in recipients {
            if r.is_syncing_from_us || !r.carries_blocks {
                continue;
            }
            let newly_inserted = peer_blocks.add(id, r.conn);
            if newly_inserted && r.peer_lib < block_num {
                targets.push(Enqueued { conn: r.conn });
            }
        }
        targets
    }

    /// Same shape for transactions, deduped via the node-transaction index
    /// instead of the peer-block index.
    pub fn bcast_trx(
        &self,
        id: [u8; 32],
        trx_expires: u32,
        now: u32,
        recipients: &[RecipientInfo],
    ) -> Vec<Enqueued> {
        let mut targets = Vec::new();
        let mut node_trx = self.node_trx.lock().expect("node-transaction index mutex poisoned");
        for r in recipients {
            if !r.carries_trx {
                continue;
            }
            if node_trx.add(id, trx_expires, r.conn, now, DEFAULT_DEDUP_WINDOW_SECS) {
                targets.push(Enqueued { conn: r.conn });
            }
        }
        targets
    }

    /// If `conn`'s outstanding request for `id` has gone unanswered, returns
    /// another connection known to hold it, falling back to `conn` itself
    /// when nobody else is known to have it.
    pub fn retry_fetch(&self, conn: ConnectionId, id: &BlockId) -> ConnectionId {
        let peer_blocks = self.peer_blocks.lock().expect("peer-block index mutex poisoned");
        peer_blocks
            .holders(id)
            .into_iter()
            .find(|&c| c != conn)
            .unwrap_or(conn)
    }

    pub fn peer_has(&self, id: &BlockId, conn: ConnectionId) -> bool {
        self.peer_blocks.lock().expect("peer-block index mutex poisoned").peer_has(id, conn)
    }

    pub fn record_peer_block(&self, id: BlockId, conn: ConnectionId) -> bool {
        self.peer_blocks.lock().expect("peer-block index mutex poisoned").add(id, conn)
    }

    pub fn unlinkable(&self) -> &Mutex<UnlinkableBlockCache> {
        &self.unlinkable
    }

    /// Periodic maintenance: drops stale peer-block entries and unlinkable
    /// blocks at or below `lib`.
    pub fn expire(&self, lib: BlockNum) {
        self.peer_blocks.lock().expect("peer-block index mutex poisoned").expire(lib);
        self.unlinkable.lock().expect("unlinkable cache mutex poisoned").expire(lib);
    }

    pub fn expire_trx(&self, now: u32) {
        self.node_trx.lock().expect("node-transaction index mutex poisoned").expire(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(conn: ConnectionId, syncing: bool, lib: BlockNum) -> RecipientInfo {
        RecipientInfo { conn, is_syncing_from_us: syncing, carries_blocks: true, carries_trx: true, peer_lib: lib }
    }

    #[test]
    fn bcast_block_skips_syncing_peers_and_peers_already_caught_up() {
        let dm = DispatchManager::new();
        let id = BlockId::with_num_and_tail(50, &[0; 28]);
        let recipients = vec![
            recipient(1, true, 0),
            recipient(2, false, 60),
            recipient(3, false, 10),
        ];
        let targets = dm.bcast_block(50, id, &recipients);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].conn, 3);
    }

    #[test]
    fn bcast_block_does_not_resend_to_a_peer_already_recorded() {
        let dm = DispatchManager::new();
        let id = BlockId::with_num_and_tail(50, &[0; 28]);
        let recipients = vec![recipient(3, false, 10)];
        assert_eq!(dm.bcast_block(50, id, &recipients).len(), 1);
        assert_eq!(dm.bcast_block(50, id, &recipients).len(), 0);
    }

    #[test]
    fn retry_fetch_picks_another_known_holder() {
        let dm = DispatchManager::new();
        let id = BlockId::with_num_and_tail(5, &[0; 28]);
        dm.record_peer_block(id, 1);
        dm.record_peer_block(id, 2);
        let picked = dm.retry_fetch(1, &id);
        assert_eq!(picked, 2);
    }

    #[test]
    fn retry_fetch_falls_back_to_original_peer_when_nobody_else_known() {
        let dm = DispatchManager::new();
        let id = BlockId::with_num_and_tail(5, &[0; 28]);
        dm.record_peer_block(id, 1);
        assert_eq!(dm.retry_fetch(1, &id), 1);
    }
}
