//! Sync manager (spec.md §4.I): the heart of the system. Grounded on
//! `net_plugin.cpp`'s `sync_manager` for the handshake transition table,
//! range-request source selection, and rejection back-off.

use glint_core::{BlockId, BlockNum};
use std::collections::HashMap;

use crate::dedup::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    InSync,
    LibCatchup,
    HeadCatchup,
}

#[derive(Debug, Clone, Copy)]
pub struct ChainStatus {
    pub lib: BlockNum,
    pub head: BlockNum,
    pub head_id: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    MarkPeerNotSyncing,
    ResendHandshake,
    SendLastIrrCatchUp { head: BlockNum, head_id: BlockId, earliest_available_block_num: BlockNum },
    EnterHeadCatchup { request_from: BlockNum, peer_head: BlockNum, peer_head_id: BlockId },
    SendCatchUp { head: BlockNum, head_id: BlockId, also_request_branch: bool },
    NoOp,
}

pub struct SyncManager {
    stage: SyncStage,
    known_lib: BlockNum,
    last_requested: Option<BlockNum>,
    next_expected: BlockNum,
    sync_source: Option<ConnectionId>,
    ordinal_counter: u64,
    span: u32,
    peer_limit: usize,
    rejections: HashMap<ConnectionId, RejectionState>,
    rejection_window_ms: u64,
}

/// A candidate sync source's advertised state, as the connection manager
/// would snapshot it.
#[derive(Debug, Clone, Copy)]
pub struct PeerCandidate {
    pub conn: ConnectionId,
    pub carries_blocks: bool,
    pub connected: bool,
    pub start_block: BlockNum,
    pub head: BlockNum,
    pub has_gone_away: bool,
    pub rtt_ms: u64,
    pub ordinal: u64,
}

const REJECTION_LIMIT: u32 = 13;

struct RejectionState {
    window_start_ms: Option<u64>,
    count: u32,
}

impl SyncManager {
    pub fn new(span: u32, peer_limit: usize, rejection_window_ms: u64) -> Self {
        SyncManager {
            stage: SyncStage::InSync,
            known_lib: 0,
            last_requested: None,
            next_expected: 1,
            sync_source: None,
            ordinal_counter: 0,
            span,
            peer_limit,
            rejections: HashMap::new(),
            rejection_window_ms,
        }
    }

    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    pub fn known_lib(&self) -> BlockNum {
        self.known_lib
    }

    pub fn next_expected(&self) -> BlockNum {
        self.next_expected
    }

    pub fn sync_source(&self) -> Option<ConnectionId> {
        self.sync_source
    }

    /// The handshake transition table from spec.md §4.I. `already_sent` is
    /// whether we had already sent a handshake to this peer before this
    /// exchange (governs the "re-emit handshake" branch).
    pub fn recv_handshake(
        &mut self,
        our: ChainStatus,
        peer: ChainStatus,
        latency_budget: BlockNum,
        min_distance: BlockNum,
        already_sent: bool,
        our_id_at_peer_head: Option<BlockId>,
    ) -> SyncAction {
        let delta = latency_budget + min_distance;

        if peer.head_id == our.head_id {
            return SyncAction::MarkPeerNotSyncing;
        }

        if our.head < peer.lib {
            self.known_lib = self.known_lib.max(peer.lib);
            if self.stage == SyncStage::InSync {
                self.stage = SyncStage::LibCatchup;
            }
            return if already_sent { SyncAction::ResendHandshake } else { SyncAction::NoOp };
        }

        if our.lib > peer.head.saturating_add(delta) {
            return SyncAction::SendLastIrrCatchUp {
                head: our.head,
                head_id: our.head_id,
                earliest_available_block_num: self.next_expected.max(1),
            };
        }

        if our.head.saturating_add(delta) < peer.head {
            return match self.verify_catch_up(our, peer) {
                Some(action) => action,
                None => SyncAction::NoOp,
            };
        }

        if our.head >= peer.head.saturating_add(delta) {
            // "peer's head number exists in our chain but with a different id":
            // only meaningful when we actually hold a block at that height.
            let also_request_branch = our_id_at_peer_head.map(|id| id != peer.head_id).unwrap_or(false);
            return SyncAction::SendCatchUp { head: our.head, head_id: our.head_id, also_request_branch };
        }

        SyncAction::NoOp
    }

    /// spec.md §4.I "Verify catch-up": ignored while already in
    /// `lib_catchup` or when the peer's advertised head is behind our lib.
    fn verify_catch_up(&mut self, our: ChainStatus, peer: ChainStatus) -> Option<SyncAction> {
        if self.stage == SyncStage::LibCatchup || peer.head < our.lib {
            return None;
        }
        self.stage = SyncStage::HeadCatchup;
        Some(SyncAction::EnterHeadCatchup {
            request_from: our.head,
            peer_head: peer.head,
            peer_head_id: peer.head_id,
        })
    }

    /// Selects the peer to drive `lib_catchup`'s range requests: filters to
    /// eligible candidates, sorts by latency, keeps the fastest
    /// `peer_limit`, then among those picks the smallest ordinal (0 = never
    /// used), assigning it a fresh ordinal.
    pub fn choose_sync_source(&mut self, candidates: &[PeerCandidate]) -> Option<ConnectionId> {
        let mut eligible: Vec<&PeerCandidate> = candidates
            .iter()
            .filter(|c| {
                c.carries_blocks
                    && c.connected
                    && c.start_block <= self.next_expected
                    && c.head >= self.known_lib
                    && !c.has_gone_away
            })
            .collect();
        eligible.sort_by_key(|c| c.rtt_ms);
        eligible.truncate(self.peer_limit.max(1));

        let chosen = eligible.into_iter().min_by_key(|c| c.ordinal)?;
        self.ordinal_counter += 1;
        self.sync_source = Some(chosen.conn);
        Some(chosen.conn)
    }

    /// The next range to request once a sync source is chosen.
    pub fn next_range(&self) -> (BlockNum, BlockNum) {
        let end = self.next_expected.saturating_add(self.span.saturating_sub(1)).min(self.known_lib);
        (self.next_expected, end.max(self.next_expected))
    }

    /// Call when a block arrives during `lib_catchup`/`head_catchup`.
    /// `applied` means the chain controller accepted it.
    pub fn on_block_received(&mut self, block_num: BlockNum, applied: bool) -> bool {
        if block_num >= self.last_requested.unwrap_or(0) {
            self.last_requested = None;
        }
        if applied {
            self.next_expected = self.next_expected.max(block_num + 1);
        }
        if applied && block_num >= self.known_lib && self.stage != SyncStage::InSync {
            self.stage = SyncStage::InSync;
            self.sync_source = None;
            return true; // caller should re-broadcast handshakes
        }
        false
    }

    /// Call when the current sync source disconnects: per invariant 8,
    /// `next_expected` is clamped to `max(lib+1, next_expected)` rather than
    /// rewound.
    pub fn on_sync_source_disconnected(&mut self, lib: BlockNum) {
        self.sync_source = None;
        self.last_requested = None;
        self.next_expected = self.next_expected.max(lib + 1);
    }

    /// Rejection back-off: records a rejected block from `conn` at
    /// `now_ms`. Returns `true` if the peer should now be closed (its
    /// counter crossed [`REJECTION_LIMIT`]).
    pub fn record_rejection(&mut self, conn: ConnectionId, now_ms: u64) -> bool {
        let window = self.rejection_window_ms;
        let state = self.rejections.entry(conn).or_insert(RejectionState { window_start_ms: None, count: 0 });
        let starts_new_window = match state.window_start_ms {
            None => true,
            Some(start) => now_ms.saturating_sub(start) > window,
        };
        if starts_new_window {
            state.window_start_ms = Some(now_ms);
            state.count += 1;
        }
        state.count >= REJECTION_LIMIT
    }

    /// An accepted block resets rejection state for that peer.
    pub fn record_acceptance(&mut self, conn: ConnectionId) {
        self.rejections.remove(&conn);
    }
}

/// Connector-period / immediate-close limiter (SPEC_FULL §2), tracked per
/// outbound peer address.
pub struct Reconnector {
    connector_period_ms: u64,
    immediate_close_limit: u32,
    last_attempt_ms: HashMap<String, u64>,
    consecutive_immediate_closes: HashMap<String, u32>,
}

impl Reconnector {
    pub fn new(connector_period_ms: u64, immediate_close_limit: u32) -> Self {
        Reconnector {
            connector_period_ms,
            immediate_close_limit,
            last_attempt_ms: HashMap::new(),
            consecutive_immediate_closes: HashMap::new(),
        }
    }

    /// Whether it's permissible to attempt a reconnect to `addr` at `now_ms`.
    pub fn may_attempt(&self, addr: &str, now_ms: u64) -> bool {
        if self.consecutive_immediate_closes.get(addr).copied().unwrap_or(0) >= self.immediate_close_limit {
            return false;
        }
        match self.last_attempt_ms.get(addr) {
            Some(&last) => now_ms.saturating_sub(last) >= self.connector_period_ms,
            None => true,
        }
    }

    pub fn record_attempt(&mut self, addr: &str, now_ms: u64) {
        self.last_attempt_ms.insert(addr.to_string(), now_ms);
    }

    /// `was_immediate` means the connection closed before completing a
    /// handshake-level exchange — a sign the peer is actively refusing us.
    pub fn record_close(&mut self, addr: &str, was_immediate: bool) {
        let counter = self.consecutive_immediate_closes.entry(addr.to_string()).or_insert(0);
        if was_immediate {
            *counter += 1;
        } else {
            *counter = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(lib: BlockNum, head: BlockNum, tail: u8) -> ChainStatus {
        ChainStatus { lib, head, head_id: BlockId::with_num_and_tail(head, &[tail; 28]) }
    }

    #[test]
    fn s5_peer_meaningfully_ahead_enters_head_catchup() {
        let mut sm = SyncManager::new(50, 3, 2);
        let our = status(100, 110, 1);
        let peer = status(50, 200, 2);
        let action = sm.recv_handshake(our, peer, 2, 0, false, None);
        assert_eq!(sm.stage(), SyncStage::HeadCatchup);
        assert_eq!(
            action,
            SyncAction::EnterHeadCatchup { request_from: 110, peer_head: 200, peer_head_id: peer.head_id }
        );
    }

    #[test]
    fn matching_head_ids_marks_peer_not_syncing() {
        let mut sm = SyncManager::new(50, 3, 2);
        let our = status(10, 10, 5);
        let peer = status(10, 10, 5);
        assert_eq!(sm.recv_handshake(our, peer, 2, 0, false, None), SyncAction::MarkPeerNotSyncing);
    }

    #[test]
    fn peer_far_behind_sends_last_irr_catch_up() {
        let mut sm = SyncManager::new(50, 3, 2);
        let our = status(100, 110, 1);
        let peer = status(0, 5, 2);
        let action = sm.recv_handshake(our, peer, 2, 0, false, None);
        assert!(matches!(action, SyncAction::SendLastIrrCatchUp { head: 110, .. }));
    }

    #[test]
    fn peer_meaningfully_behind_with_same_head_sends_plain_catch_up() {
        let mut sm = SyncManager::new(50, 3, 2);
        let our = status(100, 110, 1);
        let peer = status(90, 108, 1);
        let action = sm.recv_handshake(our, peer, 2, 0, false, None);
        assert!(matches!(action, SyncAction::SendCatchUp { also_request_branch: false, .. }));
    }

    #[test]
    fn within_latency_window_is_a_no_op() {
        let mut sm = SyncManager::new(50, 3, 2);
        let our = status(100, 110, 1);
        let peer = status(100, 111, 2);
        assert_eq!(sm.recv_handshake(our, peer, 2, 0, false, None), SyncAction::NoOp);
    }

    #[test]
    fn choose_sync_source_prefers_lowest_latency_then_smallest_ordinal() {
        let mut sm = SyncManager::new(50, 2, 2);
        sm.next_expected = 10;
        sm.known_lib = 100;
        let candidates = vec![
            PeerCandidate { conn: 1, carries_blocks: true, connected: true, start_block: 1, head: 200, has_gone_away: false, rtt_ms: 50, ordinal: 3 },
            PeerCandidate { conn: 2, carries_blocks: true, connected: true, start_block: 1, head: 200, has_gone_away: false, rtt_ms: 10, ordinal: 0 },
            PeerCandidate { conn: 3, carries_blocks: true, connected: true, start_block: 1, head: 200, has_gone_away: false, rtt_ms: 5, ordinal: 1 },
        ];
        // peer_limit=2 keeps conns 3 (rtt 5) and 2 (rtt 10); smallest ordinal among those is conn 2 (ordinal 0).
        assert_eq!(sm.choose_sync_source(&candidates), Some(2));
    }

    #[test]
    fn choose_sync_source_excludes_ineligible_peers() {
        let mut sm = SyncManager::new(50, 3, 2);
        sm.next_expected = 10;
        sm.known_lib = 100;
        let candidates = vec![
            PeerCandidate { conn: 1, carries_blocks: false, connected: true, start_block: 1, head: 200, has_gone_away: false, rtt_ms: 1, ordinal: 0 },
            PeerCandidate { conn: 2, carries_blocks: true, connected: true, start_block: 20, head: 200, has_gone_away: false, rtt_ms: 1, ordinal: 0 },
            PeerCandidate { conn: 3, carries_blocks: true, connected: true, start_block: 1, head: 200, has_gone_away: true, rtt_ms: 1, ordinal: 0 },
            PeerCandidate { conn: 4, carries_blocks: true, connected: true, start_block: 1, head: 200, has_gone_away: false, rtt_ms: 9, ordinal: 0 },
        ];
        assert_eq!(sm.choose_sync_source(&candidates), Some(4));
    }

    #[test]
    fn invariant_8_next_expected_non_decreasing_except_on_source_disconnect() {
        let mut sm = SyncManager::new(50, 3, 2);
        sm.next_expected = 10;
        sm.on_block_received(10, true);
        assert_eq!(sm.next_expected(), 11);
        sm.on_sync_source_disconnected(20);
        assert_eq!(sm.next_expected(), 21);
    }

    #[test]
    fn s6_thirteenth_rejection_window_closes_the_peer() {
        let mut sm = SyncManager::new(50, 3, 2);
        let mut closed = false;
        let mut now_ms = 0u64;
        for _ in 0..13 {
            closed = sm.record_rejection(7, now_ms);
            now_ms += 3; // windows are 2ms wide; 3ms apart always opens a fresh window
        }
        assert!(closed);
    }

    #[test]
    fn rejections_within_one_window_coalesce_into_a_single_count() {
        let mut sm = SyncManager::new(50, 3, 2);
        assert!(!sm.record_rejection(7, 0));
        assert!(!sm.record_rejection(7, 1)); // still inside the 2ms window
        assert!(!sm.record_rejection(7, 2)); // still inside
        assert!(!sm.record_rejection(7, 10)); // new window opens; count is still well under the limit
    }

    #[test]
    fn acceptance_resets_rejection_state() {
        let mut sm = SyncManager::new(50, 3, 2);
        sm.record_rejection(7, 0);
        sm.record_acceptance(7);
        let mut now_ms = 100u64;
        let mut closed = false;
        for _ in 0..13 {
            closed = sm.record_rejection(7, now_ms);
            now_ms += 3;
        }
        assert!(closed);
    }

    #[test]
    fn reconnector_enforces_connector_period_and_close_limit() {
        let mut rc = Reconnector::new(30_000, 2);
        assert!(rc.may_attempt("peer:1", 0));
        rc.record_attempt("peer:1", 0);
        assert!(!rc.may_attempt("peer:1", 10_000));
        assert!(rc.may_attempt("peer:1", 30_000));

        rc.record_close("peer:2", true);
        rc.record_close("peer:2", true);
        assert!(!rc.may_attempt("peer:2", 1_000_000));
        rc.record_close("peer:2", false);
        assert!(rc.may_attempt("peer:2", 1_000_000));
    }
}
