//! Connection state machine and write-queue management (spec.md §4.J,
//! §5). Grounded on `net_plugin.cpp`'s `connection` class: heartbeat,
//! two-band write queue, per-connection throughput throttling. The actual
//! socket I/O loop (one `tokio::task` per connection reading from an
//! `mpsc` command queue) is this crate's async analogue of the reference's
//! strand — see the module doc on [`crate`].

use std::time::Duration;

use crate::error::{NetError, Result};
use crate::wire::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionStatus {
    /// The only legal transition out of `Connecting` is to `Connected`;
    /// every other transition is monotone (nothing ever leaves `Closed`).
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (s, n) if s == n => true,
            (Connecting, Connected) => true,
            (Connecting, _) => false,
            (Connected, Closing) | (Connected, Closed) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMask {
    Blocks,
    Trx,
    Both,
}

impl RoleMask {
    pub fn carries_blocks(self) -> bool {
        matches!(self, RoleMask::Blocks | RoleMask::Both)
    }

    pub fn carries_trx(self) -> bool {
        matches!(self, RoleMask::Trx | RoleMask::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBand {
    /// Block replies: drained first on every write opportunity.
    Sync,
    Normal,
}

pub const DEFAULT_WRITE_QUEUE_SOFT_CAP: usize = 40 * 1024 * 1024;
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

struct QueuedMessage {
    band: WriteBand,
    bytes: usize,
    msg: Message,
}

/// Two-band write queue with a throughput throttle on the sync band,
/// matching spec.md §4.J. The sync band always drains first.
pub struct WriteQueue {
    queue: Vec<QueuedMessage>,
    soft_cap: usize,
    rate_cap_bytes_per_sec: Option<u64>,
    batch_start_ms: Option<u64>,
    batch_bytes_sent: u64,
}

impl WriteQueue {
    pub fn new(soft_cap: usize, rate_cap_bytes_per_sec: Option<u64>) -> Self {
        WriteQueue { queue: Vec::new(), soft_cap, rate_cap_bytes_per_sec, batch_start_ms: None, batch_bytes_sent: 0 }
    }

    pub fn queued_bytes(&self) -> usize {
        self.queue.iter().map(|m| m.bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues `msg`. Fails the connection (closes it) if the queue's
    /// total byte size would exceed twice the soft cap.
    pub fn enqueue(&mut self, band: WriteBand, msg: Message, bytes: usize) -> Result<()> {
        let projected = self.queued_bytes() + bytes;
        if projected > self.soft_cap * 2 {
            return Err(NetError::WriteQueueOverflow { queued: projected });
        }
        self.queue.push(QueuedMessage { band, bytes, msg });
        Ok(())
    }

    /// Whether a block send of `bytes` may proceed now at `now_ms`, given
    /// the peer's declared rate cap. Defers (returns `false`) rather than
    /// sending over-cap traffic; the caller should retry shortly.
    pub fn throttle_check(&mut self, bytes: u64, now_ms: u64) -> bool {
        let Some(cap) = self.rate_cap_bytes_per_sec else { return true };
        let start = *self.batch_start_ms.get_or_insert(now_ms);
        let elapsed_ms = now_ms.saturating_sub(start).max(1);
        let rate = self.batch_bytes_sent * 1000 / elapsed_ms;
        if rate >= cap {
            return false;
        }
        self.batch_bytes_sent += bytes;
        true
    }

    /// Pops the next message to send: the sync band drains completely
    /// before any normal-band message is sent.
    pub fn pop_next(&mut self) -> Option<Message> {
        let idx = self
            .queue
            .iter()
            .position(|m| m.band == WriteBand::Sync)
            .or_else(|| if self.queue.is_empty() { None } else { Some(0) })?;
        Some(self.queue.remove(idx).msg)
    }
}

/// Per-connection heartbeat state: closes the connection if nothing is
/// received within `2 * keepalive`, and re-sends our handshake at half that
/// timeout when we aren't currently syncing from this peer.
pub struct Heartbeat {
    keepalive_ms: u64,
    last_received_ms: u64,
}

pub enum HeartbeatAction {
    None,
    ResendHandshake,
    CloseTimedOut,
}

impl Heartbeat {
    pub fn new(keepalive_ms: u64, now_ms: u64) -> Self {
        Heartbeat { keepalive_ms, last_received_ms: now_ms }
    }

    pub fn on_message_received(&mut self, now_ms: u64) {
        self.last_received_ms = now_ms;
    }

    pub fn tick(&self, now_ms: u64, syncing_from_this_peer: bool) -> HeartbeatAction {
        let elapsed = now_ms.saturating_sub(self.last_received_ms);
        let timeout = self.keepalive_ms * 2;
        if elapsed >= timeout {
            return HeartbeatAction::CloseTimedOut;
        }
        if elapsed >= timeout / 2 && !syncing_from_this_peer {
            return HeartbeatAction::ResendHandshake;
        }
        HeartbeatAction::None
    }
}
