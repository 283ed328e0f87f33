//! Time synchronisation per spec.md §4.J: a four-field nanosecond exchange
//! used only to estimate one-way latency, never to discipline a clock.

use crate::wire::TimeMessage;

/// Timestamps below this look like microseconds, not nanoseconds, relative
/// to any time after 2023 — a safety net for interop with older peers that
/// send coarser units. `2023-01-01T00:00:00Z` in each unit.
const NS_FLOOR_2023: i64 = 1_672_531_200_000_000_000;
const US_FLOOR_2023: i64 = 1_672_531_200_000_000;
const MS_FLOOR_2023: i64 = 1_672_531_200_000;

/// Normalises a timestamp that might have arrived in µs or ms to ns, using
/// bracketed post-2023-epoch heuristics.
pub fn normalize_to_ns(raw: i64) -> i64 {
    if raw >= NS_FLOOR_2023 {
        raw
    } else if raw >= US_FLOOR_2023 {
        raw * 1_000
    } else if raw >= MS_FLOOR_2023 {
        raw * 1_000_000
    } else {
        raw
    }
}

/// Builds the outbound `time` message: `xmt = now`, everything else zero.
pub fn outbound(now_ns: i64) -> TimeMessage {
    TimeMessage { org: 0, rec: 0, xmt: now_ns, dst: 0 }
}

/// Tracks the `org` value we last sent, since a peer's reply only yields a
/// usable latency estimate when it echoes that exact value back.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeTracker {
    last_org_sent: Option<i64>,
}

pub struct ReceivedTime {
    /// One-way latency estimate in nanoseconds, if this reply matched.
    pub latency_ns: Option<i64>,
    /// The reply to send back to the peer.
    pub reply: TimeMessage,
}

impl TimeTracker {
    pub fn record_sent(&mut self, msg: &TimeMessage) {
        self.last_org_sent = Some(msg.xmt);
    }

    /// Handles an inbound `time` message, normalising its timestamps first.
    pub fn on_received(&mut self, msg: TimeMessage, now_ns: i64) -> ReceivedTime {
        let org = normalize_to_ns(msg.org);
        let xmt = normalize_to_ns(msg.xmt);
        let dst = now_ns;

        let latency_ns = if Some(org) == self.last_org_sent && org != 0 {
            Some(dst - org)
        } else {
            None
        };

        let reply = TimeMessage { org: xmt, rec: dst, xmt: now_ns, dst: 0 };
        ReceivedTime { latency_ns, reply }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_microsecond_and_millisecond_timestamps() {
        let ns = 1_700_000_000_000_000_000i64;
        let us = ns / 1_000;
        let ms = ns / 1_000_000;
        assert_eq!(normalize_to_ns(ns), ns);
        assert_eq!(normalize_to_ns(us), ns);
        assert_eq!(normalize_to_ns(ms), ns);
    }

    #[test]
    fn latency_computed_only_when_org_echoes_our_last_send() {
        let mut tracker = TimeTracker::default();
        tracker.record_sent(&TimeMessage { org: 0, rec: 0, xmt: 1_700_000_000_000_000_000, dst: 0 });

        let reply = tracker.on_received(
            TimeMessage { org: 1_700_000_000_000_000_000, rec: 0, xmt: 1_700_000_000_500_000_000, dst: 0 },
            1_700_000_000_900_000_000,
        );
        assert_eq!(reply.latency_ns, Some(900_000_000));

        let stale = tracker.on_received(
            TimeMessage { org: 1, rec: 0, xmt: 2, dst: 0 },
            1_700_000_001_000_000_000,
        );
        assert!(stale.latency_ns.is_none());
    }

    #[test]
    fn reply_echoes_peer_xmt_as_our_org() {
        let mut tracker = TimeTracker::default();
        let received = tracker.on_received(
            TimeMessage { org: 0, rec: 0, xmt: 555, dst: 0 },
            1_700_000_000_000_000_000,
        );
        assert_eq!(received.reply.org, 555);
        assert_eq!(received.reply.rec, 1_700_000_000_000_000_000);
    }
}
