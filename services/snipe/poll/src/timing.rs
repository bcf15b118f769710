//! Round-trip timing per polling kind.
//!
//! Sends are keyed by a sequence counter independent of correlation ids.
//! Replies are matched against the oldest outstanding send, so the latency
//! figures are aggregated per kind rather than exact per attempt.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Counters of one ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Sends recorded
    pub sent: u64,
    /// Replies recorded
    pub received: u64,
    /// Sends still awaiting a reply
    pub outstanding: usize,
    /// Most recent matched round trip
    pub last_rtt: Option<Duration>,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_seq: u64,
    outstanding: VecDeque<(u64, Instant)>,
    sent: u64,
    received: u64,
    last_rtt: Option<Duration>,
}

/// Send timestamps of one polling kind
#[derive(Debug)]
pub struct TimingLedger {
    retention: Duration,
    state: Mutex<LedgerState>,
}

impl TimingLedger {
    /// Create a ledger that forgets sends older than `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, state: &mut LedgerState, now: Instant) {
        while let Some(&(_, at)) = state.outstanding.front() {
            if now.duration_since(at) <= self.retention {
                break;
            }
            state.outstanding.pop_front();
        }
    }

    /// Record a send, returning its sequence number
    pub fn record_send(&self) -> u64 {
        let now = Instant::now();
        let mut state = self.lock();
        self.prune(&mut state, now);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.sent += 1;
        state.outstanding.push_back((seq, now));
        seq
    }

    /// Undo a send that never reached the transport
    pub fn forget(&self, seq: u64) {
        let mut state = self.lock();
        if let Some(pos) = state.outstanding.iter().position(|&(s, _)| s == seq) {
            state.outstanding.remove(pos);
            state.sent = state.sent.saturating_sub(1);
        }
    }

    /// Record a reply, returning the round trip of the oldest outstanding send
    pub fn record_reply(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        state.received += 1;
        self.prune(&mut state, now);
        let rtt = state
            .outstanding
            .pop_front()
            .map(|(_, at)| now.duration_since(at));
        if rtt.is_some() {
            state.last_rtt = rtt;
        }
        rtt
    }

    /// Current counters
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            sent: state.sent,
            received: state.received,
            outstanding: state.outstanding.len(),
            last_rtt: state.last_rtt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fifo_matching() {
        let ledger = TimingLedger::new(Duration::from_secs(10));
        ledger.record_send();
        tokio::time::advance(Duration::from_millis(5)).await;
        ledger.record_send();
        tokio::time::advance(Duration::from_millis(5)).await;

        assert_eq!(ledger.record_reply(), Some(Duration::from_millis(10)));
        assert_eq!(ledger.record_reply(), Some(Duration::from_millis(5)));
        assert_eq!(ledger.record_reply(), None);

        let snapshot = ledger.snapshot();
        assert_eq!((snapshot.sent, snapshot.received, snapshot.outstanding), (2, 3, 0));
        assert_eq!(snapshot.last_rtt, Some(Duration::from_millis(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_prunes_old_sends() {
        let ledger = TimingLedger::new(Duration::from_millis(100));
        ledger.record_send();
        ledger.record_send();
        tokio::time::advance(Duration::from_millis(150)).await;
        ledger.record_send();
        assert_eq!(ledger.snapshot().outstanding, 1);
        assert_eq!(ledger.record_reply(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_forget_undoes_send() {
        let ledger = TimingLedger::new(Duration::from_secs(1));
        let seq = ledger.record_send();
        ledger.forget(seq);
        assert_eq!(ledger.snapshot(), LedgerSnapshot::default());
    }
}
