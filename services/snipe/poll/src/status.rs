//! Status poll of a single target.
//!
//! Polls are pinned to the status sentinel. The reply handler runs on the
//! driver thread; when the target becomes claimable it lowers the running
//! flag first and only the caller that lowered it issues the claim.

use snipe_session::{Dispatcher, SentinelHandler};
use snipe_wire::{Object, Request, Sentinel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::flags::{LoopFlags, LoopKind};
use crate::targets::GiftTarget;
use crate::timing::{LedgerSnapshot, TimingLedger};

/// State shared by the status loop task and its reply handler
#[derive(Debug)]
pub struct StatusPoll {
    target: GiftTarget,
    flags: Arc<LoopFlags>,
    ledger: Arc<TimingLedger>,
    dispatcher: Weak<Dispatcher>,
    in_flight: Mutex<Option<Instant>>,
    claims: AtomicU64,
}

impl StatusPoll {
    /// Create the status poll for `target`
    pub fn new(
        target: GiftTarget,
        flags: Arc<LoopFlags>,
        ledger: Arc<TimingLedger>,
        dispatcher: &Arc<Dispatcher>,
    ) -> Self {
        Self {
            target,
            flags,
            ledger,
            dispatcher: Arc::downgrade(dispatcher),
            in_flight: Mutex::new(None),
            claims: AtomicU64::new(0),
        }
    }

    /// Polled target
    pub fn target(&self) -> &GiftTarget {
        &self.target
    }

    /// Claims issued so far
    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::SeqCst)
    }

    /// Timing counters of the status poll
    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    fn poll_request(&self) -> Request {
        Request::GetReceivedGift {
            received_gift_id: self.target.id.clone(),
        }
    }

    /// Send one poll unless a younger poll is still in flight
    fn poll_once(&self, dispatcher: &Dispatcher, in_flight_timeout: Duration) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sent_at) = *in_flight {
            if sent_at.elapsed() < in_flight_timeout {
                trace!("Status poll still in flight, skipping tick");
                return false;
            }
            debug!("Status poll in flight for {:?}, sending another", sent_at.elapsed());
        }

        let seq = self.ledger.record_send();
        *in_flight = Some(Instant::now());
        drop(in_flight);

        if let Err(e) = dispatcher.send_pinned(self.poll_request(), Sentinel::StatusPoll) {
            warn!("Status poll send failed: {}", e);
            self.ledger.forget(seq);
            *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
            return false;
        }
        true
    }

    fn claim(&self) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            warn!("Dispatcher gone, cannot claim {}", self.target.id);
            return;
        };
        let id = self.target.id.clone();
        let sent = dispatcher.send_with(self.target.upgrade_request(), move |object| match object {
            Object::UpgradeGiftResult(result) => {
                info!("Claimed {}: {} #{}", id, result.gift.title, result.gift.id);
            }
            Object::Error(e) => error!("Claim of {} failed: {}", id, e),
            other => warn!("Unexpected claim reply for {}: {}", id, other.kind()),
        });
        match sent {
            Ok(request_id) => {
                self.claims.fetch_add(1, Ordering::SeqCst);
                info!("Claim for {} sent as request {}", self.target.id, request_id);
            }
            Err(e) => error!("Claim send for {} failed: {}", self.target.id, e),
        }
    }
}

impl SentinelHandler for StatusPoll {
    fn on_reply(&self, object: Object) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let rtt = self.ledger.record_reply();
        let snapshot = self.ledger.snapshot();
        debug!(
            "Status reply in {:?} | sent/received: {}/{}",
            rtt, snapshot.sent, snapshot.received
        );

        match object {
            Object::Error(e) => warn!("Status poll error: {}", e),
            Object::ReceivedGift(gift) if gift.can_be_upgraded => {
                // Only the caller that lowers the flag claims
                if self.flags.stop(LoopKind::StatusPoll) {
                    info!("{} is claimable, claiming", gift.received_gift_id);
                    self.claim();
                } else {
                    debug!("{} claimable but status poll is stopped", gift.received_gift_id);
                }
            }
            Object::ReceivedGift(gift) => {
                debug!("{} not claimable yet", gift.received_gift_id);
            }
            other => warn!("Unexpected status reply: {}", other.kind()),
        }
    }
}

/// Status loop body; ends when the flag is lowered
pub(crate) async fn run_status_poll(
    poll: Arc<StatusPoll>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    in_flight_timeout: Duration,
) {
    info!("Status poll of {} started (every {:?})", poll.target.id, interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !poll.flags.is_running(LoopKind::StatusPoll) {
            break;
        }
        poll.poll_once(&dispatcher, in_flight_timeout);
    }
    info!("Status poll of {} stopped", poll.target.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipe_session::{MemoryTransport, Transport};
    use snipe_wire::{Frame, ReceivedGift, RemoteError};

    fn setup() -> (Arc<MemoryTransport>, Arc<Dispatcher>, Arc<StatusPoll>) {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        dispatcher.attach(transport.create_session().unwrap());
        let flags = Arc::new(LoopFlags::new());
        let poll = Arc::new(StatusPoll::new(
            GiftTarget::new("700279", 25000),
            flags,
            Arc::new(TimingLedger::new(Duration::from_secs(60))),
            &dispatcher,
        ));
        dispatcher.register_sentinel_handler(Sentinel::StatusPoll, poll.clone());
        (transport, dispatcher, poll)
    }

    fn status(can_be_upgraded: bool) -> Frame {
        Frame::new(
            Sentinel::StatusPoll.id(),
            Object::ReceivedGift(ReceivedGift {
                received_gift_id: "700279".into(),
                can_be_upgraded,
                gift: None,
            }),
        )
    }

    fn claims_sent(transport: &MemoryTransport) -> usize {
        transport
            .sent()
            .iter()
            .filter(|s| matches!(s.request, Request::UpgradeGift { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_poll_skips_ticks() {
        let (transport, dispatcher, poll) = setup();
        let timeout = Duration::from_millis(50);

        assert!(poll.poll_once(&dispatcher, timeout));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(!poll.poll_once(&dispatcher, timeout));

        // A reply frees the slot
        dispatcher.on_frame(status(false));
        assert!(poll.poll_once(&dispatcher, timeout));

        // So does the in-flight timeout
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(poll.poll_once(&dispatcher, timeout));
        assert_eq!(transport.sent_with_id(Sentinel::StatusPoll.id()).len(), 3);
    }

    #[tokio::test]
    async fn test_claimable_clears_flag_then_claims_once() {
        let (transport, dispatcher, poll) = setup();
        assert!(poll.flags.try_start(LoopKind::StatusPoll));

        dispatcher.on_frame(Frame::new(
            Sentinel::StatusPoll.id(),
            Object::Error(RemoteError::new(400, "GIFT_NOT_FOUND")),
        ));
        dispatcher.on_frame(status(false));
        assert!(poll.flags.is_running(LoopKind::StatusPoll));
        assert_eq!(claims_sent(&transport), 0);

        transport.set_send_hook({
            let flags = poll.flags.clone();
            move |sent| {
                if matches!(sent.request, Request::UpgradeGift { .. }) {
                    assert!(!flags.is_running(LoopKind::StatusPoll), "claim sent before flag cleared");
                }
            }
        });
        dispatcher.on_frame(status(true));
        assert!(!poll.flags.is_running(LoopKind::StatusPoll));
        assert_eq!(claims_sent(&transport), 1);

        // The claim goes through the table, not the sentinel
        let claim = transport.sent().into_iter().last().unwrap();
        assert!(claim.id < snipe_wire::MONOTONIC_CEILING);
        assert_eq!(dispatcher.pending(), 1);

        dispatcher.on_frame(status(true));
        assert_eq!(claims_sent(&transport), 1);
        assert_eq!(poll.claims(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_after_claim() {
        let (transport, dispatcher, poll) = setup();
        assert!(poll.flags.try_start(LoopKind::StatusPoll));
        let task = tokio::spawn(run_status_poll(
            poll.clone(),
            dispatcher.clone(),
            Duration::from_millis(10),
            Duration::from_millis(100),
        ));

        while transport.sent_with_id(Sentinel::StatusPoll.id()).is_empty() {
            tokio::task::yield_now().await;
        }
        dispatcher.on_frame(status(true));
        task.await.unwrap();

        assert_eq!(transport.sent_with_id(Sentinel::StatusPoll.id()).len(), 1);
        assert_eq!(poll.claims(), 1);
    }
}
