//! Catalogue scan for newly listed limited gifts.

use dashmap::DashSet;
use snipe_session::{Dispatcher, SessionEventHandler};
use snipe_wire::{AvailableGifts, MessageSender, Object, Request};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::flags::{LoopFlags, LoopKind};
use crate::timing::TimingLedger;

/// Acquisition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Recipient of purchased gifts
    pub owner_id: i64,
    /// Buy each newly seen gift
    pub purchase: bool,
}

/// State of one acquisition run
#[derive(Debug)]
pub struct Acquisition {
    config: AcquisitionConfig,
    flags: Arc<LoopFlags>,
    ledger: Arc<TimingLedger>,
    dispatcher: Weak<Dispatcher>,
    events: Arc<dyn SessionEventHandler>,
    seen: DashSet<i64>,
    purchases: AtomicU64,
}

impl Acquisition {
    /// Create an acquisition run
    pub fn new(
        config: AcquisitionConfig,
        flags: Arc<LoopFlags>,
        ledger: Arc<TimingLedger>,
        dispatcher: &Arc<Dispatcher>,
        events: Arc<dyn SessionEventHandler>,
    ) -> Self {
        Self {
            config,
            flags,
            ledger,
            dispatcher: Arc::downgrade(dispatcher),
            events,
            seen: DashSet::new(),
            purchases: AtomicU64::new(0),
        }
    }

    /// Distinct limited gifts seen in this run
    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    /// Purchase requests sent
    pub fn purchases(&self) -> u64 {
        self.purchases.load(Ordering::SeqCst)
    }

    fn scan_once(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let seq = self.ledger.record_send();
        let me = Arc::clone(self);
        if let Err(e) = dispatcher.send_with(Request::GetAvailableGifts, move |object| me.on_catalogue(object)) {
            warn!("Catalogue request not sent: {}", e);
            self.ledger.forget(seq);
        }
    }

    fn on_catalogue(&self, object: Object) {
        let rtt = self.ledger.record_reply();
        match object {
            Object::AvailableGifts(catalogue) => self.process(catalogue),
            Object::Error(e) => warn!("Catalogue request failed: {}", e),
            other => warn!("Unexpected catalogue reply: {}", other.kind()),
        }
        debug!("Catalogue reply in {:?}", rtt);
    }

    fn process(&self, catalogue: AvailableGifts) {
        let mut fresh = 0usize;
        for item in catalogue.gifts {
            let gift = item.gift;
            if !gift.is_limited_in_stock() || !self.seen.insert(gift.id) {
                continue;
            }
            fresh += 1;
            let remaining = gift.overall_limits.as_ref().map(|l| l.remaining_count).unwrap_or(0);
            info!(
                "New limited gift: id={} price={} remaining={}",
                gift.id, gift.star_count, remaining
            );
            self.events.notify_limited_gift(&gift);
            if self.config.purchase {
                self.purchase(gift.id);
            }
        }
        if fresh == 0 {
            debug!("No new limited gifts");
        }
    }

    fn purchase(&self, gift_id: i64) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        let request = Request::SendGift {
            gift_id,
            owner_id: MessageSender::from_owner_id(self.config.owner_id),
            is_private: true,
            pay_for_upgrade: false,
        };
        let sent = dispatcher.send_with(request, move |object| match object {
            Object::Error(e) => warn!("Purchase of gift {} failed: {}", gift_id, e),
            other => info!("Purchase of gift {} -> {}", gift_id, other.kind()),
        });
        match sent {
            Ok(_) => {
                self.purchases.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Purchase of gift {} not sent: {}", gift_id, e),
        }
    }
}

/// Acquisition loop body
pub(crate) async fn run_acquisition(acquisition: Arc<Acquisition>, dispatcher: Arc<Dispatcher>, interval: Duration) {
    info!(
        "Acquisition for owner {} started (every {:?}, purchase: {})",
        acquisition.config.owner_id, interval, acquisition.config.purchase
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !acquisition.flags.is_running(LoopKind::Acquisition) {
            break;
        }
        acquisition.scan_once(&dispatcher);
    }
    info!("Acquisition stopped, {} limited gifts seen", acquisition.seen());
}
