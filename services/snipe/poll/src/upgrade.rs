//! Round-robin upgrade race.

use snipe_session::{Dispatcher, SentinelHandler};
use snipe_wire::{Object, RemoteError, Sentinel, UpgradeGiftResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::flags::{LoopFlags, LoopKind};
use crate::targets::GiftTarget;
use crate::timing::{LedgerSnapshot, TimingLedger};

const UPGRADE_UNAVAILABLE: &str = "STARGIFT_UPGRADE_UNAVAILABLE";
const NOT_ENOUGH_STARS: &str = "Have not enough Telegram Stars";

/// Classified upgrade reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Upgrade not open yet
    Unavailable,
    /// Balance too low for the expected price
    NotEnoughStars,
    /// Any other remote error
    Failed(RemoteError),
    /// The gift was upgraded
    Upgraded(UpgradeGiftResult),
    /// Reply of an unexpected kind
    Unexpected(&'static str),
}

impl UpgradeOutcome {
    /// Classify an upgrade reply
    pub fn classify(object: Object) -> Self {
        match object {
            Object::Error(e) if e.code == 400 && e.message == UPGRADE_UNAVAILABLE => UpgradeOutcome::Unavailable,
            Object::Error(e) if e.code == 400 && e.message == NOT_ENOUGH_STARS => UpgradeOutcome::NotEnoughStars,
            Object::Error(e) => UpgradeOutcome::Failed(e),
            Object::UpgradeGiftResult(result) => UpgradeOutcome::Upgraded(result),
            other => UpgradeOutcome::Unexpected(other.kind()),
        }
    }
}

/// Reply handler for pinned upgrade attempts
#[derive(Debug)]
pub struct UpgradeRace {
    flags: Arc<LoopFlags>,
    ledger: Arc<TimingLedger>,
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl UpgradeRace {
    /// Create the race state
    pub fn new(flags: Arc<LoopFlags>, ledger: Arc<TimingLedger>) -> Self {
        Self {
            flags,
            ledger,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        }
    }

    /// Attempts sent since creation
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful upgrades observed
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    /// Timing counters of the race
    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    fn attempt(&self, dispatcher: &Dispatcher, target: &GiftTarget) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let seq = self.ledger.record_send();
        if let Err(e) = dispatcher.send_pinned(target.upgrade_request(), Sentinel::UpgradeRace) {
            warn!("Upgrade attempt for {} not sent: {}", target.id, e);
            self.ledger.forget(seq);
        }
    }
}

impl SentinelHandler for UpgradeRace {
    fn on_reply(&self, object: Object) {
        let rtt = self.ledger.record_reply().unwrap_or_default();
        let snapshot = self.ledger.snapshot();
        let timing = format!(
            "{:>3} ms | sent/received: {}/{}",
            rtt.as_millis(),
            snapshot.sent,
            snapshot.received
        );

        match UpgradeOutcome::classify(object) {
            UpgradeOutcome::Unavailable => debug!("{} E(400): Unavailable", timing),
            UpgradeOutcome::NotEnoughStars => info!("{} E(400): Not enough stars", timing),
            UpgradeOutcome::Failed(e) => warn!("{} {}", timing, e),
            UpgradeOutcome::Upgraded(result) => {
                self.successes.fetch_add(1, Ordering::SeqCst);
                self.flags.stop(LoopKind::UpgradeRace);
                info!(
                    "{} Success: {} upgraded to {} #{}",
                    timing, result.received_gift_id, result.gift.title, result.gift.id
                );
            }
            UpgradeOutcome::Unexpected(kind) => warn!("{} Received: {}", timing, kind),
        }
    }
}

/// Upgrade loop body; attempt k uses target k mod N
pub(crate) async fn run_upgrade_race(
    race: Arc<UpgradeRace>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    targets: Vec<GiftTarget>,
) {
    info!("Upgrade race over {} targets started (every {:?})", targets.len(), interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for target in targets.iter().cycle() {
        ticker.tick().await;
        if !race.flags.is_running(LoopKind::UpgradeRace) {
            break;
        }
        race.attempt(&dispatcher, target);
    }
    info!("Upgrade race stopped after {} attempts", race.attempts());
}
