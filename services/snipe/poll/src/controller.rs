//! Operator surface for the polling loops.

use snipe_session::{Dispatcher, SessionEventHandler};
use snipe_wire::Sentinel;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::acquisition::{run_acquisition, Acquisition, AcquisitionConfig};
use crate::flags::{LoopFlags, LoopKind};
use crate::status::{run_status_poll, StatusPoll};
use crate::targets::GiftTarget;
use crate::timing::{LedgerSnapshot, TimingLedger};
use crate::upgrade::{run_upgrade_race, UpgradeRace};

/// Polling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The loop is already running
    #[error("{0} loop is already running")]
    AlreadyRunning(LoopKind),
    /// Upgrade race started without targets
    #[error("target list is empty")]
    EmptyTargets,
    /// Status poll started without a configured target
    #[error("no status target configured")]
    NoStatusTarget,
    /// Interval must be positive
    #[error("polling interval must be positive")]
    ZeroInterval,
}

/// Polling settings
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Target watched by the status poll
    pub status_target: Option<GiftTarget>,
    /// Status poll period
    pub status_interval: Duration,
    /// Age after which an unanswered status poll no longer blocks the next one
    pub in_flight_timeout: Duration,
    /// How long unmatched sends stay in a timing ledger
    pub ledger_retention: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            status_target: None,
            status_interval: Duration::from_millis(25),
            in_flight_timeout: Duration::from_secs(2),
            ledger_retention: Duration::from_secs(60),
        }
    }
}

/// Counters of every loop kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Status poll timing
    pub status: LedgerSnapshot,
    /// Upgrade race timing
    pub upgrade: LedgerSnapshot,
    /// Acquisition timing
    pub acquisition: LedgerSnapshot,
    /// Claims issued by the status poll
    pub claims: u64,
    /// Upgrade attempts sent
    pub attempts: u64,
    /// Successful upgrades
    pub successes: u64,
    /// Loops currently running
    pub running: Vec<LoopKind>,
}

/// Starts, stops and joins the polling loops
pub struct PollingController {
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn SessionEventHandler>,
    config: PollConfig,
    flags: Arc<LoopFlags>,
    status: Option<Arc<StatusPoll>>,
    race: Arc<UpgradeRace>,
    acquisition_ledger: Arc<TimingLedger>,
    tasks: Mutex<Vec<(LoopKind, JoinHandle<()>)>>,
}

impl PollingController {
    /// Create a controller and register its sentinel handlers
    pub fn new(dispatcher: Arc<Dispatcher>, events: Arc<dyn SessionEventHandler>, config: PollConfig) -> Self {
        let flags = Arc::new(LoopFlags::new());

        let status = config.status_target.clone().map(|target| {
            let poll = Arc::new(StatusPoll::new(
                target,
                flags.clone(),
                Arc::new(TimingLedger::new(config.ledger_retention)),
                &dispatcher,
            ));
            dispatcher.register_sentinel_handler(Sentinel::StatusPoll, poll.clone());
            poll
        });

        let race = Arc::new(UpgradeRace::new(
            flags.clone(),
            Arc::new(TimingLedger::new(config.ledger_retention)),
        ));
        dispatcher.register_sentinel_handler(Sentinel::UpgradeRace, race.clone());

        Self {
            dispatcher,
            events,
            flags,
            status,
            race,
            acquisition_ledger: Arc::new(TimingLedger::new(config.ledger_retention)),
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Shared running flags
    pub fn flags(&self) -> &Arc<LoopFlags> {
        &self.flags
    }

    fn track(&self, kind: LoopKind, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, handle));
    }

    /// Abort leftovers of `kind`, then raise its flag
    fn begin(&self, kind: LoopKind) -> Result<(), PollError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.flags.is_running(kind) {
            return Err(PollError::AlreadyRunning(kind));
        }
        // A stopped task of the same kind may still be parked on its ticker
        for (_, old) in tasks.iter().filter(|(k, h)| *k == kind && !h.is_finished()) {
            old.abort();
        }
        tasks.retain(|(k, h)| *k != kind && !h.is_finished());

        if self.flags.try_start(kind) {
            Ok(())
        } else {
            Err(PollError::AlreadyRunning(kind))
        }
    }

    /// Start polling the configured status target
    pub fn start_status_poll(&self) -> Result<(), PollError> {
        let poll = self.status.clone().ok_or(PollError::NoStatusTarget)?;
        if self.config.status_interval.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        self.begin(LoopKind::StatusPoll)?;
        let handle = tokio::spawn(run_status_poll(
            poll,
            self.dispatcher.clone(),
            self.config.status_interval,
            self.config.in_flight_timeout,
        ));
        self.track(LoopKind::StatusPoll, handle);
        Ok(())
    }

    /// Start racing upgrades over `targets`
    pub fn start_upgrade_race(&self, interval: Duration, targets: Vec<GiftTarget>) -> Result<(), PollError> {
        if targets.is_empty() {
            return Err(PollError::EmptyTargets);
        }
        if interval.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        self.begin(LoopKind::UpgradeRace)?;
        let handle = tokio::spawn(run_upgrade_race(
            self.race.clone(),
            self.dispatcher.clone(),
            interval,
            targets,
        ));
        self.track(LoopKind::UpgradeRace, handle);
        Ok(())
    }

    /// Start scanning the catalogue for limited gifts
    pub fn start_acquisition(&self, interval: Duration, config: AcquisitionConfig) -> Result<(), PollError> {
        if interval.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        self.begin(LoopKind::Acquisition)?;
        let acquisition = Arc::new(Acquisition::new(
            config,
            self.flags.clone(),
            self.acquisition_ledger.clone(),
            &self.dispatcher,
            self.events.clone(),
        ));
        let handle = tokio::spawn(run_acquisition(acquisition, self.dispatcher.clone(), interval));
        self.track(LoopKind::Acquisition, handle);
        Ok(())
    }

    /// Stop every loop at its next iteration boundary
    pub fn stop(&self) {
        self.flags.stop_all();
        info!("All polling loops stopping");
    }

    /// Stop one loop; false if it was not running
    pub fn stop_loop(&self, kind: LoopKind) -> bool {
        let stopped = self.flags.stop(kind);
        if stopped {
            info!("{} loop stopping", kind);
        }
        stopped
    }

    /// Whether `kind` is running
    pub fn is_running(&self, kind: LoopKind) -> bool {
        self.flags.is_running(kind)
    }

    /// Wait for every spawned loop task to finish
    pub async fn join(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (kind, handle) in tasks {
            if let Err(e) = handle.await {
                error!("{} loop task failed: {}", kind, e);
            }
        }
    }

    /// Current counters
    pub fn stats(&self) -> PollStats {
        PollStats {
            status: self
                .status
                .as_ref()
                .map(|s| s.ledger_snapshot())
                .unwrap_or_default(),
            upgrade: self.race.ledger_snapshot(),
            acquisition: self.acquisition_ledger.snapshot(),
            claims: self.status.as_ref().map(|s| s.claims()).unwrap_or(0),
            attempts: self.race.attempts(),
            successes: self.race.successes(),
            running: LoopKind::ALL
                .into_iter()
                .filter(|k| self.flags.is_running(*k))
                .collect(),
        }
    }
}

impl std::fmt::Debug for PollingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingController")
            .field("config", &self.config)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipe_session::{LoggingEventHandler, MemoryTransport, Transport};
    use snipe_wire::{Frame, Object, ReceivedGift, RemoteError, Request};

    fn controller(config: PollConfig) -> (Arc<MemoryTransport>, Arc<Dispatcher>, PollingController) {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        dispatcher.attach(transport.create_session().unwrap());
        let controller = PollingController::new(dispatcher.clone(), Arc::new(LoggingEventHandler), config);
        (transport, dispatcher, controller)
    }

    fn race_targets(transport: &MemoryTransport) -> Vec<String> {
        transport
            .sent_with_id(Sentinel::UpgradeRace.id())
            .into_iter()
            .filter_map(|s| match s.request {
                Request::UpgradeGift { received_gift_id, .. } => Some(received_gift_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_timing() {
        let (transport, _dispatcher, controller) = controller(PollConfig::default());
        controller
            .start_upgrade_race(
                Duration::from_millis(10),
                vec![GiftTarget::new("A", 100), GiftTarget::new("B", 200)],
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        controller.stop();
        controller.join().await;

        let sent = race_targets(&transport);
        assert!((2..=3).contains(&sent.len()), "got {} attempts", sent.len());
        assert_eq!(sent, ["A", "B", "A"][..sent.len()].to_vec());

        let prices: Vec<i64> = transport
            .sent_with_id(Sentinel::UpgradeRace.id())
            .into_iter()
            .filter_map(|s| match s.request {
                Request::UpgradeGift { star_count, .. } => Some(star_count),
                _ => None,
            })
            .collect();
        assert_eq!(prices[..2], [100i64, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_attempts_and_aggregate_timing() {
        let (transport, dispatcher, controller) = controller(PollConfig::default());
        controller
            .start_upgrade_race(Duration::from_millis(10), vec![GiftTarget::new("A", 1)])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;

        let attempts = transport.sent_with_id(Sentinel::UpgradeRace.id()).len();
        assert!(attempts >= 3);
        for _ in 0..attempts {
            dispatcher.on_frame(Frame::new(
                Sentinel::UpgradeRace.id(),
                Object::Error(RemoteError::new(400, "STARGIFT_UPGRADE_UNAVAILABLE")),
            ));
        }
        assert!(controller.is_running(LoopKind::UpgradeRace));
        assert_eq!(dispatcher.pending(), 0);

        let stats = controller.stats();
        assert_eq!(stats.upgrade.received, attempts as u64);
        assert_eq!(stats.running, vec![LoopKind::UpgradeRace]);

        controller.stop();
        controller.join().await;
        assert!(controller.stats().running.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refusals() {
        let (_transport, _dispatcher, controller) = controller(PollConfig::default());
        assert_eq!(controller.start_status_poll(), Err(PollError::NoStatusTarget));
        assert_eq!(
            controller.start_upgrade_race(Duration::from_millis(10), Vec::new()),
            Err(PollError::EmptyTargets)
        );
        assert!(!controller.is_running(LoopKind::UpgradeRace));

        let targets = vec![GiftTarget::new("A", 1)];
        controller
            .start_upgrade_race(Duration::from_secs(60), targets.clone())
            .unwrap();
        assert_eq!(
            controller.start_upgrade_race(Duration::from_secs(60), targets),
            Err(PollError::AlreadyRunning(LoopKind::UpgradeRace))
        );

        assert!(controller.stop_loop(LoopKind::UpgradeRace));
        assert!(!controller.stop_loop(LoopKind::UpgradeRace));
        controller.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_uses_only_new_targets() {
        let (transport, _dispatcher, controller) = controller(PollConfig::default());
        controller
            .start_upgrade_race(Duration::from_millis(10), vec![GiftTarget::new("A", 1)])
            .unwrap();
        while race_targets(&transport).is_empty() {
            tokio::task::yield_now().await;
        }

        // Restart without joining; the old task is still parked on its ticker
        assert!(controller.stop_loop(LoopKind::UpgradeRace));
        controller
            .start_upgrade_race(Duration::from_millis(10), vec![GiftTarget::new("B", 2)])
            .unwrap();
        assert_eq!(controller.tasks.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(35)).await;
        controller.stop();
        controller.join().await;

        let sent = race_targets(&transport);
        assert_eq!(sent[0], "A");
        assert!(sent.len() >= 4, "got {:?}", sent);
        assert!(sent[1..].iter().all(|id| id == "B"), "stale attempt in {:?}", sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_poll_claims_through_controller() {
        let (transport, dispatcher, controller) = controller(PollConfig {
            status_target: Some(GiftTarget::new("700279", 25000)),
            status_interval: Duration::from_millis(10),
            ..PollConfig::default()
        });
        controller.start_status_poll().unwrap();
        assert_eq!(
            controller.start_status_poll(),
            Err(PollError::AlreadyRunning(LoopKind::StatusPoll))
        );

        while transport.sent_with_id(Sentinel::StatusPoll.id()).is_empty() {
            tokio::task::yield_now().await;
        }
        dispatcher.on_frame(Frame::new(
            Sentinel::StatusPoll.id(),
            Object::ReceivedGift(ReceivedGift {
                received_gift_id: "700279".into(),
                can_be_upgraded: true,
                gift: None,
            }),
        ));
        controller.join().await;

        assert!(!controller.is_running(LoopKind::StatusPoll));
        assert_eq!(controller.stats().claims, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_uses_table() {
        let (transport, dispatcher, controller) = controller(PollConfig::default());
        controller
            .start_acquisition(
                Duration::from_millis(10),
                AcquisitionConfig {
                    owner_id: 1,
                    purchase: false,
                },
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        controller.stop_loop(LoopKind::Acquisition);
        controller.join().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| matches!(s.request, Request::GetAvailableGifts)));
        assert!(sent.iter().all(|s| s.id < snipe_wire::MONOTONIC_CEILING));
        assert_eq!(dispatcher.pending(), 2);
    }
}
