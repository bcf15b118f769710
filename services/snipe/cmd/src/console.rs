//! Operator commands from the console and the operator chat.

use snipe_poll::{AcquisitionConfig, GiftScanner, LoopKind, PollingController, TargetList};
use snipe_session::Dispatcher;
use snipe_wire::{Object, Request};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::config::SnipeConfig;
use crate::{component_error, component_info, component_warn};

/// Command parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Empty input
    #[error("empty command")]
    Empty,
    /// Unknown command word
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    /// Missing or malformed argument
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the status poll
    Status,
    /// Start the upgrade race over the target file
    Upg {
        /// Race period
        interval: Duration,
    },
    /// Send one upgrade request
    Upgrade {
        /// Received-gift identifier
        id: String,
        /// Expected price
        price: i64,
    },
    /// Start the acquisition loop
    Buy {
        /// Catalogue scan period
        interval: Duration,
        /// Recipient of purchases
        owner: i64,
    },
    /// Scan own gifts
    Test,
    /// Stop every loop
    Stop,
    /// Print counters
    Stats,
    /// Print the command list
    Help,
}

const HELP: &str = "commands: status | upg <millis> | upgrade <id> <price> | buy <millis> <owner> | test | stop | stats";

fn millis(arg: Option<&str>, usage: &'static str) -> Result<Duration, CommandError> {
    match arg.and_then(|a| a.parse::<u64>().ok()) {
        Some(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(CommandError::Usage(usage)),
    }
}

impl Command {
    /// Parse one console line
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(CommandError::Empty);
        };
        let command = match word {
            "status" => Command::Status,
            "upg" => Command::Upg {
                interval: millis(words.next(), "upg <millis>")?,
            },
            "upgrade" => {
                const USAGE: &str = "upgrade <id> <price>";
                let id = words.next().ok_or(CommandError::Usage(USAGE))?.to_string();
                let price = words
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or(CommandError::Usage(USAGE))?;
                Command::Upgrade { id, price }
            }
            "buy" => {
                const USAGE: &str = "buy <millis> <owner>";
                let interval = millis(words.next(), USAGE)?;
                let owner = words
                    .next()
                    .and_then(|o| o.parse().ok())
                    .ok_or(CommandError::Usage(USAGE))?;
                Command::Buy { interval, owner }
            }
            "test" => Command::Test,
            "stop" => Command::Stop,
            "stats" => Command::Stats,
            "help" => Command::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

async fn upgrade_once(dispatcher: Arc<Dispatcher>, id: String, price: i64) {
    match dispatcher.call(Request::upgrade(id.clone(), price)).await {
        Ok(Object::UpgradeGiftResult(result)) => {
            component_info!("console", "Upgraded {}: {} #{}", id, result.gift.title, result.gift.id)
        }
        Ok(Object::Error(e)) => component_warn!("console", "Upgrade of {} failed: {}", id, e),
        Ok(other) => component_warn!("console", "Unexpected upgrade reply: {}", other.kind()),
        Err(e) => component_error!("console", "Upgrade of {} not sent: {}", id, e),
    }
}

/// Executes operator commands
pub struct Console {
    dispatcher: Arc<Dispatcher>,
    controller: Arc<PollingController>,
    scanner: GiftScanner,
    config: Arc<SnipeConfig>,
}

impl Console {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        controller: Arc<PollingController>,
        scanner: GiftScanner,
        config: Arc<SnipeConfig>,
    ) -> Self {
        Self {
            dispatcher,
            controller,
            scanner,
            config,
        }
    }

    /// Run one command
    pub async fn execute(&self, command: Command) {
        match command {
            Command::Status => match self.controller.start_status_poll() {
                Ok(()) => component_info!("console", "Status poll started"),
                Err(e) => component_warn!("console", "Status poll not started: {}", e),
            },
            Command::Upg { interval } => self.start_race(interval),
            Command::Upgrade { id, price } => {
                tokio::spawn(upgrade_once(self.dispatcher.clone(), id, price));
            }
            Command::Buy { interval, owner } => {
                let config = AcquisitionConfig {
                    owner_id: owner,
                    purchase: self.config.purchase,
                };
                match self.controller.start_acquisition(interval, config) {
                    Ok(()) => component_info!("console", "Acquisition for {} started", owner),
                    Err(e) => component_warn!("console", "Acquisition not started: {}", e),
                }
            }
            Command::Test => {
                let scanner = self.scanner.clone();
                tokio::spawn(async move {
                    scanner.scan_self().await;
                });
            }
            Command::Stop => self.controller.stop(),
            Command::Stats => self.print_stats(),
            Command::Help => component_info!("console", "{}", HELP),
        }
    }

    fn start_race(&self, interval: Duration) {
        if self.controller.is_running(LoopKind::UpgradeRace) {
            component_info!("console", "Already racing upgrades");
            return;
        }
        let targets = match TargetList::load(&self.config.targets_file) {
            Ok(targets) => targets,
            Err(e) => {
                component_error!("console", "Upgrade race not started: {}", e);
                return;
            }
        };

        // Gifts held by channels are listed first so their state is known
        for owner in targets.channel_owners() {
            let scanner = self.scanner.clone();
            tokio::spawn(async move {
                scanner.scan(owner).await;
            });
        }

        let count = targets.len();
        match self.controller.start_upgrade_race(interval, targets.into_inner()) {
            Ok(()) => component_info!("console", "Racing {} targets every {:?}", count, interval),
            Err(e) => component_warn!("console", "Upgrade race not started: {}", e),
        }
    }

    fn print_stats(&self) {
        let dispatch = self.dispatcher.stats();
        let poll = self.controller.stats();
        component_info!(
            "console",
            "dispatch: sent={} pinned={} delivered={} dropped={} pending={} pushes={}",
            dispatch.sent,
            dispatch.pinned,
            dispatch.delivered,
            dispatch.dropped,
            dispatch.pending,
            dispatch.pushes
        );
        for (kind, ledger) in [
            (LoopKind::StatusPoll, poll.status),
            (LoopKind::UpgradeRace, poll.upgrade),
            (LoopKind::Acquisition, poll.acquisition),
        ] {
            component_info!(
                "console",
                "{}: sent/received {}/{} outstanding={} last_rtt={:?} running={}",
                kind,
                ledger.sent,
                ledger.received,
                ledger.outstanding,
                ledger.last_rtt,
                poll.running.contains(&kind)
            );
        }
        component_info!(
            "console",
            "claims={} attempts={} successes={}",
            poll.claims,
            poll.attempts,
            poll.successes
        );
    }

    /// Read console lines and chat commands until both sources close
    pub async fn run(&self, mut chat: mpsc::UnboundedReceiver<Command>) {
        component_info!("console", "Enter commands ({})", HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut chat_open = true;

        while stdin_open || chat_open {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => match Command::parse(&line) {
                        Ok(command) => self.execute(command).await,
                        Err(CommandError::Empty) => {}
                        Err(e) => component_warn!("console", "{}", e),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        component_error!("console", "Console input failed: {}", e);
                        stdin_open = false;
                    }
                },
                command = chat.recv(), if chat_open => match command {
                    Some(command) => self.execute(command).await,
                    None => chat_open = false,
                },
            }
        }
        component_info!("console", "Console closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipe_poll::PollConfig;
    use snipe_session::{LoggingEventHandler, MemoryTransport, Transport};
    use snipe_wire::{Frame, RemoteError, Sentinel};
    use std::io::Write;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("status"), Ok(Command::Status));
        assert_eq!(
            Command::parse("upg 25"),
            Ok(Command::Upg {
                interval: Duration::from_millis(25)
            })
        );
        assert_eq!(
            Command::parse("  upgrade 700279 25000 "),
            Ok(Command::Upgrade {
                id: "700279".into(),
                price: 25000
            })
        );
        assert_eq!(
            Command::parse("buy 100 -1001234"),
            Ok(Command::Buy {
                interval: Duration::from_millis(100),
                owner: -1001234
            })
        );
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse("upg"), Err(CommandError::Usage("upg <millis>")));
        assert_eq!(Command::parse("upg 0"), Err(CommandError::Usage("upg <millis>")));
        assert_eq!(
            Command::parse("upgrade 1 cheap"),
            Err(CommandError::Usage("upgrade <id> <price>"))
        );
        assert_eq!(Command::parse("on"), Err(CommandError::Unknown("on".into())));
    }

    fn console(config: SnipeConfig) -> (Arc<MemoryTransport>, Console) {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        dispatcher.attach(transport.create_session().unwrap());
        let events = Arc::new(LoggingEventHandler);
        let controller = Arc::new(PollingController::new(
            dispatcher.clone(),
            events.clone(),
            PollConfig::default(),
        ));
        let scanner = GiftScanner::new(dispatcher.clone(), events);
        (
            transport,
            Console::new(dispatcher, controller, scanner, Arc::new(config)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_upg_and_stop() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":"-1009_1","price":100}},{{"id":"2","price":200}}]"#).unwrap();
        let (transport, console) = console(SnipeConfig {
            targets_file: file.path().to_path_buf(),
            ..SnipeConfig::default()
        });

        console
            .execute(Command::Upg {
                interval: Duration::from_millis(10),
            })
            .await;
        assert!(console.controller.is_running(LoopKind::UpgradeRace));
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The channel owner was scanned and the race began
        assert!(transport
            .sent()
            .iter()
            .any(|s| matches!(s.request, Request::GetReceivedGifts { .. })));
        assert!(!transport.sent_with_id(Sentinel::UpgradeRace.id()).is_empty());

        console.execute(Command::Stop).await;
        console.controller.join().await;
        assert!(!console.controller.is_running(LoopKind::UpgradeRace));
    }

    #[tokio::test]
    async fn test_upgrade_does_not_wait_for_reply() {
        let (transport, console) = console(SnipeConfig::default());

        tokio::time::timeout(
            Duration::from_secs(1),
            console.execute(Command::Upgrade {
                id: "700279".into(),
                price: 25000,
            }),
        )
        .await
        .unwrap();

        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = transport.sent();
        assert_eq!(sent[0].request, Request::upgrade("700279", 25000));
        assert_eq!(console.dispatcher.pending(), 1);

        // Console input is served while the call is outstanding
        console.execute(Command::Stats).await;

        console.dispatcher.on_frame(Frame::new(
            sent[0].id,
            Object::Error(RemoteError::new(400, "STARGIFT_UPGRADE_UNAVAILABLE")),
        ));
        assert_eq!(console.dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_upg_with_bad_target_file_does_not_start() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":"1"}}]"#).unwrap();
        let (transport, console) = console(SnipeConfig {
            targets_file: file.path().to_path_buf(),
            ..SnipeConfig::default()
        });

        console
            .execute(Command::Upg {
                interval: Duration::from_millis(10),
            })
            .await;
        assert!(!console.controller.is_running(LoopKind::UpgradeRace));
        assert!(transport.sent().is_empty());
    }
}
