//! Gift-snipe service binary.
//!
//! Connects to the platform client bridge, logs in interactively, and then
//! accepts operator commands from the console and the operator chat.

use anyhow::Context;
use clap::Parser;
use snipe_poll::{GiftScanner, PollingController};
use snipe_session::{
    AuthStateMachine, BridgeConfig, BridgeTransport, Dispatcher, DriverConfig, SessionDriver, SessionFlags, Transport,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod chat;
mod config;
mod console;
mod logging;
mod notifier;

use chat::ChatCommandHandler;
use config::SnipeConfig;
use console::Console;
use logging::SnipeLogFormatter;
use notifier::{ConsoleNotifier, StdinCredentials};

/// Time allowed for blocking work to finish once the service stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Gift-snipe service
#[derive(Parser, Debug)]
#[command(name = "gift-snipe", version, about = "Watches, upgrades and buys platform gifts")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Bridge address, overrides the configuration file
    #[arg(long)]
    bridge: Option<SocketAddr>,

    /// Receive wait of the session driver, e.g. 1s
    #[arg(long, default_value = "1s")]
    receive_timeout: humantime::Duration,

    /// Longest delay between session creation attempts, e.g. 30s
    #[arg(long, default_value = "30s")]
    max_backoff: humantime::Duration,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("gift_snipe={}", level).parse()?)
        .add_directive(format!("snipe_session={}", level).parse()?)
        .add_directive(format!("snipe_poll={}", level).parse()?)
        .add_directive(format!("snipe_wire={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(SnipeLogFormatter::new("snipe"))
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;
    let result = runtime.block_on(run(args));
    // Console and credential reads block until the next input line
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting gift-snipe v{}", env!("CARGO_PKG_VERSION"));

    let mut config = SnipeConfig::load_from_file(&args.config);
    if let Some(addr) = args.bridge {
        config.bridge_addr = addr;
    }
    config.validate()?;
    let config = Arc::new(config);

    let transport: Arc<dyn Transport> = Arc::new(BridgeTransport::new(
        BridgeConfig {
            addr: config.bridge_addr,
            ..BridgeConfig::default()
        },
        Handle::current(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(transport.clone()));

    let notifier = Arc::new(ConsoleNotifier::new());
    let authorized = notifier.authorized();
    let flags = Arc::new(SessionFlags::new());
    let auth = AuthStateMachine::install(
        &dispatcher,
        Arc::new(StdinCredentials),
        config.session_parameters(),
        flags.clone(),
        notifier.clone(),
    );

    let controller = Arc::new(PollingController::new(
        dispatcher.clone(),
        notifier.clone(),
        config.poll_config(),
    ));
    let scanner = GiftScanner::new(dispatcher.clone(), notifier.clone());

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    match config.operator_chat_id {
        Some(chat_id) => {
            dispatcher.register_push_handler(Arc::new(ChatCommandHandler::new(
                chat_id,
                command_tx,
                config.race_interval(),
            )));
            info!("Accepting commands from chat {}", chat_id);
        }
        None => drop(command_tx),
    }

    let driver = SessionDriver::new(
        transport,
        dispatcher.clone(),
        flags,
        DriverConfig {
            receive_timeout: args.receive_timeout.into(),
            max_backoff: args.max_backoff.into(),
            ..DriverConfig::default()
        },
    )
    .spawn()
    .context("failed to start the session driver thread")?;
    info!("Session driver started, bridge at {}", config.bridge_addr);

    let console = Console::new(dispatcher.clone(), controller.clone(), scanner, config.clone());
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = async {
            authorized.notified().await;
            console.run(command_rx).await;
        } => info!("Console closed, shutting down"),
    }

    controller.stop();
    controller.join().await;

    match tokio::time::timeout(SHUTDOWN_GRACE, tokio::task::spawn_blocking(move || driver.shutdown())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Session driver join failed: {}", e),
        Err(_) => warn!("Session driver still busy after {:?}", SHUTDOWN_GRACE),
    }

    let stats = dispatcher.stats();
    info!(
        "gift-snipe stopped (state {:?}, sent {}, delivered {}, dropped {})",
        auth.current().map(|s| s.label()),
        stats.sent,
        stats.delivered,
        stats.dropped
    );
    Ok(())
}
