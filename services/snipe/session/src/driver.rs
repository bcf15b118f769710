//! Receive/dispatch loop and transport session lifecycle.

use snipe_wire::Request;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::SessionFlags;
use crate::dispatcher::{Dispatcher, Routed};
use crate::transport::{SessionHandle, Transport};

/// Driver settings
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Bounded wait for each receive
    pub receive_timeout: Duration,
    /// First delay after a failed session creation
    pub initial_backoff: Duration,
    /// Upper bound for the creation back-off
    pub max_backoff: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Outcome of one driver iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A fresh transport session was attached
    Restarted(SessionHandle),
    /// Session creation failed; retried next iteration
    RestartFailed,
    /// A frame was received and routed
    Routed(Routed),
    /// Receive timed out
    Idle,
    /// Shutdown was requested
    Shutdown,
}

/// Owns the transport session and feeds inbound frames to the dispatcher
pub struct SessionDriver {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    flags: Arc<SessionFlags>,
    config: DriverConfig,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
}

impl SessionDriver {
    /// Create a driver; the first iteration creates the transport session
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        flags: Arc<SessionFlags>,
        config: DriverConfig,
    ) -> Self {
        flags.request_restart();
        let backoff = config.initial_backoff;
        Self {
            transport,
            dispatcher,
            flags,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            backoff,
        }
    }

    /// Flag that stops the driver when raised
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run one iteration
    pub fn tick(&mut self) -> Tick {
        if self.shutdown.load(Ordering::SeqCst) {
            return Tick::Shutdown;
        }
        if self.flags.needs_restart() {
            return self.restart();
        }
        let Some(session) = self.dispatcher.session() else {
            warn!("Driver has no attached session, requesting restart");
            self.flags.request_restart();
            return Tick::Idle;
        };
        match self.transport.receive(session, self.config.receive_timeout) {
            Some(frame) => Tick::Routed(self.dispatcher.on_frame(frame)),
            None => Tick::Idle,
        }
    }

    fn restart(&mut self) -> Tick {
        if let Some(old) = self.dispatcher.detach() {
            info!("Destroying {}", old);
            self.transport.destroy_session(old);
        }
        self.dispatcher.reset();

        match self.transport.create_session() {
            Ok(session) => {
                self.dispatcher.attach(session);
                if let Err(e) = self
                    .dispatcher
                    .send(Request::GetOption { name: "version".into() }, None)
                {
                    warn!("Initial version query failed: {}", e);
                }
                self.flags.clear_restart();
                self.backoff = self.config.initial_backoff;
                info!("Transport session {} ready", session);
                Tick::Restarted(session)
            }
            Err(e) => {
                error!(
                    "Failed to create transport session: {}. Retrying in {:?}",
                    e, self.backoff
                );
                std::thread::sleep(self.backoff);
                self.grow_backoff();
                Tick::RestartFailed
            }
        }
    }

    fn grow_backoff(&mut self) {
        self.backoff = self.backoff.saturating_mul(2).min(self.config.max_backoff);
    }

    /// Loop until shutdown
    pub fn run(mut self) {
        info!("Session driver started");
        while self.tick() != Tick::Shutdown {}
        if let Some(session) = self.dispatcher.detach() {
            self.transport.destroy_session(session);
        }
        self.dispatcher.reset();
        info!("Session driver stopped");
    }

    /// Run on a dedicated OS thread
    pub fn spawn(self) -> std::io::Result<DriverHandle> {
        let shutdown = self.shutdown_flag();
        let thread = std::thread::Builder::new()
            .name("session-driver".into())
            .spawn(move || self.run())?;
        Ok(DriverHandle { shutdown, thread })
    }
}

/// Handle to a driver thread
#[derive(Debug)]
pub struct DriverHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl DriverHandle {
    /// Request shutdown without waiting
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Request shutdown and wait for the thread to exit
    pub fn shutdown(self) {
        self.stop();
        if self.thread.join().is_err() {
            error!("Session driver thread panicked");
        } else {
            debug!("Session driver joined");
        }
    }
}
