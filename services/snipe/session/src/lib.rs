//! Transport sessions, request dispatch and authorization for gift-snipe.
//!
//! This crate owns everything between the remote platform client and the
//! polling layer: the transport abstraction, the dispatcher that multiplexes
//! correlated requests, pinned polls and push events over one session, the
//! authorization state machine, and the driver thread that keeps the
//! transport session alive.
//!
//! ## Example
//!
//! ```rust,no_run
//! use snipe_session::{
//!     AuthStateMachine, CredentialPrompt, CredentialSource, Dispatcher, DriverConfig,
//!     LoggingEventHandler, MemoryTransport, SessionDriver, SessionFlags,
//! };
//! use snipe_wire::SessionParameters;
//! use std::sync::Arc;
//!
//! struct Stdin;
//!
//! impl CredentialSource for Stdin {
//!     fn prompt_text(&self, prompt: CredentialPrompt) -> String {
//!         println!("{}:", prompt);
//!         let mut line = String::new();
//!         let _ = std::io::stdin().read_line(&mut line);
//!         line.trim().to_string()
//!     }
//! }
//!
//! # fn example() -> std::io::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//! let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
//! let flags = Arc::new(SessionFlags::new());
//! AuthStateMachine::install(
//!     &dispatcher,
//!     Arc::new(Stdin),
//!     SessionParameters::default(),
//!     flags.clone(),
//!     Arc::new(LoggingEventHandler),
//! );
//!
//! let driver = SessionDriver::new(transport, dispatcher, flags, DriverConfig::default());
//! let handle = driver.spawn()?;
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod bridge;
pub mod correlation;
pub mod dispatcher;
pub mod driver;
pub mod events;
pub mod transport;

// Re-export main types
pub use auth::{AuthStateMachine, CredentialPrompt, CredentialSource, SessionFlags};
pub use bridge::{BridgeConfig, BridgeTransport};
pub use correlation::{CorrelationTable, ReplyCallback};
pub use dispatcher::{DispatchError, DispatchStats, Dispatcher, PushHandler, Routed, SentinelHandler};
pub use driver::{DriverConfig, DriverHandle, SessionDriver, Tick};
pub use events::{GiftObservation, LoggingEventHandler, ObservedDetail, SessionEventHandler};
pub use transport::memory::{MemoryTransport, SentRequest};
pub use transport::{SessionHandle, Transport, TransportError};
