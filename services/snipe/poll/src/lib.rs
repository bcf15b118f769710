//! Polling loops for gift-snipe.
//!
//! Three loop kinds share one dispatcher:
//!
//! - **Status poll**: polls one target on the status sentinel and claims it
//!   through the correlation table once it becomes upgradable
//! - **Upgrade race**: sends pinned upgrade attempts round-robin over a
//!   target list until one succeeds
//! - **Acquisition**: scans the gift catalogue for newly listed limited
//!   gifts and optionally buys them
//!
//! Each kind has its own running flag and [`TimingLedger`]. The
//! [`GiftScanner`] pages through received gifts on demand.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acquisition;
pub mod controller;
pub mod flags;
pub mod scan;
pub mod status;
pub mod targets;
pub mod timing;
pub mod upgrade;

// Re-export main types
pub use acquisition::{Acquisition, AcquisitionConfig};
pub use controller::{PollConfig, PollError, PollStats, PollingController};
pub use flags::{LoopFlags, LoopKind};
pub use scan::{GiftScanner, PAGE_SIZE};
pub use status::StatusPoll;
pub use targets::{GiftTarget, TargetError, TargetList};
pub use timing::{LedgerSnapshot, TimingLedger};
pub use upgrade::{UpgradeOutcome, UpgradeRace};
