//! Correlation id spaces.
//!
//! Every inbound frame carries a correlation id drawn from one of three
//! disjoint spaces:
//!
//! ```text
//! +---------------------------+-----------------------------------+
//! | 0                         | unsolicited push, never a reply   |
//! +---------------------------+-----------------------------------+
//! | 1 .. MONOTONIC_CEILING    | one-shot requests (table lookup)  |
//! +---------------------------+-----------------------------------+
//! | Sentinel::id()            | pinned polling loops (fast path)  |
//! +---------------------------+-----------------------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id reserved for push events
pub const PUSH_ID: u64 = 0;

/// Exclusive upper bound for monotonic request ids; every sentinel lies above it
pub const MONOTONIC_CEILING: u64 = 100_000_000;

/// Fixed correlation ids reserved for repeating polling loops
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// Status poll of a single received gift
    StatusPoll = 123_456_789,
    /// Round-robin upgrade attempts
    UpgradeRace = 987_654_321,
}

impl Sentinel {
    /// All sentinels, in declaration order
    pub const ALL: [Sentinel; 2] = [Sentinel::StatusPoll, Sentinel::UpgradeRace];

    /// Wire value of this sentinel
    pub const fn id(self) -> u64 {
        self as u64
    }

    /// Look up the sentinel owning `id`
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Short label used in logs
    pub fn label(self) -> &'static str {
        match self {
            Sentinel::StatusPoll => "status",
            Sentinel::UpgradeRace => "upgrade",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.id())
    }
}

/// Result of classifying an inbound correlation id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// Push event, routed to push handlers
    Push,
    /// Reply to a pinned polling request
    Sentinel(Sentinel),
    /// Reply to a one-shot request, resolved through the correlation table
    Correlated(u64),
}

impl IdSpace {
    /// Classify a raw correlation id
    pub fn classify(id: u64) -> Self {
        if id == PUSH_ID {
            return IdSpace::Push;
        }
        match Sentinel::from_id(id) {
            Some(sentinel) => IdSpace::Sentinel(sentinel),
            None => IdSpace::Correlated(id),
        }
    }
}
