//! Per-loop running flags.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Polling loop kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Status poll of one target
    StatusPoll,
    /// Round-robin upgrade race
    UpgradeRace,
    /// Catalogue scan for limited gifts
    Acquisition,
}

impl LoopKind {
    /// Every loop kind
    pub const ALL: [LoopKind; 3] = [LoopKind::StatusPoll, LoopKind::UpgradeRace, LoopKind::Acquisition];

    /// Short name used in logs and commands
    pub fn label(self) -> &'static str {
        match self {
            LoopKind::StatusPoll => "status",
            LoopKind::UpgradeRace => "upgrade",
            LoopKind::Acquisition => "acquisition",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Running flags, one per loop kind
///
/// Loops observe their flag only at iteration boundaries.
#[derive(Debug, Default)]
pub struct LoopFlags {
    status: AtomicBool,
    upgrade: AtomicBool,
    acquisition: AtomicBool,
}

impl LoopFlags {
    /// All flags cleared
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, kind: LoopKind) -> &AtomicBool {
        match kind {
            LoopKind::StatusPoll => &self.status,
            LoopKind::UpgradeRace => &self.upgrade,
            LoopKind::Acquisition => &self.acquisition,
        }
    }

    /// Whether `kind` is running
    pub fn is_running(&self, kind: LoopKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    /// Raise the flag; false if it was already raised
    pub fn try_start(&self, kind: LoopKind) -> bool {
        self.flag(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Lower the flag; true if this call lowered it
    pub fn stop(&self, kind: LoopKind) -> bool {
        self.flag(kind)
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Lower every flag
    pub fn stop_all(&self) {
        for kind in LoopKind::ALL {
            self.flag(kind).store(false, Ordering::Release);
        }
    }
}
