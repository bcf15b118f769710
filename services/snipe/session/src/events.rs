//! Upward notifications from the session and polling layers.

use snipe_wire::{AuthorizationState, Gift};

/// Detail of one observed gift
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedDetail {
    /// Regular gift with its upgrade price
    Regular {
        /// Stars needed to upgrade, if upgradable
        upgrade_price: Option<i64>,
    },
    /// Upgraded gift with its attribute names
    Upgraded {
        /// Model name
        model: String,
        /// Backdrop name
        backdrop: String,
        /// Symbol name
        symbol: String,
    },
}

/// A gift seen during a listing scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftObservation {
    /// Owner the scan ran for
    pub owner_id: i64,
    /// Received-gift identifier
    pub received_gift_id: String,
    /// Regular or upgraded details
    pub detail: ObservedDetail,
}

/// Receives session and gift notifications
pub trait SessionEventHandler: Send + Sync + std::fmt::Debug {
    /// The session became authorized; fires once per login
    fn notify_authorized(&self);
    /// The authorization state changed
    fn notify_state_changed(&self, _state: &AuthorizationState) {}
    /// A gift was seen during a listing scan
    fn notify_gift_observed(&self, observation: &GiftObservation);
    /// A limited gift with remaining stock appeared in the catalogue
    fn notify_limited_gift(&self, gift: &Gift);
}

/// Handler that only logs
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

impl SessionEventHandler for LoggingEventHandler {
    fn notify_authorized(&self) {
        tracing::info!("Session authorized");
    }

    fn notify_gift_observed(&self, observation: &GiftObservation) {
        tracing::info!("Gift observed: {:?}", observation);
    }

    fn notify_limited_gift(&self, gift: &Gift) {
        tracing::info!("Limited gift observed: {} for {} stars", gift.id, gift.star_count);
    }
}
