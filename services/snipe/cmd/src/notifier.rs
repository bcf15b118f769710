//! Operator-facing session notifications and interactive credentials.

use snipe_session::{CredentialPrompt, CredentialSource, GiftObservation, ObservedDetail, SessionEventHandler};
use snipe_wire::{AuthorizationState, Gift};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::{component_error, component_info};

/// Logs gift events and wakes the console once the session is authorized
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    authorized: Arc<Notify>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notified on every transition into the authorized state
    pub fn authorized(&self) -> Arc<Notify> {
        self.authorized.clone()
    }
}

impl SessionEventHandler for ConsoleNotifier {
    fn notify_authorized(&self) {
        component_info!("session", "Authorized");
        // Stores a permit when the console is not waiting yet
        self.authorized.notify_one();
    }

    fn notify_state_changed(&self, state: &AuthorizationState) {
        component_info!("session", "Authorization state: {}", state.label());
    }

    fn notify_gift_observed(&self, observation: &GiftObservation) {
        match &observation.detail {
            ObservedDetail::Regular { upgrade_price } => component_info!(
                "gifts",
                "{} owned by {}: regular, upgrade price {:?}",
                observation.received_gift_id,
                observation.owner_id,
                upgrade_price
            ),
            ObservedDetail::Upgraded { model, backdrop, symbol } => component_info!(
                "gifts",
                "{} owned by {}: {} / {} / {}",
                observation.received_gift_id,
                observation.owner_id,
                model,
                backdrop,
                symbol
            ),
        }
    }

    fn notify_limited_gift(&self, gift: &Gift) {
        let remaining = gift.overall_limits.as_ref().map(|l| l.remaining_count).unwrap_or(0);
        component_info!(
            "gifts",
            "Limited gift {} listed: {} stars, {} left",
            gift.id,
            gift.star_count,
            remaining
        );
    }
}

/// Reads credentials from standard input
#[derive(Debug, Default)]
pub struct StdinCredentials;

impl CredentialSource for StdinCredentials {
    fn prompt_text(&self, prompt: CredentialPrompt) -> String {
        eprint!("{}: ", prompt);
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
            component_error!("session", "Failed to read {:?}: {}", prompt, e);
        }
        line.trim().to_string()
    }
}
