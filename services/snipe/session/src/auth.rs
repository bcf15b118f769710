//! Authorization state machine.
//!
//! Every `updateAuthorizationState` push replaces the current state and
//! advances a generation counter. Requests issued while handling a state
//! capture that generation; replies that arrive after the state moved on are
//! stale and ignored, while an error reply for the current generation
//! re-enters the state (re-prompting the credential source).

use snipe_wire::{AuthorizationState, Object, PushEvent, Request, SessionParameters};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, PushHandler};
use crate::events::SessionEventHandler;

/// Credential the state machine asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialPrompt {
    /// Phone number in international format
    PhoneNumber,
    /// Login email address
    EmailAddress,
    /// Code sent to the login email
    EmailCode,
    /// Login code
    Code,
    /// Two-step verification password
    Password,
    /// First name for a new account
    FirstName,
    /// Last name for a new account
    LastName,
}

impl fmt::Display for CredentialPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CredentialPrompt::PhoneNumber => "Enter phone number",
            CredentialPrompt::EmailAddress => "Enter email address",
            CredentialPrompt::EmailCode => "Enter email code",
            CredentialPrompt::Code => "Enter login code",
            CredentialPrompt::Password => "Enter password",
            CredentialPrompt::FirstName => "Enter first name",
            CredentialPrompt::LastName => "Enter last name",
        };
        f.write_str(text)
    }
}

/// Synchronous source of credentials
pub trait CredentialSource: Send + Sync {
    /// Block until the answer to `prompt` is available
    fn prompt_text(&self, prompt: CredentialPrompt) -> String;
}

/// Session flags shared between the state machine and the driver
#[derive(Debug, Default)]
pub struct SessionFlags {
    authorized: AtomicBool,
    needs_restart: AtomicBool,
}

impl SessionFlags {
    /// Create cleared flags
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is authorized
    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    /// Set authorized, returning the previous value
    pub fn mark_authorized(&self) -> bool {
        self.authorized.swap(true, Ordering::SeqCst)
    }

    /// Clear authorized
    pub fn mark_unauthorized(&self) {
        self.authorized.store(false, Ordering::SeqCst);
    }

    /// Whether the transport session must be recreated
    pub fn needs_restart(&self) -> bool {
        self.needs_restart.load(Ordering::SeqCst)
    }

    /// Ask the driver to recreate the transport session
    pub fn request_restart(&self) {
        self.needs_restart.store(true, Ordering::SeqCst);
    }

    /// Clear the restart request
    pub fn clear_restart(&self) {
        self.needs_restart.store(false, Ordering::SeqCst);
    }
}

/// Drives login from authorization-state pushes
pub struct AuthStateMachine {
    me: Weak<AuthStateMachine>,
    dispatcher: Weak<Dispatcher>,
    credentials: Arc<dyn CredentialSource>,
    parameters: SessionParameters,
    flags: Arc<SessionFlags>,
    events: Arc<dyn SessionEventHandler>,
    state: watch::Sender<Option<AuthorizationState>>,
    generation: AtomicU64,
}

impl AuthStateMachine {
    /// Create the state machine and register it as a push handler
    pub fn install(
        dispatcher: &Arc<Dispatcher>,
        credentials: Arc<dyn CredentialSource>,
        parameters: SessionParameters,
        flags: Arc<SessionFlags>,
        events: Arc<dyn SessionEventHandler>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(None);
        let machine = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            dispatcher: Arc::downgrade(dispatcher),
            credentials,
            parameters,
            flags,
            events,
            state,
            generation: AtomicU64::new(0),
        });
        dispatcher.register_push_handler(machine.clone());
        machine
    }

    /// Current authorization state, if any push has arrived
    pub fn current(&self) -> Option<AuthorizationState> {
        self.state.borrow().clone()
    }

    /// Watch authorization state changes
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthorizationState>> {
        self.state.subscribe()
    }

    /// Current authentication generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Shared session flags
    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    fn apply(&self, state: AuthorizationState) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Authorization state {} (generation {})", state.label(), generation);
        self.state.send_replace(Some(state.clone()));
        self.events.notify_state_changed(&state);
        self.enter(&state, generation);
    }

    fn enter(&self, state: &AuthorizationState, generation: u64) {
        match state {
            AuthorizationState::AwaitingParameters => {
                self.send_guarded(Request::SetTdlibParameters(self.parameters.clone()), generation);
            }
            AuthorizationState::AwaitingPhoneNumber => {
                let phone_number = self.credentials.prompt_text(CredentialPrompt::PhoneNumber);
                self.send_guarded(Request::SetAuthenticationPhoneNumber { phone_number }, generation);
            }
            AuthorizationState::AwaitingEmailAddress => {
                let email_address = self.credentials.prompt_text(CredentialPrompt::EmailAddress);
                self.send_guarded(Request::SetAuthenticationEmailAddress { email_address }, generation);
            }
            AuthorizationState::AwaitingEmailCode => {
                let code = self.credentials.prompt_text(CredentialPrompt::EmailCode);
                self.send_guarded(Request::CheckAuthenticationEmailCode { code }, generation);
            }
            AuthorizationState::AwaitingCode => {
                let code = self.credentials.prompt_text(CredentialPrompt::Code);
                self.send_guarded(Request::CheckAuthenticationCode { code }, generation);
            }
            AuthorizationState::AwaitingPassword => {
                let password = self.credentials.prompt_text(CredentialPrompt::Password);
                self.send_guarded(Request::CheckAuthenticationPassword { password }, generation);
            }
            AuthorizationState::AwaitingRegistration => {
                let first_name = self.credentials.prompt_text(CredentialPrompt::FirstName);
                let last_name = self.credentials.prompt_text(CredentialPrompt::LastName);
                self.send_guarded(Request::RegisterUser { first_name, last_name }, generation);
            }
            AuthorizationState::AwaitingOtherDeviceConfirmation { link } => {
                info!("Confirm this login on another device: {}", link);
            }
            AuthorizationState::Ready => {
                if !self.flags.mark_authorized() {
                    info!("Session authorized");
                    self.events.notify_authorized();
                } else {
                    debug!("Duplicate ready state ignored");
                }
            }
            AuthorizationState::LoggingOut => {
                self.flags.mark_unauthorized();
                info!("Logging out");
            }
            AuthorizationState::Closing => {
                info!("Session closing");
            }
            AuthorizationState::Closed => {
                self.flags.mark_unauthorized();
                self.flags.request_restart();
                warn!("Session closed, restart requested");
            }
        }
    }

    fn send_guarded(&self, request: Request, generation: u64) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            warn!("Dispatcher gone, dropping {}", request.name());
            return;
        };
        let name = request.name();
        let me = self.me.clone();
        let sent = dispatcher.send_with(request, move |object| {
            if let Some(machine) = me.upgrade() {
                machine.on_reply(generation, name, object);
            }
        });
        if let Err(e) = sent {
            error!("Failed to send {}: {}", name, e);
        }
    }

    fn on_reply(&self, generation: u64, name: &'static str, object: Object) {
        let current = self.generation();
        if generation != current {
            debug!(
                "Stale {} reply for generation {} (current {}), ignoring",
                name, generation, current
            );
            return;
        }
        let Object::Error(remote) = object else {
            return;
        };
        warn!("{} rejected: {}", name, remote);
        if let Some(state) = self.current() {
            self.enter(&state, generation);
        }
    }
}

impl PushHandler for AuthStateMachine {
    fn on_push(&self, event: &PushEvent) {
        match event {
            PushEvent::AuthorizationState(state) => self.apply(state.clone()),
            PushEvent::NewMessage(_) | PushEvent::Other(_) => {}
        }
    }
}

impl fmt::Debug for AuthStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStateMachine")
            .field("state", &self.current())
            .field("generation", &self.generation())
            .field("flags", &self.flags)
            .finish()
    }
}
