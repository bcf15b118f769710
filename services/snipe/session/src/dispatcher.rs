//! Request dispatch and inbound frame routing.
//!
//! The dispatcher is the single path to the transport. It allocates
//! monotonic correlation ids for one-shot requests, forwards pinned
//! requests for polling loops untouched, and routes every inbound frame to
//! exactly one of: the push handlers, a sentinel fast-path handler, or the
//! correlation table.

use dashmap::DashMap;
use snipe_wire::{Frame, IdSpace, Object, PushEvent, Request, Sentinel, MONOTONIC_CEILING};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::correlation::{CorrelationTable, ReplyCallback};
use crate::transport::{SessionHandle, Transport, TransportError};

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No transport session is attached
    #[error("no transport session attached")]
    Detached,
    /// Monotonic id space is exhausted
    #[error("correlation id space exhausted")]
    IdSpaceExhausted,
    /// Id already has a live table entry
    #[error("correlation id {0} already registered")]
    DuplicateId(u64),
    /// Transport rejected the request
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// Entry was discarded before a reply arrived
    #[error("request canceled before a reply arrived")]
    Canceled,
}

/// Receives unsolicited push events
pub trait PushHandler: Send + Sync {
    /// Handle a push event
    fn on_push(&self, event: &PushEvent);
}

/// Receives replies addressed to a sentinel id
pub trait SentinelHandler: Send + Sync {
    /// Handle a reply object
    fn on_reply(&self, object: Object);
}

/// Where an inbound frame went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handed to push handlers
    Push,
    /// Handed to a sentinel handler
    FastPath(Sentinel),
    /// Sentinel reply with no registered handler
    Unhandled(Sentinel),
    /// Table callback invoked
    Delivered(u64),
    /// No live registration for the id
    Dropped(u64),
}

/// Dispatch counters
#[derive(Debug, Default)]
struct DispatchCounters {
    sent: AtomicU64,
    pinned: AtomicU64,
    pushes: AtomicU64,
    fast_path: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// One-shot requests sent
    pub sent: u64,
    /// Pinned requests sent
    pub pinned: u64,
    /// Push frames routed
    pub pushes: u64,
    /// Sentinel replies routed
    pub fast_path: u64,
    /// Table callbacks invoked
    pub delivered: u64,
    /// Replies dropped for lack of a registration
    pub dropped: u64,
    /// Live table entries
    pub pending: usize,
}

/// Sends requests and routes inbound frames
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    /// Attached session handle, `0` when detached
    session: AtomicU64,
    next_id: AtomicU64,
    table: CorrelationTable,
    push_handlers: RwLock<Vec<Arc<dyn PushHandler>>>,
    sentinel_handlers: DashMap<Sentinel, Arc<dyn SentinelHandler>>,
    counters: DispatchCounters,
}

impl Dispatcher {
    /// Create a detached dispatcher over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            table: CorrelationTable::new(),
            push_handlers: RwLock::new(Vec::new()),
            sentinel_handlers: DashMap::new(),
            counters: DispatchCounters::default(),
        }
    }

    /// Bind to a transport session
    pub fn attach(&self, session: SessionHandle) {
        self.session.store(session.0, Ordering::SeqCst);
        debug!("Dispatcher attached to {}", session);
    }

    /// Unbind from the current session, returning it
    pub fn detach(&self) -> Option<SessionHandle> {
        match self.session.swap(0, Ordering::SeqCst) {
            0 => None,
            raw => Some(SessionHandle(raw)),
        }
    }

    /// Currently attached session
    pub fn session(&self) -> Option<SessionHandle> {
        match self.session.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(SessionHandle(raw)),
        }
    }

    /// Whether a session is attached
    pub fn is_attached(&self) -> bool {
        self.session().is_some()
    }

    /// Discard every pending table entry without invoking it
    pub fn reset(&self) -> usize {
        let discarded = self.table.clear();
        if discarded > 0 {
            warn!("Discarded {} pending requests", discarded);
        }
        discarded
    }

    /// Register a push handler; handlers run in registration order
    pub fn register_push_handler(&self, handler: Arc<dyn PushHandler>) {
        self.push_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Register the fast-path handler for a sentinel, replacing any previous one
    pub fn register_sentinel_handler(&self, sentinel: Sentinel, handler: Arc<dyn SentinelHandler>) {
        if self.sentinel_handlers.insert(sentinel, handler).is_some() {
            warn!("Replaced sentinel handler for {}", sentinel);
        }
    }

    fn allocate_id(&self) -> Result<u64, DispatchError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if id >= MONOTONIC_CEILING {
            return Err(DispatchError::IdSpaceExhausted);
        }
        Ok(id)
    }

    /// Send a one-shot request, registering `callback` for its reply
    ///
    /// Without a callback the id is still allocated but nothing is recorded,
    /// so the reply is dropped on arrival.
    pub fn send(&self, request: Request, callback: Option<ReplyCallback>) -> Result<u64, DispatchError> {
        let session = self.session().ok_or(DispatchError::Detached)?;
        let id = self.allocate_id()?;
        let name = request.name();

        // Register before sending: the reply may arrive before send returns
        let registered = callback.is_some();
        if let Some(callback) = callback {
            self.table.insert(id, callback)?;
        }

        if let Err(e) = self.transport.send(session, id, request) {
            if registered {
                drop(self.table.take(id));
            }
            return Err(e.into());
        }

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        trace!("Sent {} with id {} on {}", name, id, session);
        Ok(id)
    }

    /// Send a one-shot request with a closure callback
    pub fn send_with<F>(&self, request: Request, callback: F) -> Result<u64, DispatchError>
    where
        F: FnOnce(Object) + Send + 'static,
    {
        self.send(request, Some(Box::new(callback)))
    }

    /// Send a one-shot request and wait for its reply
    pub async fn call(&self, request: Request) -> Result<Object, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.send_with(request, move |object| {
            let _ = tx.send(object);
        })?;
        rx.await.map_err(|_| DispatchError::Canceled)
    }

    /// Send a request pinned to a sentinel id, bypassing the table
    pub fn send_pinned(&self, request: Request, sentinel: Sentinel) -> Result<(), DispatchError> {
        let session = self.session().ok_or(DispatchError::Detached)?;
        self.transport.send(session, sentinel.id(), request)?;
        self.counters.pinned.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Route one inbound frame
    pub fn on_frame(&self, frame: Frame) -> Routed {
        match IdSpace::classify(frame.id) {
            IdSpace::Push => {
                self.counters.pushes.fetch_add(1, Ordering::Relaxed);
                self.route_push(frame.object.into_push());
                Routed::Push
            }
            IdSpace::Sentinel(sentinel) => {
                let handler = self.sentinel_handlers.get(&sentinel).map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => {
                        self.counters.fast_path.fetch_add(1, Ordering::Relaxed);
                        handler.on_reply(frame.object);
                        Routed::FastPath(sentinel)
                    }
                    None => {
                        debug!("No handler for {} reply, dropping", sentinel);
                        Routed::Unhandled(sentinel)
                    }
                }
            }
            IdSpace::Correlated(id) => match self.table.take(id) {
                Some(callback) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    callback(frame.object);
                    Routed::Delivered(id)
                }
                None => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("No pending request for id {} ({}), dropping", id, frame.object.kind());
                    Routed::Dropped(id)
                }
            },
        }
    }

    fn route_push(&self, event: PushEvent) {
        match &event {
            PushEvent::AuthorizationState(state) => {
                debug!("Push: authorization state {}", state.label());
            }
            PushEvent::NewMessage(message) => {
                trace!("Push: new message in chat {}", message.chat_id);
            }
            PushEvent::Other(kind) => {
                trace!("Push: ignoring {}", kind);
                return;
            }
        }

        let handlers: Vec<Arc<dyn PushHandler>> = self
            .push_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.on_push(&event);
        }
    }

    /// Snapshot of dispatch counters
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            pinned: self.counters.pinned.load(Ordering::Relaxed),
            pushes: self.counters.pushes.load(Ordering::Relaxed),
            fast_path: self.counters.fast_path.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            pending: self.table.len(),
        }
    }

    /// Number of pending table entries
    pub fn pending(&self) -> usize {
        self.table.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("session", &self.session())
            .field("pending", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use snipe_wire::{AuthorizationState, RemoteError};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn attached() -> (Arc<MemoryTransport>, Dispatcher) {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::new(transport.clone());
        let session = transport.create_session().unwrap();
        dispatcher.attach(session);
        (transport, dispatcher)
    }

    #[derive(Default)]
    struct CountingSentinel(AtomicUsize);

    impl SentinelHandler for CountingSentinel {
        fn on_reply(&self, _object: Object) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingPush(Mutex<Vec<PushEvent>>);

    impl PushHandler for RecordingPush {
        fn on_push(&self, event: &PushEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_monotonic_ids_never_collide() {
        let (transport, dispatcher) = attached();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = dispatcher.send_with(Request::GetMe, |_| {}).unwrap();
            assert!(id > 0 && id < MONOTONIC_CEILING);
            assert!(seen.insert(id), "id {} reused while live", id);
        }
        assert_eq!(dispatcher.pending(), 100);
        assert_eq!(transport.sent().len(), 100);
    }

    #[test]
    fn test_reply_invokes_callback_once() {
        let (_transport, dispatcher) = attached();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = dispatcher
            .send_with(Request::GetMe, move |object| {
                assert_eq!(object, Object::Ok);
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(dispatcher.on_frame(Frame::new(id, Object::Ok)), Routed::Delivered(id));
        // Duplicate delivery of the same id is a stale reply
        assert_eq!(dispatcher.on_frame(Frame::new(id, Object::Ok)), Routed::Dropped(id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_unregistered_reply_is_idempotent_drop() {
        let (_transport, dispatcher) = attached();
        let keep = dispatcher.send_with(Request::GetMe, |_| {}).unwrap();
        let before = dispatcher.stats();

        assert_eq!(dispatcher.on_frame(Frame::new(4242, Object::Ok)), Routed::Dropped(4242));

        let after = dispatcher.stats();
        assert_eq!(after.pending, before.pending);
        assert_eq!(after.delivered, before.delivered);
        assert!(dispatcher.table.contains(keep));
    }

    #[test]
    fn test_fire_and_forget_records_nothing() {
        let (transport, dispatcher) = attached();
        let id = dispatcher
            .send(Request::GetOption { name: "version".into() }, None)
            .unwrap();
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(transport.sent_with_id(id).len(), 1);
        assert_eq!(dispatcher.on_frame(Frame::new(id, Object::Unknown)), Routed::Dropped(id));
    }

    #[test]
    fn test_sentinel_bypasses_table() {
        let (transport, dispatcher) = attached();
        let handler = Arc::new(CountingSentinel::default());
        dispatcher.register_sentinel_handler(Sentinel::UpgradeRace, handler.clone());

        for _ in 0..3 {
            dispatcher
                .send_pinned(Request::upgrade("1", 10), Sentinel::UpgradeRace)
                .unwrap();
        }
        assert_eq!(transport.sent_with_id(Sentinel::UpgradeRace.id()).len(), 3);
        assert_eq!(dispatcher.pending(), 0);

        let reply = Frame::new(
            Sentinel::UpgradeRace.id(),
            Object::Error(RemoteError::new(400, "STARGIFT_UPGRADE_UNAVAILABLE")),
        );
        assert_eq!(dispatcher.on_frame(reply), Routed::FastPath(Sentinel::UpgradeRace));
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);

        let orphan = Frame::new(Sentinel::StatusPoll.id(), Object::Ok);
        assert_eq!(dispatcher.on_frame(orphan), Routed::Unhandled(Sentinel::StatusPoll));
    }

    #[test]
    fn test_push_routing() {
        let (_transport, dispatcher) = attached();
        let push = Arc::new(RecordingPush::default());
        dispatcher.register_push_handler(push.clone());

        let frame = Frame::push(Object::UpdateAuthorizationState {
            authorization_state: AuthorizationState::Ready,
        });
        assert_eq!(dispatcher.on_frame(frame), Routed::Push);
        assert_eq!(dispatcher.on_frame(Frame::push(Object::Unknown)), Routed::Push);

        let events = push.0.lock().unwrap();
        assert_eq!(
            *events,
            vec![PushEvent::AuthorizationState(AuthorizationState::Ready)]
        );
    }

    #[test]
    fn test_detached_and_failed_sends() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::new(transport.clone());
        assert!(matches!(
            dispatcher.send_with(Request::GetMe, |_| {}),
            Err(DispatchError::Detached)
        ));

        let session = transport.create_session().unwrap();
        dispatcher.attach(session);
        transport.destroy_session(session);

        // A rejected send leaves no table entry behind
        assert!(matches!(
            dispatcher.send_with(Request::GetMe, |_| {}),
            Err(DispatchError::Transport(TransportError::UnknownSession(_)))
        ));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_callback_may_send() {
        let (transport, dispatcher) = attached();
        let dispatcher = Arc::new(dispatcher);
        let inner = dispatcher.clone();
        let id = dispatcher
            .send_with(Request::GetMe, move |_| {
                // Reentrant send from inside a callback must not deadlock
                inner.send_with(Request::GetAvailableGifts, |_| {}).unwrap();
            })
            .unwrap();
        dispatcher.on_frame(Frame::new(id, Object::Ok));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[tokio::test]
    async fn test_call_resolves_and_cancels() {
        let (transport, dispatcher) = attached();
        let dispatcher = Arc::new(dispatcher);

        let caller = dispatcher.clone();
        let pending = tokio::spawn(async move { caller.call(Request::GetMe).await });
        while transport.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        let id = transport.sent()[0].id;
        dispatcher.on_frame(Frame::new(id, Object::Ok));
        assert_eq!(pending.await.unwrap().unwrap(), Object::Ok);

        let caller = dispatcher.clone();
        let canceled = tokio::spawn(async move { caller.call(Request::GetMe).await });
        while transport.sent().len() < 2 {
            tokio::task::yield_now().await;
        }
        dispatcher.reset();
        assert!(matches!(canceled.await.unwrap(), Err(DispatchError::Canceled)));
    }
}
