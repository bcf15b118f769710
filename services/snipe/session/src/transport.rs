//! Transport abstraction for the remote platform client.
//!
//! The platform client is an opaque collaborator: it creates sessions,
//! accepts requests tagged with a correlation id, and yields inbound frames
//! with a bounded wait. Concurrent `send` calls from many threads must be
//! safe while a single thread calls `receive`.

use snipe_wire::{Frame, Request, WireError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque handle of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Session handle is not (or no longer) live
    #[error("unknown session {0}")]
    UnknownSession(SessionHandle),
    /// Session was closed by the remote side
    #[error("session closed")]
    Closed,
    /// Could not establish a session
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    /// Request could not be encoded
    #[error("encode failed: {0}")]
    Encode(#[from] WireError),
}

/// Remote platform client
pub trait Transport: Send + Sync {
    /// Create a fresh session
    fn create_session(&self) -> Result<SessionHandle, TransportError>;

    /// Send a request tagged with `id`
    fn send(&self, session: SessionHandle, id: u64, request: Request) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next inbound frame
    fn receive(&self, session: SessionHandle, timeout: Duration) -> Option<Frame>;

    /// Tear down a session; unknown handles are ignored
    fn destroy_session(&self, session: SessionHandle);
}

pub mod memory {
    //! In-memory transport for development and testing.
    //!
    //! Records every request it is handed and replays frames queued with
    //! [`MemoryTransport::push_frame`].

    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
    use std::time::Instant;
    use tracing::debug;

    /// A request captured by [`MemoryTransport`]
    #[derive(Debug, Clone)]
    pub struct SentRequest {
        /// Session it was sent on
        pub session: SessionHandle,
        /// Correlation id
        pub id: u64,
        /// Request payload
        pub request: Request,
        /// When it was handed to the transport
        pub at: Instant,
    }

    type SendHook = Box<dyn Fn(&SentRequest) + Send + Sync>;

    #[derive(Default)]
    struct MemoryState {
        next_handle: u64,
        live: HashSet<SessionHandle>,
        created: usize,
        destroyed: usize,
        failing_creates: usize,
        sent: Vec<SentRequest>,
        inbound: VecDeque<Frame>,
    }

    /// Scripted in-memory transport
    #[derive(Default)]
    pub struct MemoryTransport {
        state: Mutex<MemoryState>,
        arrived: Condvar,
        hook: Mutex<Option<SendHook>>,
    }

    impl MemoryTransport {
        /// Create an empty transport
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, MemoryState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Queue an inbound frame
        pub fn push_frame(&self, frame: Frame) {
            self.lock().inbound.push_back(frame);
            self.arrived.notify_one();
        }

        /// Make the next `count` session creations fail
        pub fn fail_next_creates(&self, count: usize) {
            self.lock().failing_creates = count;
        }

        /// Run `hook` for every request at the moment it is sent
        pub fn set_send_hook<F>(&self, hook: F)
        where
            F: Fn(&SentRequest) + Send + Sync + 'static,
        {
            *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        }

        /// Every request sent so far
        pub fn sent(&self) -> Vec<SentRequest> {
            self.lock().sent.clone()
        }

        /// Requests sent with a given correlation id
        pub fn sent_with_id(&self, id: u64) -> Vec<SentRequest> {
            self.lock().sent.iter().filter(|s| s.id == id).cloned().collect()
        }

        /// Number of sessions created
        pub fn created(&self) -> usize {
            self.lock().created
        }

        /// Number of sessions destroyed
        pub fn destroyed(&self) -> usize {
            self.lock().destroyed
        }

        /// Whether `session` is live
        pub fn is_live(&self, session: SessionHandle) -> bool {
            self.lock().live.contains(&session)
        }
    }

    impl Transport for MemoryTransport {
        fn create_session(&self) -> Result<SessionHandle, TransportError> {
            let mut state = self.lock();
            if state.failing_creates > 0 {
                state.failing_creates -= 1;
                return Err(TransportError::Connect(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "scripted create failure",
                )));
            }
            state.next_handle += 1;
            let handle = SessionHandle(state.next_handle);
            state.live.insert(handle);
            state.created += 1;
            debug!("Memory transport created {}", handle);
            Ok(handle)
        }

        fn send(&self, session: SessionHandle, id: u64, request: Request) -> Result<(), TransportError> {
            let record = SentRequest {
                session,
                id,
                request,
                at: Instant::now(),
            };
            {
                let mut state = self.lock();
                if !state.live.contains(&session) {
                    return Err(TransportError::UnknownSession(session));
                }
                state.sent.push(record.clone());
            }
            if let Some(hook) = self.hook.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                hook(&record);
            }
            Ok(())
        }

        fn receive(&self, session: SessionHandle, timeout: Duration) -> Option<Frame> {
            let deadline = Instant::now() + timeout;
            let mut state = self.lock();
            loop {
                if !state.live.contains(&session) {
                    return None;
                }
                if let Some(frame) = state.inbound.pop_front() {
                    return Some(frame);
                }
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                state = self
                    .arrived
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        fn destroy_session(&self, session: SessionHandle) {
            let mut state = self.lock();
            if state.live.remove(&session) {
                state.destroyed += 1;
                debug!("Memory transport destroyed {}", session);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use snipe_wire::Object;

        #[test]
        fn test_memory_transport_lifecycle() {
            let transport = MemoryTransport::new();
            let session = transport.create_session().unwrap();
            assert!(transport.is_live(session));

            transport.send(session, 1, Request::GetMe).unwrap();
            assert_eq!(transport.sent_with_id(1).len(), 1);

            transport.push_frame(Frame::new(1, Object::Ok));
            let frame = transport.receive(session, Duration::from_millis(1)).unwrap();
            assert_eq!(frame.id, 1);
            assert!(transport.receive(session, Duration::from_millis(1)).is_none());

            transport.destroy_session(session);
            assert!(!transport.is_live(session));
            assert!(matches!(
                transport.send(session, 2, Request::GetMe),
                Err(TransportError::UnknownSession(_))
            ));
            assert_eq!((transport.created(), transport.destroyed()), (1, 1));
        }

        #[test]
        fn test_scripted_create_failure() {
            let transport = MemoryTransport::new();
            transport.fail_next_creates(1);
            assert!(transport.create_session().is_err());
            assert!(transport.create_session().is_ok());
        }
    }
}
