//! JSON-lines bridge to an external platform client process.
//!
//! Each session is one TCP connection to the bridge. A writer task drains an
//! unbounded queue of encoded requests; a reader task decodes one frame per
//! line and forwards it to the session's inbound queue. Synchronous callers
//! (the driver thread) wait on that queue through the runtime handle.

use dashmap::DashMap;
use snipe_wire::{decode_frame, encode_request, AuthorizationState, Frame, Object, Request};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{SessionHandle, Transport, TransportError};

/// Bridge transport settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the bridge process
    pub addr: SocketAddr,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Maximum size of one inbound line
    pub max_line: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7441)),
            connect_timeout: Duration::from_secs(5),
            max_line: snipe_wire::DEFAULT_MAX_LINE,
        }
    }
}

struct BridgeSession {
    outbound: mpsc::UnboundedSender<bytes::Bytes>,
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Transport speaking newline-delimited JSON over TCP
pub struct BridgeTransport {
    config: BridgeConfig,
    runtime: Handle,
    sessions: DashMap<SessionHandle, BridgeSession>,
    next_handle: AtomicU64,
}

impl BridgeTransport {
    /// Create a bridge transport driven by `runtime`
    pub fn new(config: BridgeConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            sessions: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.config.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TransportError::Connect(e)),
            Err(_) => Err(TransportError::Connect(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", self.config.addr),
            ))),
        }
    }
}

impl Transport for BridgeTransport {
    fn create_session(&self) -> Result<SessionHandle, TransportError> {
        let stream = self.runtime.block_on(self.connect())?;
        stream.set_nodelay(true).map_err(TransportError::Connect)?;
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let (read_half, mut write_half) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<bytes::Bytes>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();

        let writer = self.runtime.spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if let Err(e) = write_half.write_all(&line).await {
                    error!("Bridge write failed on {}: {}", handle, e);
                    break;
                }
            }
            debug!("Bridge writer for {} finished", handle);
        });

        let max_line = self.config.max_line;
        let reader = self.runtime.spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = Vec::with_capacity(4096);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => {
                        warn!("Bridge closed the connection for {}", handle);
                        break;
                    }
                    Ok(_) => match decode_frame(&line, max_line) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable bridge frame on {}: {}", handle, e),
                    },
                    Err(e) => {
                        error!("Bridge read failed on {}: {}", handle, e);
                        break;
                    }
                }
            }
            // A lost connection is reported as a closed session so the driver reconnects
            let closed = Frame::push(Object::UpdateAuthorizationState {
                authorization_state: AuthorizationState::Closed,
            });
            let _ = inbound_tx.send(closed);
        });

        self.sessions.insert(
            handle,
            BridgeSession {
                outbound: outbound_tx,
                inbound: Mutex::new(inbound_rx),
                tasks: vec![writer, reader],
            },
        );
        info!("Bridge session {} connected to {}", handle, self.config.addr);
        Ok(handle)
    }

    fn send(&self, session: SessionHandle, id: u64, request: Request) -> Result<(), TransportError> {
        let line = encode_request(id, &request)?;
        let entry = self
            .sessions
            .get(&session)
            .ok_or(TransportError::UnknownSession(session))?;
        entry.outbound.send(line).map_err(|_| TransportError::Closed)
    }

    fn receive(&self, session: SessionHandle, timeout: Duration) -> Option<Frame> {
        let entry = self.sessions.get(&session)?;
        self.runtime.block_on(async {
            let mut inbound = entry.inbound.lock().await;
            tokio::time::timeout(timeout, inbound.recv()).await.ok().flatten()
        })
    }

    fn destroy_session(&self, session: SessionHandle) {
        if let Some((_, bridge_session)) = self.sessions.remove(&session) {
            for task in bridge_session.tasks {
                task.abort();
            }
            info!("Bridge session {} destroyed", session);
        }
    }
}
