//! Connection state and the application-facing handle.
//!
//! A [`Connection`] is a cheap-clone handle over state shared with the
//! reactor. After submission (`connect_to_grid` / `connect_to_peer`) all
//! protocol state lives in the reactor's driver task; the handle only
//! observes status, reads the captured error and posts commands.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

use crate::core::{ErrorKind, OsdgError, MSG_CALL_REMOTE};
use crate::crypto::Keypair;
use crate::protocol::control::{self, ConnectToPeer, PeerReply};

use super::reactor::Command;

/// What the remote end of a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Not yet submitted.
    Unspecified,
    /// A grid (rendezvous) server.
    Grid,
    /// A device reached through a forwarded tunnel.
    Peer,
}

/// Connection lifecycle status.
///
/// Advances only forward; `Failed` and `Closed` are reachable from
/// anywhere and `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket.
    Closed,
    /// TCP connect in progress.
    Connecting,
    /// Waiting for the forwarder to splice the tunnel.
    Forwarding,
    /// CurveCP exchange in progress.
    Handshaking,
    /// Handshake complete; data flows.
    Connected,
    /// A failure was captured; see the error accessors.
    Failed,
}

impl ConnectionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Connecting => 1,
            Self::Forwarding => 2,
            Self::Handshaking => 3,
            Self::Connected => 4,
            Self::Failed => 5,
        }
    }
}

/// A host/port pair to try connecting to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Status observer, invoked on the reactor thread for every transition.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Upper-layer payload sink for decrypted MESG bodies.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked once with the grid's answer to a peer request.
pub type PeerCallback = Box<dyn FnOnce(PeerReply) + Send>;

#[derive(Default)]
struct PeerTable {
    next_id: u32,
    pending: HashMap<u32, PeerCallback>,
}

/// State shared between the application handle and the reactor.
pub(crate) struct Shared {
    uid: u32,
    identity: Keypair,
    buffer_size: usize,
    mode: Mutex<Mode>,
    status: watch::Sender<ConnectionStatus>,
    /// Set when teardown moves the status to `Closed`; lets waiters tell a
    /// post-teardown `Closed` apart from the initial one even when the
    /// status watch coalesced the transitions in between.
    torn_down: AtomicBool,
    error: Mutex<(ErrorKind, i32)>,
    on_status: Mutex<Option<StatusCallback>>,
    on_data: Mutex<Option<DataCallback>>,
    peers: Mutex<PeerTable>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    pub(crate) fn new(
        uid: u32,
        identity: Keypair,
        buffer_size: usize,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        Self {
            uid,
            identity,
            buffer_size,
            mode: Mutex::new(Mode::Unspecified),
            status,
            torn_down: AtomicBool::new(false),
            error: Mutex::new((ErrorKind::NoError, 0)),
            on_status: Mutex::new(None),
            on_data: Mutex::new(None),
            peers: Mutex::new(PeerTable::default()),
            commands,
        }
    }

    pub(crate) fn uid(&self) -> u32 {
        self.uid
    }

    pub(crate) fn identity(&self) -> &Keypair {
        &self.identity
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn mode(&self) -> Mode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Advance the status, enforcing forward-only movement, and notify the
    /// status callback.
    pub(crate) fn set_status(&self, new: ConnectionStatus) {
        let current = self.status();
        let allowed = match current {
            ConnectionStatus::Failed => false,
            ConnectionStatus::Closed => new == ConnectionStatus::Connecting,
            _ => {
                new == ConnectionStatus::Failed
                    || new == ConnectionStatus::Closed
                    || new.rank() > current.rank()
            }
        };
        if !allowed {
            return;
        }

        trace!(conn = self.uid, ?current, status = ?new, "status change");
        if new == ConnectionStatus::Closed {
            self.torn_down.store(true, Ordering::Release);
        }
        self.status.send_replace(new);

        let callback = self
            .on_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(new);
        }
    }

    /// Capture a failure and transition to `Failed`. The first captured
    /// error wins.
    pub(crate) fn fail(&self, error: &OsdgError) {
        {
            let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
            if slot.0 == ErrorKind::NoError {
                *slot = (error.kind(), error.code());
            }
        }
        self.set_status(ConnectionStatus::Failed);
    }

    pub(crate) fn error(&self) -> (ErrorKind, i32) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand a decrypted payload to the upper layer.
    pub(crate) fn deliver(&self, body: &[u8]) {
        let callback = self
            .on_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(callback) => callback(body),
            None => trace!(conn = self.uid, len = body.len(), "payload dropped, no data callback"),
        }
    }

    /// Route a peer reply to the outstanding request it answers.
    pub(crate) fn dispatch_peer_reply(&self, reply: PeerReply) {
        let callback = self
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .remove(&reply.id);
        match callback {
            Some(callback) => callback(reply),
            None => warn!(
                conn = self.uid,
                peer = reply.id,
                "peer reply for nonexistent peer"
            ),
        }
    }
}

/// Handle to one grid or peer connection.
///
/// Clones address the same connection. Created through
/// [`EventLoop::create_connection`](super::EventLoop::create_connection).
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Registry uid of this connection.
    pub fn uid(&self) -> u32 {
        self.shared.uid
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// What this connection talks to.
    pub fn mode(&self) -> Mode {
        self.shared.mode()
    }

    /// Connect to a grid, trying `endpoints` in order, and wait for the
    /// handshake to finish.
    pub async fn connect_to_grid(&self, endpoints: &[Endpoint]) -> Result<(), OsdgError> {
        self.submit(Mode::Grid, endpoints, None)?;
        self.wait_ready().await
    }

    /// Connect to a peer through a forwarder, consuming a tunnel id
    /// obtained from a [`PeerReply`], and wait for the handshake to finish.
    pub async fn connect_to_peer(
        &self,
        endpoints: &[Endpoint],
        tunnel_id: Vec<u8>,
    ) -> Result<(), OsdgError> {
        self.submit(Mode::Peer, endpoints, Some(tunnel_id))?;
        self.wait_ready().await
    }

    fn submit(
        &self,
        mode: Mode,
        endpoints: &[Endpoint],
        tunnel: Option<Vec<u8>>,
    ) -> Result<(), OsdgError> {
        {
            let mut slot = self.shared.mode.lock().unwrap_or_else(|e| e.into_inner());
            if *slot != Mode::Unspecified {
                return Err(OsdgError::Protocol("connection already submitted".into()));
            }
            *slot = mode;
        }
        self.shared
            .commands
            .send(Command::Connect {
                shared: Arc::clone(&self.shared),
                endpoints: endpoints.to_vec(),
                tunnel,
            })
            .map_err(|_| OsdgError::System("event loop is gone".into()))
    }

    /// Wait until the connection is established.
    ///
    /// Resolves with the captured error when the connection fails or is
    /// closed before completing the handshake.
    pub async fn wait_ready(&self) -> Result<(), OsdgError> {
        let mut status = self.shared.subscribe_status();
        loop {
            let current = *status.borrow_and_update();
            match current {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Failed => {
                    let (kind, code) = self.shared.error();
                    return Err(OsdgError::from_captured(kind, code));
                }
                ConnectionStatus::Closed if self.shared.torn_down.load(Ordering::Acquire) => {
                    return Err(OsdgError::NotConnected)
                }
                _ => {}
            }
            if status.changed().await.is_err() {
                return Err(OsdgError::NotConnected);
            }
        }
    }

    /// Send application bytes over the encrypted session.
    ///
    /// Valid only while `Connected`; bytes submitted from one thread go
    /// out in submission order.
    pub fn send(&self, data: &[u8]) -> Result<(), OsdgError> {
        if self.status() != ConnectionStatus::Connected {
            return Err(OsdgError::NotConnected);
        }
        self.shared
            .commands
            .send(Command::Send {
                uid: self.shared.uid,
                body: data.to_vec(),
            })
            .map_err(|_| OsdgError::System("event loop is gone".into()))
    }

    /// Ask the grid to open a path to a device.
    ///
    /// Allocates a peer id, sends `ConnectToPeer` and invokes `callback`
    /// (on the reactor thread) when the matching [`PeerReply`] arrives.
    /// Returns the allocated id.
    pub fn request_peer(
        &self,
        peer_id: &[u8],
        protocol: &str,
        callback: impl FnOnce(PeerReply) + Send + 'static,
    ) -> Result<u32, OsdgError> {
        if self.mode() != Mode::Grid {
            return Err(OsdgError::Protocol(
                "peer requests need a grid connection".into(),
            ));
        }
        if self.status() != ConnectionStatus::Connected {
            return Err(OsdgError::NotConnected);
        }

        let id = {
            let mut peers = self.shared.peers.lock().unwrap_or_else(|e| e.into_inner());
            peers.next_id += 1;
            let id = peers.next_id;
            peers.pending.insert(id, Box::new(callback));
            id
        };

        let request = ConnectToPeer {
            id,
            peer_id: peer_id.to_vec(),
            protocol: protocol.to_string(),
        };
        let body = control::control_body(MSG_CALL_REMOTE, &request);
        let sent = self.shared.commands.send(Command::Send {
            uid: self.shared.uid,
            body,
        });
        if sent.is_err() {
            self.shared
                .peers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pending
                .remove(&id);
            return Err(OsdgError::System("event loop is gone".into()));
        }
        Ok(id)
    }

    /// Install the status observer. Replaces any previous one.
    pub fn set_status_callback(&self, callback: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        *self
            .shared
            .on_status
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Install the upper-layer payload sink. Replaces any previous one.
    ///
    /// Invoked on the reactor thread; handlers must not block, but may
    /// post commands (e.g. [`Connection::send`] on another connection).
    pub fn set_data_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self
            .shared
            .on_data
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Kind of the captured failure, `NoError` when none.
    pub fn error_kind(&self) -> ErrorKind {
        self.shared.error().0
    }

    /// OS error code of the captured failure, 0 when none applies.
    pub fn error_code(&self) -> i32 {
        self.shared.error().1
    }

    /// Post teardown. The reactor closes the socket and the status moves
    /// to `Closed` (or stays `Failed`).
    pub fn close(&self) {
        let _ = self.shared.commands.send(Command::Close {
            uid: self.shared.uid,
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uid", &self.shared.uid)
            .field("mode", &self.mode())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_BUFFER_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared() -> Arc<Shared> {
        let (commands, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        Arc::new(Shared::new(
            1,
            Keypair::generate(),
            DEFAULT_BUFFER_SIZE,
            commands,
        ))
    }

    #[test]
    fn test_status_advances_forward_only() {
        let conn = shared();

        conn.set_status(ConnectionStatus::Connecting);
        conn.set_status(ConnectionStatus::Handshaking);
        assert_eq!(conn.status(), ConnectionStatus::Handshaking);

        // No regression.
        conn.set_status(ConnectionStatus::Connecting);
        assert_eq!(conn.status(), ConnectionStatus::Handshaking);

        conn.set_status(ConnectionStatus::Connected);
        assert_eq!(conn.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_failed_is_terminal() {
        let conn = shared();
        conn.set_status(ConnectionStatus::Connecting);
        conn.fail(&OsdgError::Decryption);

        assert_eq!(conn.status(), ConnectionStatus::Failed);
        conn.set_status(ConnectionStatus::Closed);
        assert_eq!(conn.status(), ConnectionStatus::Failed);
    }

    #[test]
    fn test_first_error_wins() {
        let conn = shared();
        conn.fail(&OsdgError::PeerTimeout);
        conn.fail(&OsdgError::Decryption);

        assert_eq!(conn.error().0, ErrorKind::PeerTimeout);
    }

    #[test]
    fn test_status_callback_fires_per_transition() {
        let conn = shared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        *conn.on_status.lock().unwrap() = Some(Arc::new(move |status| {
            sink.lock().unwrap().push(status);
        }));

        conn.set_status(ConnectionStatus::Connecting);
        conn.set_status(ConnectionStatus::Connecting); // no-op
        conn.set_status(ConnectionStatus::Handshaking);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Handshaking]
        );
    }

    #[test]
    fn test_peer_reply_dispatch_consumes_entry() {
        let conn = shared();
        let hits = Arc::new(AtomicUsize::new(0));

        let hit = Arc::clone(&hits);
        conn.peers.lock().unwrap().pending.insert(
            9,
            Box::new(move |reply: PeerReply| {
                assert_eq!(reply.id, 9);
                hit.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let reply = PeerReply {
            id: 9,
            result: 0,
            tunnel_id: vec![0xAA],
        };
        conn.dispatch_peer_reply(reply.clone());
        conn.dispatch_peer_reply(reply); // unknown now; logged, not invoked

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_requires_connected() {
        let conn = Connection::new(shared());
        let err = conn.send(b"data").unwrap_err();
        assert!(matches!(err, OsdgError::NotConnected));
    }

    #[test]
    fn test_double_submit_is_rejected() {
        let conn = Connection::new(shared());
        conn.submit(Mode::Grid, &[Endpoint::new("grid.example", 443)], None)
            .unwrap();

        let err = conn
            .submit(Mode::Grid, &[Endpoint::new("grid.example", 443)], None)
            .unwrap_err();
        assert!(matches!(err, OsdgError::Protocol(_)));
    }
}
