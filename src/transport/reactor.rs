//! The event loop: a single-threaded reactor driving every connection.
//!
//! [`EventLoop::start`] spawns one dedicated OS thread running a
//! current-thread tokio runtime. Connections are driven by tasks spawned
//! on that runtime's `LocalSet`, so all protocol state is mutated on one
//! thread; other threads talk to it exclusively through the command
//! channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{self, LocalSet};
use tracing::{debug, trace, warn};

use crate::core::{OsdgError, KEY_SIZE};
use crate::crypto::Keypair;
use crate::protocol::handshake::{Action, Handshake};
use crate::protocol::packet::FrameReader;

use super::connection::{Connection, ConnectionStatus, Endpoint, Shared};
use super::queue::BufferPool;
use super::registry::Registry;

/// Cross-thread commands accepted by the reactor.
pub(crate) enum Command {
    /// Open a socket for a registered connection and drive it.
    Connect {
        shared: Arc<Shared>,
        endpoints: Vec<Endpoint>,
        tunnel: Option<Vec<u8>>,
    },
    /// Seal and send application bytes on a connection.
    Send { uid: u32, body: Vec<u8> },
    /// Tear one connection down.
    Close { uid: u32 },
    /// Tear everything down and stop the reactor.
    Shutdown,
}

/// Per-connection operations routed from the command dispatcher to the
/// connection's driver task.
enum ConnOp {
    Send(Vec<u8>),
    Close,
}

/// Handle to the reactor thread.
///
/// Process-wide setup and teardown: create one with [`EventLoop::start`],
/// create connections from it, and stop it with [`EventLoop::shutdown`]
/// (or by dropping it).
pub struct EventLoop {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<Registry>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the reactor thread.
    pub fn start() -> Result<Self, OsdgError> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let thread = thread::Builder::new()
            .name("osdg-reactor".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => {
                        let _ = ready_tx.send(Ok(()));
                        runtime
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let local = LocalSet::new();
                local.block_on(&runtime, dispatch(command_rx));
            })
            .map_err(|e| OsdgError::System(format!("reactor thread spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                registry,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(OsdgError::System(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(OsdgError::System("reactor died during bootstrap".into()))
            }
        }
    }

    /// Create a connection owned by this event loop.
    ///
    /// Copies the long-term secret key into the connection and registers
    /// it; the returned handle (and its clones) address it from any
    /// thread.
    pub fn create_connection(&self, secret_key: &[u8; KEY_SIZE], buffer_size: usize) -> Connection {
        let identity = Keypair::from_secret(secret_key);
        let uid = self.registry.next_uid();
        let shared = Arc::new(Shared::new(
            uid,
            identity,
            buffer_size,
            self.commands.clone(),
        ));
        self.registry.insert(uid, Arc::downgrade(&shared));
        Connection::new(shared)
    }

    /// Look a live connection up by its registry uid.
    pub fn find_connection(&self, uid: u32) -> Option<Connection> {
        self.registry.find(uid).map(Connection::new)
    }

    /// Stop the reactor: close every connection, drain the command queue
    /// and join the thread.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Command dispatcher: the reactor main loop.
async fn dispatch(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut drivers: HashMap<u32, (mpsc::UnboundedSender<ConnOp>, task::JoinHandle<()>)> =
        HashMap::new();

    while let Some(command) = commands.recv().await {
        drivers.retain(|_, (_, handle)| !handle.is_finished());
        match command {
            Command::Connect {
                shared,
                endpoints,
                tunnel,
            } => {
                let uid = shared.uid();
                let (op_tx, op_rx) = mpsc::unbounded_channel();
                let handle = task::spawn_local(drive(shared, endpoints, tunnel, op_rx));
                drivers.insert(uid, (op_tx, handle));
            }
            Command::Send { uid, body } => match drivers.get(&uid) {
                Some((ops, _)) => {
                    let _ = ops.send(ConnOp::Send(body));
                }
                None => warn!(conn = uid, "send for inactive connection dropped"),
            },
            Command::Close { uid } => {
                if let Some((ops, _)) = drivers.get(&uid) {
                    let _ = ops.send(ConnOp::Close);
                }
            }
            Command::Shutdown => break,
        }
    }

    // Teardown: ask every driver to close, then wait them out. Commands
    // still queued behind Shutdown die with the channel.
    for (ops, _) in drivers.values() {
        let _ = ops.send(ConnOp::Close);
    }
    for (_, (_, handle)) in drivers {
        let _ = handle.await;
    }
}

/// Driver task for one connection. Owns the socket and the handshake
/// engine; runs on the reactor thread.
async fn drive(
    shared: Arc<Shared>,
    endpoints: Vec<Endpoint>,
    tunnel: Option<Vec<u8>>,
    mut ops: mpsc::UnboundedReceiver<ConnOp>,
) {
    shared.set_status(ConnectionStatus::Connecting);

    let stream = match connect_any(&shared, &endpoints).await {
        Ok(stream) => stream,
        Err(e) => {
            shared.fail(&e);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    let pool = Arc::new(BufferPool::new(shared.buffer_size()));
    let mut reader = FrameReader::new(shared.buffer_size());
    let mut engine = Handshake::new(
        shared.uid(),
        shared.mode(),
        shared.identity().clone(),
        tunnel,
        shared.buffer_size(),
        Arc::clone(&pool),
    );

    // Socket is writable: open the conversation.
    let opening = engine.start();
    if let Err(e) = step(&shared, &pool, &mut write_half, opening).await {
        shared.fail(&e);
        return;
    }

    loop {
        tokio::select! {
            frame = reader.next_frame(&mut read_half) => match frame {
                Ok(Some(body)) => {
                    let actions = engine.on_frame(body);
                    if let Err(e) = step(&shared, &pool, &mut write_half, actions).await {
                        shared.fail(&e);
                        break;
                    }
                }
                Ok(None) => {
                    if shared.status() == ConnectionStatus::Connected {
                        debug!(conn = shared.uid(), "remote closed the connection");
                        shared.set_status(ConnectionStatus::Closed);
                    } else {
                        shared.fail(&OsdgError::Socket(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed during handshake",
                        )));
                    }
                    break;
                }
                Err(e) => {
                    shared.fail(&e);
                    break;
                }
            },
            op = ops.recv() => match op {
                Some(ConnOp::Send(body)) => {
                    let sealed = engine.seal_app_mesg(&body);
                    if let Err(e) = step(&shared, &pool, &mut write_half, sealed.map(|f| vec![Action::Send(f)])).await {
                        shared.fail(&e);
                        break;
                    }
                }
                Some(ConnOp::Close) | None => {
                    debug!(conn = shared.uid(), "closing connection");
                    shared.set_status(ConnectionStatus::Closed);
                    break;
                }
            },
        }
    }
    // Dropping the engine zeroizes the short-term secret; dropping the
    // halves closes the socket.
}

/// Apply one engine result: write frames, move status, deliver payloads.
async fn step(
    shared: &Arc<Shared>,
    pool: &BufferPool,
    writer: &mut OwnedWriteHalf,
    actions: Result<Vec<Action>, OsdgError>,
) -> Result<(), OsdgError> {
    for action in actions? {
        match action {
            Action::Send(frame_bytes) => {
                trace!(conn = shared.uid(), len = frame_bytes.len(), "writing frame");
                writer.write_all(&frame_bytes).await?;
                pool.put_back(frame_bytes);
            }
            Action::SetStatus(status) => shared.set_status(status),
            Action::Deliver(body) => shared.deliver(&body),
            Action::Peer(reply) => shared.dispatch_peer_reply(reply),
        }
    }
    Ok(())
}

/// Try the endpoint list in order; first successful TCP connect wins.
async fn connect_any(shared: &Arc<Shared>, endpoints: &[Endpoint]) -> Result<TcpStream, OsdgError> {
    let mut last_error = None;
    for endpoint in endpoints {
        debug!(conn = shared.uid(), %endpoint, "connecting");
        match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(conn = shared.uid(), %endpoint, error = %e, "endpoint unreachable");
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => OsdgError::Socket(e),
        None => OsdgError::Protocol("empty endpoint list".into()),
    })
}
