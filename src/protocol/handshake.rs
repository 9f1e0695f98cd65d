//! CurveCP handshake engine.
//!
//! A sans-io state machine, one per connection, owned by the reactor. The
//! driver feeds it complete frame bodies and applies the [`Action`]s it
//! returns; the engine never touches a socket. This keeps the full
//! WELC → HELO → COOK → VOCH → REDY → MESG exchange testable without I/O.
//!
//! ```text
//! grid:  TELL ->            <- WELC   HELO ->   <- COOK   VOCH ->
//!        <- REDY   MESG(version) ->   <- MESG(version)   [connected]
//! peer:  FORWARD_REMOTE ->   <- HOLD*   <- FORWARD_REPLY   TELL -> ...
//!        <- REDY   [connected]
//! ```

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::core::{
    OsdgError, BOX_TAG_SIZE, COOKIE_SIZE, FORWARD_PEER_TIMEOUT, FORWARD_REMOTE_MAGIC,
    FORWARD_SERVER_ERROR, FORWARD_SIGNATURE, FRAME_HEADER_SIZE, HELO_ZERO_SIZE, KEY_SIZE,
    LENGTH_PREFIX_SIZE, MESG_PAD_SIZE, MSG_FORWARD_ERROR, MSG_FORWARD_HOLD, MSG_FORWARD_REMOTE,
    MSG_FORWARD_REPLY, MSG_PEER_REPLY, MSG_PROTOCOL_VERSION, NONCE_CLIENT_HELLO,
    NONCE_CLIENT_INITIATE, NONCE_CLIENT_MESSAGE, NONCE_COOKIE, NONCE_SERVER_MESSAGE,
    NONCE_SERVER_READY, NONCE_VOUCH, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, PROTO_MAGIC,
    SHORT_NONCE_TAIL_SIZE, VOUCH_INNER_PAD_SIZE, VOUCH_OUTER_PAD_SIZE,
};
use crate::crypto::{nonce, session, Keypair, SessionKey};
use crate::protocol::control::{
    self, ForwardError, ForwardReply, ForwardRemote, PeerReply, ProtocolVersion,
};
use crate::protocol::packet::{self, Command};
use crate::transport::queue::BufferPool;
use crate::transport::{ConnectionStatus, Mode};

use prost::Message;

/// What the driver must do after feeding the engine.
#[derive(Debug)]
pub enum Action {
    /// Write this frame to the socket; the buffer returns to the pool.
    Send(Vec<u8>),
    /// Advance the connection status.
    SetStatus(ConnectionStatus),
    /// Hand a decrypted payload body to the upper layer.
    Deliver(Vec<u8>),
    /// Dispatch a peer reply to the outstanding-peer table.
    Peer(PeerReply),
}

/// Per-connection protocol state.
pub struct Handshake {
    uid: u32,
    mode: Mode,
    buffer_size: usize,
    identity: Keypair,
    /// Short-term keypair, created on WELC, dropped (zeroized) with the
    /// engine when the connection closes or fails.
    short_term: Option<Keypair>,
    server_key: Option<[u8; KEY_SIZE]>,
    session: Option<SessionKey>,
    cookie: Option<[u8; COOKIE_SIZE]>,
    /// Sender nonce counter; strictly monotonic, first value on the wire
    /// is 1.
    nonce: u64,
    /// Consumed when FORWARD_REMOTE goes out.
    tunnel_id: Option<Vec<u8>>,
    phase: ConnectionStatus,
    pool: Arc<BufferPool>,
}

impl Handshake {
    /// Create the engine for a freshly opened TCP stream.
    pub fn new(
        uid: u32,
        mode: Mode,
        identity: Keypair,
        tunnel_id: Option<Vec<u8>>,
        buffer_size: usize,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            uid,
            mode,
            buffer_size,
            identity,
            short_term: None,
            server_key: None,
            session: None,
            cookie: None,
            nonce: 0,
            tunnel_id,
            phase: ConnectionStatus::Connecting,
            pool,
        }
    }

    /// The socket became writable: open the conversation.
    ///
    /// With a tunnel id this is the unencrypted FORWARD_REMOTE; otherwise
    /// the plain TELL that starts the CurveCP exchange.
    pub fn start(&mut self) -> Result<Vec<Action>, OsdgError> {
        match self.tunnel_id.take() {
            Some(tunnel_id) => {
                let request = ForwardRemote {
                    magic: FORWARD_REMOTE_MAGIC,
                    protocol_major: PROTOCOL_VERSION_MAJOR,
                    protocol_minor: PROTOCOL_VERSION_MINOR,
                    tunnel_id,
                    signature: FORWARD_SIGNATURE.to_string(),
                };
                let mut buf = self.pool.take();
                packet::forward_frame(&mut buf, MSG_FORWARD_REMOTE, &request.encode_to_vec());
                self.phase = ConnectionStatus::Forwarding;
                Ok(vec![
                    Action::SetStatus(ConnectionStatus::Forwarding),
                    Action::Send(buf),
                ])
            }
            None => {
                self.phase = ConnectionStatus::Handshaking;
                Ok(vec![
                    Action::SetStatus(ConnectionStatus::Handshaking),
                    self.send_tell(),
                ])
            }
        }
    }

    /// Process one complete frame body.
    pub fn on_frame(&mut self, body: &[u8]) -> Result<Vec<Action>, OsdgError> {
        if self.phase == ConnectionStatus::Forwarding {
            return self.handle_forward(body);
        }

        let frame = packet::parse_frame(body)?;
        trace!(
            conn = self.uid,
            command = %String::from_utf8_lossy(&frame.tag),
            len = frame.payload.len(),
            "received packet"
        );
        match frame.command {
            Some(Command::Welc) => self.handle_welc(frame.payload),
            Some(Command::Cook) => self.handle_cook(frame.payload),
            Some(Command::Redy) => self.handle_redy(frame.payload),
            Some(Command::Mesg) => self.handle_mesg(frame.payload),
            Some(_) | None => {
                debug!(
                    conn = self.uid,
                    tag = %String::from_utf8_lossy(&frame.tag),
                    "unexpected packet ignored"
                );
                Ok(vec![])
            }
        }
    }

    /// Seal application bytes into a MESG frame. Only valid once connected.
    pub fn seal_app_mesg(&mut self, body: &[u8]) -> Result<Vec<u8>, OsdgError> {
        if self.phase != ConnectionStatus::Connected {
            return Err(OsdgError::NotConnected);
        }
        self.seal_mesg_frame(body)
    }

    fn next_nonce(&mut self) -> u64 {
        self.nonce += 1;
        self.nonce
    }

    fn send_tell(&mut self) -> Action {
        debug!(
            conn = self.uid,
            key = %hex::encode(self.identity.public()),
            "starting CurveCP exchange"
        );
        let mut buf = self.pool.take();
        packet::begin_frame(&mut buf, Command::Tell);
        packet::finish_frame(&mut buf);
        Action::Send(buf)
    }

    /// WELC: capture the server identity, create the short-term keypair and
    /// answer with HELO.
    fn handle_welc(&mut self, payload: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let server_key = packet::parse_welc(payload)?;
        debug!(
            conn = self.uid,
            server = %hex::encode(server_key),
            "received server public key"
        );

        let short_term = Keypair::generate();
        let counter = self.next_nonce();
        let n = nonce::short_term(NONCE_CLIENT_HELLO, counter);
        let boxed = session::seal_once(
            &server_key,
            short_term.secret(),
            &n,
            &[0u8; HELO_ZERO_SIZE],
        )?;

        let mut buf = self.pool.take();
        packet::encode_helo(&mut buf, short_term.public(), &counter.to_be_bytes(), &boxed);

        self.server_key = Some(server_key);
        self.short_term = Some(short_term);
        Ok(vec![Action::Send(buf)])
    }

    /// COOK: open the cookie box, precompute the session key and answer
    /// with VOCH.
    fn handle_cook(&mut self, payload: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let (tail, cookie_box) = packet::parse_cook(payload)?;
        let server_key = self
            .server_key
            .ok_or_else(|| OsdgError::Protocol("COOK before WELC".into()))?;
        let short_term = self
            .short_term
            .as_ref()
            .ok_or_else(|| OsdgError::Protocol("COOK before WELC".into()))?;

        let n = nonce::long_term(NONCE_COOKIE, &tail);
        let opened = session::open_once(&server_key, short_term.secret(), &n, cookie_box)?;

        let mut server_short = [0u8; KEY_SIZE];
        server_short.copy_from_slice(&opened[..KEY_SIZE]);
        let mut cookie = [0u8; COOKIE_SIZE];
        cookie.copy_from_slice(&opened[KEY_SIZE..]);
        debug!(
            conn = self.uid,
            server_short = %hex::encode(server_short),
            "cookie opened"
        );

        let session = SessionKey::precompute(&server_short, short_term.secret());

        // Vouch the short-term key under the long-term identities.
        let inner_nonce = nonce::random_long_term(NONCE_VOUCH);
        let mut inner_pt = [0u8; VOUCH_INNER_PAD_SIZE + KEY_SIZE];
        inner_pt[VOUCH_INNER_PAD_SIZE..].copy_from_slice(short_term.public());
        let inner_box =
            session::seal_once(&server_key, self.identity.secret(), &inner_nonce, &inner_pt)?;

        let mut outer = Vec::with_capacity(256);
        outer.extend_from_slice(&[0u8; VOUCH_OUTER_PAD_SIZE]);
        outer.extend_from_slice(self.identity.public());
        outer.extend_from_slice(nonce::long_term_tail(&inner_nonce));
        outer.extend_from_slice(&inner_box);
        if self.mode == Mode::Grid {
            // The grid accepts VOCH without the license record, but the
            // reference client always sends it; stay wire-compatible.
            outer.push(1);
            outer.extend_from_slice(&packet::certificate_record());
        } else {
            outer.push(0);
        }

        let counter = self.next_nonce();
        let sn = nonce::short_term(NONCE_CLIENT_INITIATE, counter);
        let outer_box = session.seal(&sn, &outer)?;

        self.session = Some(session);
        let cookie = self.cookie.insert(cookie);
        let mut buf = self.pool.take();
        packet::encode_voch(&mut buf, cookie, &counter.to_be_bytes(), &outer_box);
        Ok(vec![Action::Send(buf)])
    }

    /// REDY: the peer handshake is done; a grid connection still owes the
    /// protocol version exchange.
    fn handle_redy(&mut self, payload: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let (tail, boxed) = packet::parse_mesg(payload)?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| OsdgError::Protocol("REDY before COOK".into()))?;
        let n = nonce::short_term_tail(NONCE_SERVER_READY, &tail);
        let plaintext = session.open(&n, boxed)?;

        if self.mode == Mode::Peer {
            self.phase = ConnectionStatus::Connected;
            return Ok(vec![Action::SetStatus(ConnectionStatus::Connected)]);
        }

        // A device sends its license certificate here; the cloud sends
        // nothing of interest. Either way the body is opaque to us.
        trace!(
            conn = self.uid,
            len = plaintext.len().saturating_sub(MESG_PAD_SIZE),
            "REDY body ignored"
        );

        let version = ProtocolVersion {
            magic: PROTO_MAGIC,
            major: PROTOCOL_VERSION_MAJOR,
            minor: PROTOCOL_VERSION_MINOR,
        };
        let body = control::control_body(MSG_PROTOCOL_VERSION, &version);
        let frame = self.seal_mesg_frame(&body)?;
        Ok(vec![Action::Send(frame)])
    }

    /// MESG: decrypt and either deliver raw (peer tunnel) or dispatch the
    /// control protocol (grid).
    fn handle_mesg(&mut self, payload: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let (tail, boxed) = packet::parse_mesg(payload)?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| OsdgError::Protocol("MESG before COOK".into()))?;
        let n = nonce::short_term_tail(NONCE_SERVER_MESSAGE, &tail);
        let plaintext = session.open(&n, boxed)?;
        let body = packet::parse_mesg_plaintext(&plaintext)?;

        if self.mode == Mode::Peer {
            return Ok(vec![Action::Deliver(body.to_vec())]);
        }
        self.handle_control(body)
    }

    fn handle_control(&mut self, body: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let (msg_type, message) = body
            .split_first()
            .ok_or_else(|| OsdgError::Protocol("empty MESG body".into()))?;

        match *msg_type {
            MSG_PROTOCOL_VERSION => {
                let version: ProtocolVersion = control::decode("ProtocolVersion", message)?;
                if self.phase == ConnectionStatus::Connected {
                    debug!(conn = self.uid, "redundant protocol version ignored");
                    return Ok(vec![]);
                }
                if version.magic != PROTO_MAGIC {
                    return Err(OsdgError::Protocol(format!(
                        "incorrect protocol version magic 0x{:08x}",
                        version.magic
                    )));
                }
                if version.major != PROTOCOL_VERSION_MAJOR
                    || version.minor != PROTOCOL_VERSION_MINOR
                {
                    return Err(OsdgError::Protocol(format!(
                        "unsupported server protocol version {}.{}",
                        version.major, version.minor
                    )));
                }
                debug!(
                    conn = self.uid,
                    "using protocol version {}.{}", version.major, version.minor
                );
                self.phase = ConnectionStatus::Connected;
                Ok(vec![Action::SetStatus(ConnectionStatus::Connected)])
            }
            MSG_PEER_REPLY => match control::decode::<PeerReply>("PeerReply", message) {
                Ok(reply) => Ok(vec![Action::Peer(reply)]),
                Err(e) => {
                    warn!(conn = self.uid, error = %e, "undecodable MSG_PEER_REPLY ignored");
                    Ok(vec![])
                }
            },
            other => {
                debug!(
                    conn = self.uid,
                    msg_type = other,
                    len = message.len(),
                    "unhandled MESG type ignored"
                );
                Ok(vec![])
            }
        }
    }

    /// Forward envelopes, spoken only between FORWARD_REMOTE and the
    /// forwarder's reply.
    fn handle_forward(&mut self, body: &[u8]) -> Result<Vec<Action>, OsdgError> {
        let (msg_type, message) = packet::parse_forward(body)?;
        match msg_type {
            MSG_FORWARD_HOLD => {
                trace!(conn = self.uid, "forwarder hold");
                Ok(vec![])
            }
            MSG_FORWARD_REPLY => {
                let reply: ForwardReply = control::decode("ForwardReply", message)?;
                if reply.signature != FORWARD_SIGNATURE {
                    return Err(OsdgError::Protocol(format!(
                        "wrong forwarding signature: {}",
                        reply.signature
                    )));
                }
                self.phase = ConnectionStatus::Handshaking;
                Ok(vec![
                    Action::SetStatus(ConnectionStatus::Handshaking),
                    self.send_tell(),
                ])
            }
            MSG_FORWARD_ERROR => {
                let failure: ForwardError = control::decode("ForwardError", message)?;
                Err(match failure.code {
                    FORWARD_SERVER_ERROR => OsdgError::ServerError,
                    FORWARD_PEER_TIMEOUT => OsdgError::PeerTimeout,
                    other => OsdgError::Protocol(format!("unexpected forwarding error {other}")),
                })
            }
            other => Err(OsdgError::Protocol(format!(
                "unexpected message 0x{other:02x} while forwarding"
            ))),
        }
    }

    fn seal_mesg_frame(&mut self, body: &[u8]) -> Result<Vec<u8>, OsdgError> {
        let plaintext = packet::mesg_plaintext(body);
        let total = LENGTH_PREFIX_SIZE
            + FRAME_HEADER_SIZE
            + SHORT_NONCE_TAIL_SIZE
            + BOX_TAG_SIZE
            + plaintext.len();
        if total > self.buffer_size {
            return Err(OsdgError::BufferExceeded {
                declared: total,
                limit: self.buffer_size,
            });
        }

        let counter = self.next_nonce();
        let session = self.session.as_ref().ok_or(OsdgError::NotConnected)?;
        let n = nonce::short_term(NONCE_CLIENT_MESSAGE, counter);
        let boxed = session.seal(&n, &plaintext)?;

        let mut buf = self.pool.take();
        packet::encode_mesg(&mut buf, &counter.to_be_bytes(), &boxed);
        Ok(buf)
    }
}
