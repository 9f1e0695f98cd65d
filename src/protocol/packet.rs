//! Packet codec for the OSDG wire format.
//!
//! Two framings share the same 2-byte big-endian length prefix (the length
//! excludes the prefix itself):
//!
//! ```text
//! CurveCP frame:    [ length (2) | magic (2) | command (4) | payload ]
//! Forward envelope: [ length (2) | msg type (1) | protobuf ]
//! ```
//!
//! The forward envelope is only spoken while a peer connection is in the
//! `Forwarding` state; everything else on the wire is a CurveCP frame.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::{
    OsdgError, BOX_TAG_SIZE, CERTIFICATE_KEY, CERTIFICATE_RECORD_SIZE, CERTIFICATE_VALUE_SIZE,
    COOKIE_SIZE, COOK_BOX_SIZE, FRAME_HEADER_SIZE, HELO_BOX_SIZE, KEY_SIZE, LENGTH_PREFIX_SIZE,
    LONG_NONCE_TAIL_SIZE, MESG_PAD_SIZE, PACKET_MAGIC, SHORT_NONCE_TAIL_SIZE,
};

/// CurveCP command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client greeting, opens the handshake.
    Tell,
    /// Server welcome carrying its long-term key.
    Welc,
    /// Client hello carrying the short-term key.
    Helo,
    /// Server cookie.
    Cook,
    /// Client vouch.
    Voch,
    /// Server ready.
    Redy,
    /// Encrypted data packet.
    Mesg,
}

impl Command {
    /// Parse a command from its 4-byte ASCII tag.
    pub fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            b"TELL" => Some(Self::Tell),
            b"WELC" => Some(Self::Welc),
            b"HELO" => Some(Self::Helo),
            b"COOK" => Some(Self::Cook),
            b"VOCH" => Some(Self::Voch),
            b"REDY" => Some(Self::Redy),
            b"MESG" => Some(Self::Mesg),
            _ => None,
        }
    }

    /// The 4-byte ASCII tag of this command.
    pub fn tag(self) -> [u8; 4] {
        match self {
            Self::Tell => *b"TELL",
            Self::Welc => *b"WELC",
            Self::Helo => *b"HELO",
            Self::Cook => *b"COOK",
            Self::Voch => *b"VOCH",
            Self::Redy => *b"REDY",
            Self::Mesg => *b"MESG",
        }
    }
}

/// A parsed CurveCP frame body.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Raw command tag as received.
    pub tag: [u8; 4],
    /// Recognized command, `None` for tags this client does not speak.
    pub command: Option<Command>,
    /// Command-specific payload.
    pub payload: &'a [u8],
}

/// Start a frame in `buf`: length placeholder, magic, command tag.
///
/// The caller appends the payload and calls [`finish_frame`].
pub fn begin_frame(buf: &mut Vec<u8>, command: Command) {
    buf.clear();
    buf.extend_from_slice(&[0u8; LENGTH_PREFIX_SIZE]);
    buf.extend_from_slice(&PACKET_MAGIC.to_be_bytes());
    buf.extend_from_slice(&command.tag());
}

/// Patch the length prefix once the payload is in place.
pub fn finish_frame(buf: &mut Vec<u8>) {
    let length = (buf.len() - LENGTH_PREFIX_SIZE) as u16;
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&length.to_be_bytes());
}

/// Encode a complete frame in one go.
pub fn frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + FRAME_HEADER_SIZE + payload.len());
    begin_frame(&mut buf, command);
    buf.extend_from_slice(payload);
    finish_frame(&mut buf);
    buf
}

/// Parse a frame body (everything after the length prefix).
pub fn parse_frame(body: &[u8]) -> Result<Frame<'_>, OsdgError> {
    if body.len() < FRAME_HEADER_SIZE {
        return Err(OsdgError::Protocol(format!(
            "frame too short: {} bytes",
            body.len()
        )));
    }
    let magic = u16::from_be_bytes([body[0], body[1]]);
    if magic != PACKET_MAGIC {
        return Err(OsdgError::Protocol(format!(
            "wrong packet magic 0x{magic:04x}"
        )));
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&body[2..6]);
    Ok(Frame {
        tag,
        command: Command::from_tag(&tag),
        payload: &body[FRAME_HEADER_SIZE..],
    })
}

/// Encode a forward envelope: length prefix, message type, protobuf bytes.
pub fn forward_frame(buf: &mut Vec<u8>, msg_type: u8, message: &[u8]) {
    buf.clear();
    let length = (1 + message.len()) as u16;
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(msg_type);
    buf.extend_from_slice(message);
}

/// Parse a forward envelope body into its message type and protobuf bytes.
pub fn parse_forward(body: &[u8]) -> Result<(u8, &[u8]), OsdgError> {
    match body.split_first() {
        Some((msg_type, message)) => Ok((*msg_type, message)),
        None => Err(OsdgError::Protocol("empty forward envelope".into())),
    }
}

// =============================================================================
// TYPED PAYLOADS
// =============================================================================

/// Extract the server long-term key from a WELC payload. Whatever follows
/// the key is cookie carrier material this client does not consume.
pub fn parse_welc(payload: &[u8]) -> Result<[u8; KEY_SIZE], OsdgError> {
    if payload.len() < KEY_SIZE {
        return Err(OsdgError::Protocol(format!(
            "WELC payload of {} bytes cannot carry a server key",
            payload.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&payload[..KEY_SIZE]);
    Ok(key)
}

/// Assemble a HELO payload: short-term key, nonce tail, boxed zeros.
pub fn encode_helo(
    buf: &mut Vec<u8>,
    short_term_public: &[u8; KEY_SIZE],
    nonce_tail: &[u8; SHORT_NONCE_TAIL_SIZE],
    boxed: &[u8],
) {
    debug_assert_eq!(boxed.len(), HELO_BOX_SIZE);
    begin_frame(buf, Command::Helo);
    buf.extend_from_slice(short_term_public);
    buf.extend_from_slice(nonce_tail);
    buf.extend_from_slice(boxed);
    finish_frame(buf);
}

/// Split a COOK payload into the long-term nonce tail and the cookie box.
pub fn parse_cook(payload: &[u8]) -> Result<([u8; LONG_NONCE_TAIL_SIZE], &[u8]), OsdgError> {
    if payload.len() != LONG_NONCE_TAIL_SIZE + COOK_BOX_SIZE {
        return Err(OsdgError::Protocol(format!(
            "COOK payload of {} bytes, expected {}",
            payload.len(),
            LONG_NONCE_TAIL_SIZE + COOK_BOX_SIZE
        )));
    }
    let mut tail = [0u8; LONG_NONCE_TAIL_SIZE];
    tail.copy_from_slice(&payload[..LONG_NONCE_TAIL_SIZE]);
    Ok((tail, &payload[LONG_NONCE_TAIL_SIZE..]))
}

/// Assemble a VOCH payload: echoed cookie, nonce tail, outer box.
pub fn encode_voch(
    buf: &mut Vec<u8>,
    cookie: &[u8; COOKIE_SIZE],
    nonce_tail: &[u8; SHORT_NONCE_TAIL_SIZE],
    outer_box: &[u8],
) {
    begin_frame(buf, Command::Voch);
    buf.extend_from_slice(cookie);
    buf.extend_from_slice(nonce_tail);
    buf.extend_from_slice(outer_box);
    finish_frame(buf);
}

/// Assemble a MESG payload: nonce tail, box.
pub fn encode_mesg(buf: &mut Vec<u8>, nonce_tail: &[u8; SHORT_NONCE_TAIL_SIZE], boxed: &[u8]) {
    begin_frame(buf, Command::Mesg);
    buf.extend_from_slice(nonce_tail);
    buf.extend_from_slice(boxed);
    finish_frame(buf);
}

/// Split a MESG or REDY payload into the sender nonce tail and the box.
pub fn parse_mesg(payload: &[u8]) -> Result<([u8; SHORT_NONCE_TAIL_SIZE], &[u8]), OsdgError> {
    // Smallest box: tag plus the 16-byte plaintext pad.
    if payload.len() < SHORT_NONCE_TAIL_SIZE + BOX_TAG_SIZE + MESG_PAD_SIZE {
        return Err(OsdgError::Protocol(format!(
            "MESG payload too short: {} bytes",
            payload.len()
        )));
    }
    let mut tail = [0u8; SHORT_NONCE_TAIL_SIZE];
    tail.copy_from_slice(&payload[..SHORT_NONCE_TAIL_SIZE]);
    Ok((tail, &payload[SHORT_NONCE_TAIL_SIZE..]))
}

/// Build a MESG plaintext around a body: zero pad, size, body.
pub fn mesg_plaintext(body: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(MESG_PAD_SIZE + 2 + body.len());
    plaintext.extend_from_slice(&[0u8; MESG_PAD_SIZE]);
    plaintext.extend_from_slice(&(body.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(body);
    plaintext
}

/// Extract the body from an opened MESG plaintext.
pub fn parse_mesg_plaintext(plaintext: &[u8]) -> Result<&[u8], OsdgError> {
    if plaintext.len() < MESG_PAD_SIZE + 2 {
        return Err(OsdgError::Protocol(format!(
            "MESG plaintext too short: {} bytes",
            plaintext.len()
        )));
    }
    let size =
        u16::from_be_bytes([plaintext[MESG_PAD_SIZE], plaintext[MESG_PAD_SIZE + 1]]) as usize;
    let body = &plaintext[MESG_PAD_SIZE + 2..];
    if size > body.len() {
        return Err(OsdgError::Protocol(format!(
            "MESG body size {size} exceeds {} available bytes",
            body.len()
        )));
    }
    Ok(&body[..size])
}

/// Build the license key-value record appended to the VOCH outer plaintext
/// in grid mode. An absent license key is reported as 32 zero bytes.
pub fn certificate_record() -> [u8; CERTIFICATE_RECORD_SIZE] {
    let mut record = [0u8; CERTIFICATE_RECORD_SIZE];
    record[0] = CERTIFICATE_KEY.len() as u8;
    record[1..1 + CERTIFICATE_KEY.len()].copy_from_slice(CERTIFICATE_KEY);
    record[1 + CERTIFICATE_KEY.len()] = CERTIFICATE_VALUE_SIZE as u8;
    record
}

// =============================================================================
// TWO-PHASE FRAME READER
// =============================================================================

/// Length-then-body reader over an owned receive buffer.
///
/// Mirrors the wire framing: first exactly two length bytes, then up to
/// `length` body bytes, accumulated across partial reads. A declared size
/// that does not fit the buffer fails *before* any body byte is read.
///
/// All progress lives in the struct, so a future dropped mid-read (e.g. by
/// `select!`) resumes where it left off on the next call.
pub struct FrameReader {
    buffer: Vec<u8>,
    bytes_received: usize,
    bytes_left: usize,
    in_body: bool,
}

impl FrameReader {
    /// Create a reader with the given buffer size.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size],
            bytes_received: 0,
            bytes_left: 0,
            in_body: false,
        }
    }

    /// Read the next complete frame body.
    ///
    /// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF inside a
    /// frame is a socket error.
    pub async fn next_frame<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut R,
    ) -> Result<Option<&[u8]>, OsdgError> {
        if !self.in_body && self.bytes_left == 0 {
            self.bytes_received = 0;
            self.bytes_left = LENGTH_PREFIX_SIZE;
        }

        loop {
            while self.bytes_left > 0 {
                let start = self.bytes_received;
                let end = start + self.bytes_left;
                let n = stream.read(&mut self.buffer[start..end]).await?;
                if n == 0 {
                    if !self.in_body && self.bytes_received == 0 {
                        return Ok(None);
                    }
                    return Err(OsdgError::Socket(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-frame",
                    )));
                }
                self.bytes_received += n;
                self.bytes_left -= n;
            }

            if self.in_body {
                self.in_body = false;
                let body_end = self.bytes_received;
                return Ok(Some(&self.buffer[LENGTH_PREFIX_SIZE..body_end]));
            }

            let size = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if size + LENGTH_PREFIX_SIZE > self.buffer.len() {
                return Err(OsdgError::BufferExceeded {
                    declared: size,
                    limit: self.buffer.len(),
                });
            }
            if size == 0 {
                return Err(OsdgError::Protocol("zero-length frame".into()));
            }
            self.in_body = true;
            self.bytes_left = size;
        }
    }
}
