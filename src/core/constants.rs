//! Protocol constants for the OSDG wire format.
//!
//! Values marked "interop placeholder" are not published anywhere; the
//! reference grid's numbers have to be taken from a capture and swapped in
//! here. They are collected in this module so that swap is a one-line edit.

// =============================================================================
// FRAMING
// =============================================================================

/// Every frame starts with a big-endian length that excludes itself.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Magic + 4-character command tag.
pub const FRAME_HEADER_SIZE: usize = 6;

/// Packet magic, first two payload bytes of every CurveCP frame
/// (interop placeholder).
pub const PACKET_MAGIC: u16 = 0xD0F9;

/// Receive/send buffer size used when the caller does not pick one.
pub const DEFAULT_BUFFER_SIZE: usize = 1536;

// =============================================================================
// CRYPTOGRAPHY
// =============================================================================

/// Curve25519 key size, public and secret alike.
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag prepended to every box.
pub const BOX_TAG_SIZE: usize = 16;

/// XSalsa20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// ASCII prefix length of a short-term (counter) nonce.
pub const SHORT_NONCE_PREFIX_SIZE: usize = 16;

/// ASCII prefix length of a long-term (random/echoed) nonce.
pub const LONG_NONCE_PREFIX_SIZE: usize = 8;

/// Tail bytes of a long-term nonce.
pub const LONG_NONCE_TAIL_SIZE: usize = 16;

/// Wire tail of a short-term nonce: the big-endian counter.
pub const SHORT_NONCE_TAIL_SIZE: usize = 8;

/// Server-issued cookie echoed back in VOCH.
pub const COOKIE_SIZE: usize = 96;

/// Zero padding opening every MESG/REDY plaintext.
pub const MESG_PAD_SIZE: usize = 16;

/// Zero padding opening the VOCH outer plaintext.
pub const VOUCH_OUTER_PAD_SIZE: usize = 16;

/// Zero padding opening the VOCH inner plaintext.
pub const VOUCH_INNER_PAD_SIZE: usize = 32;

/// HELO carries a box over this many zero bytes.
pub const HELO_ZERO_SIZE: usize = 64;

/// Boxed HELO body: tag + 64 zeros.
pub const HELO_BOX_SIZE: usize = BOX_TAG_SIZE + HELO_ZERO_SIZE;

/// Boxed cookie carrier in COOK: tag + short-term server key + cookie.
pub const COOK_BOX_SIZE: usize = BOX_TAG_SIZE + KEY_SIZE + COOKIE_SIZE;

/// Boxed vouch in VOCH: tag + inner pad + client short-term key.
pub const VOUCH_INNER_BOX_SIZE: usize = BOX_TAG_SIZE + VOUCH_INNER_PAD_SIZE + KEY_SIZE;

// =============================================================================
// NONCE PREFIXES
// =============================================================================

/// Client HELO.
pub const NONCE_CLIENT_HELLO: &[u8; 16] = b"CurveCP-client-H";

/// Client VOCH (initiate).
pub const NONCE_CLIENT_INITIATE: &[u8; 16] = b"CurveCP-client-I";

/// Client MESG.
pub const NONCE_CLIENT_MESSAGE: &[u8; 16] = b"CurveCP-client-M";

/// Server MESG.
pub const NONCE_SERVER_MESSAGE: &[u8; 16] = b"CurveCP-server-M";

/// Server REDY.
pub const NONCE_SERVER_READY: &[u8; 16] = b"CurveCP-server-R";

/// Cookie box (COOK).
pub const NONCE_COOKIE: &[u8; 8] = b"CurveCPK";

/// Vouch inner box (VOCH).
pub const NONCE_VOUCH: &[u8; 8] = b"CurveCPV";

// =============================================================================
// CONTROL PROTOCOL
// =============================================================================

/// Protocol version handshake, first MESG on a grid connection.
pub const MSG_PROTOCOL_VERSION: u8 = 0x01;

/// Outbound peer call carried over the grid connection.
pub const MSG_CALL_REMOTE: u8 = 0x02;

/// Grid's answer to a peer call, dispatched by peer id.
pub const MSG_PEER_REPLY: u8 = 0x03;

/// Filler seen before FORWARD_REPLY; ignored.
pub const MSG_FORWARD_HOLD: u8 = 0x0F;

/// Unencrypted forwarding request opening a peer tunnel.
pub const MSG_FORWARD_REMOTE: u8 = 0x10;

/// Forwarder's acknowledgement; carries the signature echo.
pub const MSG_FORWARD_REPLY: u8 = 0x11;

/// Forwarding failure report.
pub const MSG_FORWARD_ERROR: u8 = 0x12;

/// Protocol version magic (interop placeholder).
pub const PROTO_MAGIC: u32 = 0x4F53_4447;

/// Protocol version advertised and required.
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;

/// Minor protocol version.
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

/// ForwardRemote magic (interop placeholder).
pub const FORWARD_REMOTE_MAGIC: u32 = 0x4D44_4730;

/// Signature string carried in ForwardRemote and echoed in ForwardReply.
pub const FORWARD_SIGNATURE: &str = "MDG-SIG-PLACEHOLDER";

/// ForwardError code: failure on the grid side (interop placeholder).
pub const FORWARD_SERVER_ERROR: u32 = 1;

/// ForwardError code: the peer never picked up the tunnel
/// (interop placeholder).
pub const FORWARD_PEER_TIMEOUT: u32 = 2;

// =============================================================================
// VOCH CERTIFICATE RECORD
// =============================================================================

/// Key string of the license key-value record appended in grid mode.
pub const CERTIFICATE_KEY: &[u8; 11] = b"certificate";

/// Value length of the license record; an absent license is all zeroes.
pub const CERTIFICATE_VALUE_SIZE: usize = 32;

/// Whole record: key length byte, key, value length byte, value.
pub const CERTIFICATE_RECORD_SIZE: usize = 1 + CERTIFICATE_KEY.len() + 1 + CERTIFICATE_VALUE_SIZE;
