//! CurveCP nonce construction
//!
//! Two layouts are used on the wire, both 24 bytes:
//!
//! ```text
//! short-term: [ ASCII prefix (16) | big-endian counter (8) ]
//! long-term:  [ ASCII prefix (8)  | tail (16)              ]
//! ```
//!
//! The prefix discriminates direction and packet type; the short-term tail
//! travels in the packet as the low 64 bits of the sender counter, the
//! long-term tail is either random (VOCH) or echoed from the server (COOK).

use rand::{rngs::OsRng, RngCore};

use crate::core::{
    LONG_NONCE_PREFIX_SIZE, LONG_NONCE_TAIL_SIZE, NONCE_SIZE, SHORT_NONCE_PREFIX_SIZE,
    SHORT_NONCE_TAIL_SIZE,
};

/// Construct a short-term nonce from a direction prefix and a counter.
pub fn short_term(prefix: &[u8; SHORT_NONCE_PREFIX_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    short_term_tail(prefix, &counter.to_be_bytes())
}

/// Construct a short-term nonce from a direction prefix and the raw tail
/// bytes carried in a packet.
pub fn short_term_tail(
    prefix: &[u8; SHORT_NONCE_PREFIX_SIZE],
    tail: &[u8; SHORT_NONCE_TAIL_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..SHORT_NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[SHORT_NONCE_PREFIX_SIZE..].copy_from_slice(tail);
    nonce
}

/// Construct a long-term nonce from a prefix and a 16-byte tail.
pub fn long_term(
    prefix: &[u8; LONG_NONCE_PREFIX_SIZE],
    tail: &[u8; LONG_NONCE_TAIL_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..LONG_NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[LONG_NONCE_PREFIX_SIZE..].copy_from_slice(tail);
    nonce
}

/// Construct a long-term nonce with a fresh random tail.
pub fn random_long_term(prefix: &[u8; LONG_NONCE_PREFIX_SIZE]) -> [u8; NONCE_SIZE] {
    let mut tail = [0u8; LONG_NONCE_TAIL_SIZE];
    OsRng.fill_bytes(&mut tail);
    long_term(prefix, &tail)
}

/// The 16-byte tail of a long-term nonce (the part that travels in VOCH).
pub fn long_term_tail(nonce: &[u8; NONCE_SIZE]) -> &[u8] {
    &nonce[LONG_NONCE_PREFIX_SIZE..]
}
