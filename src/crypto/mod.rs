//! Cryptographic layer: keys, nonce construction and NaCl box bindings.
//!
//! The primitives are not re-implemented; `crypto_box` provides the
//! Curve25519-XSalsa20-Poly1305 box compatible with the NaCl/libsodium
//! functions the protocol is defined against.

pub mod keys;
pub mod nonce;
pub mod session;

pub use keys::{calc_public_key, create_private_key, Keypair};
pub use session::SessionKey;
