//! Wire protocol: packet codec, control messages and the handshake engine.
//!
//! Everything here is sans-io. The transport layer feeds complete frame
//! bodies in and writes the produced frames out; nothing in this module
//! owns a socket.

pub mod control;
pub mod handshake;
pub mod packet;

pub use handshake::{Action, Handshake};
pub use packet::{Command, FrameReader};
