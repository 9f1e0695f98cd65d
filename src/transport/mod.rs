//! Transport layer: connections, the event loop, registry and queues.
//!
//! One [`EventLoop`] owns all sockets. Applications create a
//! [`Connection`], submit it, and from then on the connection's protocol
//! state is mutated only on the reactor thread; handles observe status
//! and post commands.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │         Application threads              │
//! │   Connection handles, callbacks          │
//! ├───────────── command queue ──────────────┤
//! │         Reactor thread                   │  ← this module
//! │   frame reader, handshake engine,        │
//! │   per-connection driver tasks            │
//! ├──────────────────────────────────────────┤
//! │              TCP                         │
//! └──────────────────────────────────────────┘
//! ```

mod connection;
mod reactor;
mod registry;

pub mod queue;

pub use connection::{
    Connection, ConnectionStatus, DataCallback, Endpoint, Mode, PeerCallback, StatusCallback,
};
pub use reactor::EventLoop;
