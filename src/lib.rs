//! # OSDG Client
//!
//! Client library for the **O**pen **S**ecure **D**evice **G**rid protocol:
//! a mutually-authenticated, end-to-end encrypted overlay that lets
//! applications reach devices through rendezvous "grid" servers, using a
//! CurveCP-derived handshake over TCP. It provides:
//!
//! - **Security**: NaCl boxes end to end, forward-secret per-connection
//!   session keys vouched by long-term identities
//! - **Reachability**: peer devices reached through grid-issued forwarding
//!   tunnels, no inbound ports required
//! - **Simplicity**: one reactor thread owns every socket; handles are
//!   cheap clones safe to use from any thread
//!
//! ## Modules
//!
//! - [`core`]: Constants and error types
//! - [`crypto`]: Keys, nonce construction, NaCl box bindings
//! - [`protocol`]: Packet codec, control messages, handshake engine
//! - [`transport`]: Connections, the event loop, registry
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use osdg::{create_private_key, Endpoint, EventLoop};
//!
//! # async fn run() -> Result<(), osdg::OsdgError> {
//! let event_loop = EventLoop::start()?;
//!
//! let key = create_private_key();
//! let grid = event_loop.create_connection(&key, 1536);
//! grid.connect_to_grid(&[Endpoint::new("grid.example.net", 443)]).await?;
//!
//! // Ask the grid for a tunnel to a device, then open it.
//! grid.request_peer(b"device identity", "dominion-1.0", |reply| {
//!     println!("tunnel: {}", osdg::bin_to_hex(&reply.tunnel_id));
//! })?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod protocol;
pub mod transport;

mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{ErrorKind, OsdgError};
    pub use crate::crypto::{calc_public_key, create_private_key};
    pub use crate::transport::{Connection, ConnectionStatus, Endpoint, EventLoop, Mode};
    pub use crate::utils::{bin_to_hex, hex_to_bin};
}

// Re-export commonly used items at crate root
pub use crate::core::{ErrorKind, OsdgError, DEFAULT_BUFFER_SIZE};
pub use crypto::{calc_public_key, create_private_key};
pub use transport::{Connection, ConnectionStatus, Endpoint, EventLoop, Mode};
pub use utils::{bin_to_hex, hex_to_bin};
