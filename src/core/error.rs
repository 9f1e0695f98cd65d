//! Error types for the OSDG client.

use thiserror::Error;

/// Classification of a connection failure, readable through
/// [`Connection::error_kind`](crate::transport::Connection::error_kind)
/// after the connection reaches `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No failure captured (yet).
    NoError,
    /// Underlying I/O failed; the error code carries the OS errno.
    SocketError,
    /// A crypto primitive reported failure on valid-looking inputs.
    CryptoCoreError,
    /// A box did not open: bad key, tampered packet or truncation.
    DecryptionError,
    /// Sealing a box failed.
    EncryptionError,
    /// Magic mismatch, unexpected command, version or signature mismatch,
    /// or a decode failure.
    ProtocolError,
    /// A declared frame size did not fit the connection buffer.
    BufferExceeded,
    /// The grid reported a server-side forwarding failure.
    ServerError,
    /// The grid reported that the peer never picked up the tunnel.
    PeerTimeout,
    /// Event loop bootstrap failed.
    SystemError,
}

/// Errors produced by the OSDG client.
///
/// Every variant maps onto exactly one [`ErrorKind`]; the connection
/// captures the `(kind, code)` pair before transitioning to `Failed`.
#[derive(Debug, Error)]
pub enum OsdgError {
    /// Socket I/O failed.
    #[error("socket i/o failed: {0}")]
    Socket(#[from] std::io::Error),

    /// A NaCl primitive returned an error.
    #[error("crypto core failure")]
    CryptoCore,

    /// Opening a box failed.
    #[error("packet decryption failed")]
    Decryption,

    /// Sealing a box failed.
    #[error("packet encryption failed")]
    Encryption,

    /// The remote side violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A frame larger than the connection buffer was declared.
    #[error("declared frame of {declared} bytes exceeds buffer of {limit} bytes")]
    BufferExceeded {
        /// Declared payload size from the length prefix.
        declared: usize,
        /// Configured buffer size of the connection.
        limit: usize,
    },

    /// The grid reported FORWARD_SERVER_ERROR.
    #[error("grid reported a server-side forwarding failure")]
    ServerError,

    /// The grid reported FORWARD_PEER_TIMEOUT.
    #[error("grid reported a peer timeout")]
    PeerTimeout,

    /// Event loop bootstrap failed.
    #[error("event loop bootstrap failed: {0}")]
    System(String),

    /// Operation requires an established connection.
    #[error("connection is not established")]
    NotConnected,
}

impl OsdgError {
    /// The [`ErrorKind`] this error is captured as on the connection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OsdgError::Socket(_) => ErrorKind::SocketError,
            OsdgError::CryptoCore => ErrorKind::CryptoCoreError,
            OsdgError::Decryption => ErrorKind::DecryptionError,
            OsdgError::Encryption => ErrorKind::EncryptionError,
            OsdgError::Protocol(_) | OsdgError::NotConnected => ErrorKind::ProtocolError,
            OsdgError::BufferExceeded { .. } => ErrorKind::BufferExceeded,
            OsdgError::ServerError => ErrorKind::ServerError,
            OsdgError::PeerTimeout => ErrorKind::PeerTimeout,
            OsdgError::System(_) => ErrorKind::SystemError,
        }
    }

    /// OS-level error code, or 0 when the failure has none.
    pub fn code(&self) -> i32 {
        match self {
            OsdgError::Socket(io) => io.raw_os_error().unwrap_or(0),
            _ => 0,
        }
    }

    /// Rebuild an error from a captured `(kind, code)` pair.
    ///
    /// Used when reporting a stored failure back out of a connection.
    pub fn from_captured(kind: ErrorKind, code: i32) -> Self {
        match kind {
            ErrorKind::NoError | ErrorKind::ProtocolError => {
                OsdgError::Protocol("captured protocol failure".into())
            }
            ErrorKind::SocketError => OsdgError::Socket(std::io::Error::from_raw_os_error(code)),
            ErrorKind::CryptoCoreError => OsdgError::CryptoCore,
            ErrorKind::DecryptionError => OsdgError::Decryption,
            ErrorKind::EncryptionError => OsdgError::Encryption,
            ErrorKind::BufferExceeded => OsdgError::BufferExceeded {
                declared: 0,
                limit: 0,
            },
            ErrorKind::ServerError => OsdgError::ServerError,
            ErrorKind::PeerTimeout => OsdgError::PeerTimeout,
            ErrorKind::SystemError => OsdgError::System("captured bootstrap failure".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(OsdgError::Decryption.kind(), ErrorKind::DecryptionError);
        assert_eq!(OsdgError::PeerTimeout.kind(), ErrorKind::PeerTimeout);
        assert_eq!(
            OsdgError::BufferExceeded {
                declared: 65535,
                limit: 1536
            }
            .kind(),
            ErrorKind::BufferExceeded
        );
        assert_eq!(
            OsdgError::Protocol("bad magic".into()).kind(),
            ErrorKind::ProtocolError
        );
    }

    #[test]
    fn test_socket_error_carries_errno() {
        let err = OsdgError::Socket(std::io::Error::from_raw_os_error(104));
        assert_eq!(err.kind(), ErrorKind::SocketError);
        assert_eq!(err.code(), 104);
    }

    #[test]
    fn test_non_socket_code_is_zero() {
        assert_eq!(OsdgError::Decryption.code(), 0);
        assert_eq!(OsdgError::ServerError.code(), 0);
    }
}
