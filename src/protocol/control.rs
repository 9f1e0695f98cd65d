//! Grid control-protocol messages.
//!
//! MESG bodies on a grid connection are `type byte || protobuf`; the
//! forwarding envelope carries the same shape unencrypted. Only the
//! messages the handshake and peer dispatch need are defined here - the
//! upper layer brings its own schema for everything else.

use prost::Message;

use crate::core::OsdgError;

/// Protocol version handshake, exchanged as the first MESG pair on a grid
/// connection.
#[derive(Clone, PartialEq, Message)]
pub struct ProtocolVersion {
    /// Version magic.
    #[prost(uint32, tag = "1")]
    pub magic: u32,
    /// Major version; must match exactly.
    #[prost(uint32, tag = "2")]
    pub major: u32,
    /// Minor version; must match exactly.
    #[prost(uint32, tag = "3")]
    pub minor: u32,
}

/// Outbound request to reach a device through the grid.
#[derive(Clone, PartialEq, Message)]
pub struct ConnectToPeer {
    /// Caller-allocated id echoed back in [`PeerReply`].
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Target device identity.
    #[prost(bytes = "vec", tag = "2")]
    pub peer_id: Vec<u8>,
    /// Application protocol name.
    #[prost(string, tag = "3")]
    pub protocol: String,
}

/// Grid's answer to [`ConnectToPeer`], dispatched to the requesting peer
/// entry by id.
#[derive(Clone, PartialEq, Message)]
pub struct PeerReply {
    /// Id from the originating request.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Zero on success.
    #[prost(int32, tag = "2")]
    pub result: i32,
    /// Forwarding path to the device; consumed by a peer connection.
    #[prost(bytes = "vec", tag = "3")]
    pub tunnel_id: Vec<u8>,
}

/// Unencrypted forwarding request sent to a forwarder to open a tunnel.
#[derive(Clone, PartialEq, Message)]
pub struct ForwardRemote {
    /// Forwarding magic.
    #[prost(uint32, tag = "1")]
    pub magic: u32,
    /// Protocol major version.
    #[prost(uint32, tag = "2")]
    pub protocol_major: u32,
    /// Protocol minor version.
    #[prost(uint32, tag = "3")]
    pub protocol_minor: u32,
    /// Tunnel id issued by the grid.
    #[prost(bytes = "vec", tag = "4")]
    pub tunnel_id: Vec<u8>,
    /// Client signature, echoed back in [`ForwardReply`].
    #[prost(string, tag = "5")]
    pub signature: String,
}

/// Forwarder's acknowledgement of [`ForwardRemote`].
#[derive(Clone, PartialEq, Message)]
pub struct ForwardReply {
    /// Must match the signature sent in [`ForwardRemote`].
    #[prost(string, tag = "1")]
    pub signature: String,
}

/// Forwarding failure report.
#[derive(Clone, PartialEq, Message)]
pub struct ForwardError {
    /// One of the FORWARD_* error codes.
    #[prost(uint32, tag = "1")]
    pub code: u32,
}

/// Encode a control message as a MESG/envelope body: `type || protobuf`.
pub fn control_body(msg_type: u8, message: &impl Message) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + message.encoded_len());
    body.push(msg_type);
    body.extend_from_slice(&message.encode_to_vec());
    body
}

/// Decode a protobuf control message, mapping failures to protocol errors.
pub fn decode<M: Message + Default>(what: &str, bytes: &[u8]) -> Result<M, OsdgError> {
    M::decode(bytes).map_err(|e| OsdgError::Protocol(format!("{what} decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        FORWARD_REMOTE_MAGIC, FORWARD_SIGNATURE, MSG_PROTOCOL_VERSION, PROTOCOL_VERSION_MAJOR,
        PROTOCOL_VERSION_MINOR, PROTO_MAGIC,
    };

    #[test]
    fn test_protocol_version_roundtrip() {
        let version = ProtocolVersion {
            magic: PROTO_MAGIC,
            major: PROTOCOL_VERSION_MAJOR,
            minor: PROTOCOL_VERSION_MINOR,
        };

        let body = control_body(MSG_PROTOCOL_VERSION, &version);
        assert_eq!(body[0], MSG_PROTOCOL_VERSION);

        let decoded: ProtocolVersion = decode("ProtocolVersion", &body[1..]).unwrap();
        assert_eq!(decoded, version);
    }

    #[test]
    fn test_forward_remote_roundtrip() {
        let fwd = ForwardRemote {
            magic: FORWARD_REMOTE_MAGIC,
            protocol_major: PROTOCOL_VERSION_MAJOR,
            protocol_minor: PROTOCOL_VERSION_MINOR,
            tunnel_id: vec![0xAA; 16],
            signature: FORWARD_SIGNATURE.to_string(),
        };

        let bytes = fwd.encode_to_vec();
        let decoded: ForwardRemote = decode("ForwardRemote", &bytes).unwrap();
        assert_eq!(decoded, fwd);
    }

    #[test]
    fn test_decode_failure_is_protocol_error() {
        // Field 1 declared as a length-delimited payload that is missing.
        let garbage = [0x0A, 0xFF];
        let err = decode::<PeerReply>("PeerReply", &garbage).unwrap_err();
        assert!(matches!(err, OsdgError::Protocol(_)));
    }

    #[test]
    fn test_peer_reply_defaults() {
        let decoded: PeerReply = decode("PeerReply", &[]).unwrap();
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.result, 0);
        assert!(decoded.tunnel_id.is_empty());
    }
}
