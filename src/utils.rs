//! Small helpers: canonical hex encoding for keys and identifiers.

use crate::core::OsdgError;

/// Encode bytes as canonical lowercase hex.
pub fn bin_to_hex(bin: &[u8]) -> String {
    hex::encode(bin)
}

/// Decode a hex string (either case) into bytes.
pub fn hex_to_bin(hex_str: &str) -> Result<Vec<u8>, OsdgError> {
    hex::decode(hex_str).map_err(|e| OsdgError::Protocol(format!("invalid hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_is_lowercase() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        let encoded = bin_to_hex(&bytes);
        assert_eq!(encoded, "deadbeef");
        assert_eq!(hex_to_bin(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_uppercase_input_accepted() {
        assert_eq!(hex_to_bin("DEADBEEF").unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(hex_to_bin("xyz").is_err());
        assert!(hex_to_bin("abc").is_err()); // odd length
    }
}
