//! Curve25519 key management
//!
//! Long-term identity keys and per-connection short-term keys share the
//! same shape; both zeroize their secret half on drop.

use crypto_box::SecretKey;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::core::KEY_SIZE;

/// A Curve25519 keypair.
///
/// Used both for the client's long-term identity and for the short-term
/// keypair created per connection on WELC. The secret key is zeroized on
/// drop.
#[derive(Clone)]
pub struct Keypair {
    /// Public key (32 bytes).
    public: [u8; KEY_SIZE],
    /// Secret key (32 bytes) - zeroized on drop.
    secret: [u8; KEY_SIZE],
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self::from_secret(&create_private_key())
    }

    /// Build a keypair from an existing secret key, deriving the public key.
    pub fn from_secret(secret: &[u8; KEY_SIZE]) -> Self {
        Self {
            public: calc_public_key(secret),
            secret: *secret,
        }
    }

    /// Get the public key.
    pub fn public(&self) -> &[u8; KEY_SIZE] {
        &self.public
    }

    /// Get the secret key.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn secret(&self) -> &[u8; KEY_SIZE] {
        &self.secret
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret half never reaches logs.
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Generate 32 random bytes suitable as a Curve25519 secret key.
pub fn create_private_key() -> [u8; KEY_SIZE] {
    let mut secret = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Derive the public key matching a secret key (X25519 base-point
/// scalar multiplication).
pub fn calc_public_key(secret: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let sk = SecretKey::from(*secret);
    *sk.public_key().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();

        // Keys should be different
        assert_ne!(kp1.public(), kp2.public());
        assert_ne!(kp1.secret(), kp2.secret());
    }

    #[test]
    fn test_public_key_derivation_is_deterministic() {
        let secret = create_private_key();
        let kp = Keypair::from_secret(&secret);

        assert_eq!(kp.public(), &calc_public_key(&secret));
        assert_eq!(kp.secret(), &secret);
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::generate();
        let printed = format!("{kp:?}");
        assert!(!printed.contains(&hex::encode(kp.secret())));
    }
}
