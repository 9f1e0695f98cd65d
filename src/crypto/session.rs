//! NaCl box operations
//!
//! Thin binding over `crypto_box` (Curve25519-XSalsa20-Poly1305). A sealed
//! box is `tag[16] || ciphertext`, the libsodium combined layout, which is
//! exactly the box format the wire carries.
//!
//! [`SessionKey`] is the `beforenm` precomputation: one Diffie-Hellman plus
//! key derivation up front, then symmetric-speed seal/open per packet.

use crypto_box::{aead::Aead, Nonce, PublicKey, SalsaBox, SecretKey};

use crate::core::{OsdgError, KEY_SIZE, NONCE_SIZE};

/// Precomputed shared key for per-packet box operations.
pub struct SessionKey {
    precomputed: SalsaBox,
}

impl SessionKey {
    /// Precompute the shared key between a remote public key and a local
    /// secret key.
    pub fn precompute(remote_public: &[u8; KEY_SIZE], local_secret: &[u8; KEY_SIZE]) -> Self {
        let pk = PublicKey::from(*remote_public);
        let sk = SecretKey::from(*local_secret);
        Self {
            precomputed: SalsaBox::new(&pk, &sk),
        }
    }

    /// Seal a plaintext under the precomputed key.
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, OsdgError> {
        self.precomputed
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| OsdgError::Encryption)
    }

    /// Open a sealed box under the precomputed key.
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], sealed: &[u8]) -> Result<Vec<u8>, OsdgError> {
        self.precomputed
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| OsdgError::Decryption)
    }
}

/// One-shot seal for the long-term boxes of the handshake (HELO body,
/// VOCH inner box).
pub fn seal_once(
    remote_public: &[u8; KEY_SIZE],
    local_secret: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, OsdgError> {
    SessionKey::precompute(remote_public, local_secret).seal(nonce, plaintext)
}

/// One-shot open for the long-term boxes of the handshake (COOK cookie).
pub fn open_once(
    remote_public: &[u8; KEY_SIZE],
    local_secret: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    sealed: &[u8],
) -> Result<Vec<u8>, OsdgError> {
    SessionKey::precompute(remote_public, local_secret).open(nonce, sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BOX_TAG_SIZE, NONCE_CLIENT_MESSAGE};
    use crate::crypto::{keys::Keypair, nonce};

    #[test]
    fn test_seal_open_roundtrip() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let n = nonce::short_term(NONCE_CLIENT_MESSAGE, 1);

        let sealed = seal_once(bob.public(), alice.secret(), &n, b"hello grid").unwrap();
        assert_eq!(sealed.len(), b"hello grid".len() + BOX_TAG_SIZE);

        let opened = open_once(alice.public(), bob.secret(), &n, &sealed).unwrap();
        assert_eq!(opened, b"hello grid");
    }

    #[test]
    fn test_precomputation_matches_both_directions() {
        // beforenm(their_pub, my_sec) on each side yields the same key.
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let n = nonce::short_term(NONCE_CLIENT_MESSAGE, 7);

        let alice_side = SessionKey::precompute(bob.public(), alice.secret());
        let bob_side = SessionKey::precompute(alice.public(), bob.secret());

        let sealed = alice_side.seal(&n, b"symmetric").unwrap();
        assert_eq!(bob_side.open(&n, &sealed).unwrap(), b"symmetric");
    }

    #[test]
    fn test_open_rejects_tampering() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let n = nonce::short_term(NONCE_CLIENT_MESSAGE, 1);

        let mut sealed = seal_once(bob.public(), alice.secret(), &n, b"payload").unwrap();
        sealed[BOX_TAG_SIZE] ^= 0x01;

        let err = open_once(alice.public(), bob.secret(), &n, &sealed).unwrap_err();
        assert!(matches!(err, OsdgError::Decryption));
    }

    #[test]
    fn test_open_rejects_wrong_nonce() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let n1 = nonce::short_term(NONCE_CLIENT_MESSAGE, 1);
        let n2 = nonce::short_term(NONCE_CLIENT_MESSAGE, 2);

        let sealed = seal_once(bob.public(), alice.secret(), &n1, b"payload").unwrap();
        assert!(open_once(alice.public(), bob.secret(), &n2, &sealed).is_err());
    }
}
