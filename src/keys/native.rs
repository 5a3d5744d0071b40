//! In-process Curve25519 key generation

use super::{KeyError, KeyPair, KeyProvider};
use base64::Engine;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key size in bytes
pub const KEY_SIZE: usize = 32;

pub struct NativeKeyProvider;

impl NativeKeyProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(bytes: &[u8; KEY_SIZE]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

impl KeyProvider for NativeKeyProvider {
    fn generate(&self) -> Result<KeyPair, KeyError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Ok(KeyPair {
            private: encode(&secret.to_bytes()),
            public: encode(public.as_bytes()),
        })
    }

    fn derive_public(&self, private: &str) -> Result<String, KeyError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(private.trim())
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::InvalidPrivateKey(format!("{} bytes", b.len())))?;

        let secret = StaticSecret::from(bytes);
        Ok(encode(PublicKey::from(&secret).as_bytes()))
    }
}
