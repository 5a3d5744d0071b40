//! Key-pair providers
//!
//! Key material is produced by an opaque provider. The default shells out to
//! the `wg` tool; the native provider derives Curve25519 keys in process and
//! prints them in the same base64 form.

pub mod native;
pub mod wg;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use native::NativeKeyProvider;
pub use wg::WgKeyProvider;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Failed to run {program}: {source}")]
    SpawnError {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} {command} failed: {stderr}")]
    CommandFailed {
        program: String,
        command: String,
        stderr: String,
    },
    #[error("{program} {command} returned unusable output: {reason}")]
    InvalidOutput {
        program: String,
        command: String,
        reason: String,
    },
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// A WireGuard private/public key pair, both base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub private: String,
    pub public: String,
}

/// Source of fresh key pairs
pub trait KeyProvider {
    /// Produce a new key pair whose public half is derived from the private half
    fn generate(&self) -> Result<KeyPair, KeyError>;

    /// Derive the public key for an existing private key
    fn derive_public(&self, private: &str) -> Result<String, KeyError>;
}

/// Which key provider backs a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum KeygenBackend {
    /// Shell out to `wg genkey` / `wg pubkey`
    #[default]
    Wg,
    /// Generate x25519 keys in process
    Native,
}

/// Build the provider for the requested backend
pub fn get_key_provider(backend: KeygenBackend, wg_binary: &str) -> Box<dyn KeyProvider> {
    match backend {
        KeygenBackend::Wg => Box::new(WgKeyProvider::with_binary(wg_binary)),
        KeygenBackend::Native => Box::new(NativeKeyProvider::new()),
    }
}
