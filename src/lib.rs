//! wg-confgen - WireGuard config generator
//!
//! Turns a hand-written JSON topology (one server, named groups of clients)
//! into a `wg0.conf` for the server and one `<group>_<name>.conf` per client.
//! Key pairs are generated once and kept forever in a generated snapshot;
//! every overwrite of that snapshot is preceded by a content-addressed backup.
//!
//! # Architecture
//!
//! - `keys`: Key-pair providers (`wg` tool or in-process x25519)
//! - `topology`: Topology document model and key filling
//! - `snapshot`: Load, fill, backup and persist of the generated snapshot
//! - `render`: Address allocation and interface file rendering
//! - `config`: Tool settings (TOML)
//! - `generate`: The full pipeline
//!
//! # Layout
//!
//! ```text
//! config/config.json           hand-written topology
//! config/config_latest.json    generated snapshot
//! config/config_<sha256>.json  backups of earlier snapshots
//! generated/*.conf             interface files
//! ```

pub mod config;
pub mod generate;
pub mod keys;
pub mod render;
pub mod snapshot;
pub mod topology;

pub use config::Settings;
pub use generate::{run, GenerateError};
pub use keys::{KeyPair, KeyProvider};
pub use topology::Config;
