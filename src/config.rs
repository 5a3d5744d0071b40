//! Tool settings (TOML)
//!
//! Everything here has a default, so the settings file is optional. The
//! defaults reproduce the stock `wg0` layout on `10.8.0.0/24`.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the optional settings file inside the work directory
pub const SETTINGS_FILE: &str = "wg-confgen.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Settings file {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("Subnet {0} has no room for a server and at least one client")]
    SubnetTooSmall(Ipv4Net),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub render: RenderSettings,
    pub keygen: KeygenSettings,
}

/// File locations, relative to the work directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub config_dir: PathBuf,
    pub source: String,
    pub snapshot: String,
    pub output_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            source: "config.json".to_string(),
            snapshot: "config_latest.json".to_string(),
            output_dir: PathBuf::from("generated"),
        }
    }
}

/// Values substituted into the generated interface files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Tunnel subnet; the server takes the first host address
    pub subnet: Ipv4Net,
    /// Server interface name, also the server file name
    pub interface: String,
    pub listen_port: u16,
    pub dns: String,
    pub client_allowed_ips: String,
    pub persistent_keepalive: u16,
    pub post_up: String,
    pub post_down: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            subnet: Ipv4Net::new(std::net::Ipv4Addr::new(10, 8, 0, 0), 24)
                .expect("/24 is a valid prefix length"),
            interface: "wg0".to_string(),
            listen_port: 51820,
            dns: "1.1.1.1, 1.0.0.1".to_string(),
            client_allowed_ips: "0.0.0.0/0".to_string(),
            persistent_keepalive: 25,
            post_up: "iptables -A FORWARD -i %i -j ACCEPT; \
                      iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE"
                .to_string(),
            post_down: "iptables -D FORWARD -i %i -j ACCEPT; \
                        iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygenSettings {
    /// Path or name of the `wg` executable
    pub wg_binary: String,
}

impl Default for KeygenSettings {
    fn default() -> Self {
        Self {
            wg_binary: "wg".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `wg-confgen.toml` from the work directory, or use defaults
    pub fn load_or_default(work_dir: &Path) -> Result<Self, ConfigError> {
        let path = work_dir.join(SETTINGS_FILE);
        if path.exists() {
            tracing::info!("Loading settings from {}", path.display());
            Self::load(&path)
        } else {
            tracing::debug!("No {} found, using defaults", SETTINGS_FILE);
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write a default `wg-confgen.toml` into the work directory
    ///
    /// Refuses to replace an existing file.
    pub fn init(work_dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = work_dir.join(SETTINGS_FILE);
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path));
        }
        Self::default().save(&path)?;
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // /31 and /32 leave no client addresses
        if self.render.subnet.prefix_len() > 30 {
            return Err(ConfigError::SubnetTooSmall(self.render.subnet));
        }
        Ok(())
    }
}

/// Absolute file locations for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    pub output_dir: PathBuf,
}

impl Paths {
    pub fn resolve(work_dir: &Path, settings: &PathSettings) -> Self {
        let config_dir = work_dir.join(&settings.config_dir);
        Self {
            source: config_dir.join(&settings.source),
            snapshot: config_dir.join(&settings.snapshot),
            output_dir: work_dir.join(&settings.output_dir),
        }
    }

    /// Directory holding the snapshot and its backups
    pub fn snapshot_dir(&self) -> &Path {
        self.snapshot.parent().unwrap_or_else(|| Path::new("."))
    }
}
