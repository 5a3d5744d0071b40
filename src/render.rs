//! Address allocation and interface file rendering
//!
//! Clients are numbered in document order: groups in the order they appear,
//! names in the order they are listed. The server always holds the first
//! host address of the subnet and clients follow from the second one.
//! Inserting or removing a name shifts every later client's address.

use crate::config::RenderSettings;
use crate::topology::Config;
use ipnet::Ipv4Net;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Subnet {subnet} has no free address for {client}")]
    SubnetExhausted { subnet: Ipv4Net, client: String },
    #[error("No key pair for {0}; materialize the topology first")]
    MissingKeys(String),
    #[error("Failed to {op} {path}: {source}")]
    FileSystem {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

/// Hands out host addresses in order, starting after the server's
pub struct AddressAllocator {
    subnet: Ipv4Net,
    last: u32,
}

impl AddressAllocator {
    pub fn new(subnet: Ipv4Net) -> Self {
        let subnet = subnet.trunc();
        Self {
            last: u32::from(subnet.network()) + 1,
            subnet,
        }
    }

    /// Fixed server address, the first host of the subnet
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet.network()) + 1)
    }

    /// Next client address, or `None` once the host range is used up
    pub fn allocate(&mut self) -> Option<Ipv4Addr> {
        let candidate = self.last.checked_add(1)?;
        // broadcast is not a host address
        if candidate >= u32::from(self.subnet.broadcast()) {
            return None;
        }
        self.last = candidate;
        Some(Ipv4Addr::from(candidate))
    }
}

/// One generated interface file, not yet written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// File name without directory, e.g. `staff_alice.conf`
    pub name: String,
    pub content: String,
}

/// Strip the common indentation, trailing whitespace and surrounding blank
/// lines, and end with exactly one newline
pub fn normalize(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let lines: Vec<&str> = text
        .lines()
        .map(|line| line.get(indent..).unwrap_or("").trim_end())
        .collect();

    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);

    let mut out = lines[start..end].join("\n");
    out.push('\n');
    out
}

pub struct Renderer<'a> {
    settings: &'a RenderSettings,
}

impl<'a> Renderer<'a> {
    pub fn new(settings: &'a RenderSettings) -> Self {
        Self { settings }
    }

    /// Render the server file followed by one file per client
    ///
    /// Everything is built in memory; nothing touches the disk.
    pub fn render(&self, config: &Config) -> Result<Vec<RenderedFile>, RenderError> {
        let server_keys = config
            .server
            .keys
            .as_ref()
            .ok_or_else(|| RenderError::MissingKeys("server".to_string()))?;

        let mut allocator = AddressAllocator::new(self.settings.subnet);
        let mut blocks = vec![self.server_interface(allocator.server_address(), &server_keys.private)];
        let mut files = Vec::with_capacity(config.clients.client_count() + 1);

        for (group, client) in config.clients.iter() {
            for name in &client.names {
                let client_name = format!("{group}_{name}");
                let keys = client
                    .keys
                    .get(name)
                    .ok_or_else(|| RenderError::MissingKeys(client_name.clone()))?;
                let address = allocator.allocate().ok_or_else(|| RenderError::SubnetExhausted {
                    subnet: self.settings.subnet,
                    client: client_name.clone(),
                })?;
                debug!("Assigned {} to {}", address, client_name);

                blocks.push(self.server_peer(&client_name, &keys.public, address));
                files.push(RenderedFile {
                    content: self.client_file(
                        &keys.private,
                        address,
                        &server_keys.public,
                        &config.server.endpoint,
                    ),
                    name: format!("{client_name}.conf"),
                });
            }
        }

        files.insert(
            0,
            RenderedFile {
                name: format!("{}.conf", self.settings.interface),
                content: blocks.join("\n"),
            },
        );

        Ok(files)
    }

    fn server_interface(&self, address: Ipv4Addr, private: &str) -> String {
        let s = self.settings;
        normalize(&format!(
            "
            [Interface]
            Address = {address}/{prefix}
            PostUp = {post_up}
            PostDown = {post_down}
            ListenPort = {port}
            PrivateKey = {private}
            ",
            prefix = s.subnet.prefix_len(),
            post_up = s.post_up,
            post_down = s.post_down,
            port = s.listen_port,
        ))
    }

    // wg-quick reads keys case-insensitively; `AllowedIps` matches configs already deployed
    fn server_peer(&self, client_name: &str, public: &str, address: Ipv4Addr) -> String {
        normalize(&format!(
            "
            [Peer]
            # {client_name}
            PublicKey = {public}
            AllowedIps = {address}/32
            "
        ))
    }

    fn client_file(
        &self,
        private: &str,
        address: Ipv4Addr,
        server_public: &str,
        endpoint: &str,
    ) -> String {
        let s = self.settings;
        normalize(&format!(
            "
            [Interface]
            PrivateKey = {private}
            Address = {address}/{prefix}
            DNS = {dns}

            [Peer]
            PublicKey = {server_public}
            AllowedIPs = {allowed}
            Endpoint = {endpoint}
            PersistentKeepalive = {keepalive}
            ",
            prefix = s.subnet.prefix_len(),
            dns = s.dns,
            allowed = s.client_allowed_ips,
            keepalive = s.persistent_keepalive,
        ))
    }
}

/// Write rendered files into `dir`, creating it if needed
pub fn write_all(dir: &Path, files: &[RenderedFile]) -> Result<Vec<PathBuf>, RenderError> {
    let fs_error = |op: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| RenderError::FileSystem { op, path, source }
    };

    fs::create_dir_all(dir).map_err(fs_error("create directory", dir))?;

    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = dir.join(&file.name);
        fs::write(&path, &file.content).map_err(fs_error("write", &path))?;
        println!("Wireguard config -> {}", path.display());
        written.push(path);
    }

    info!("Wrote {} interface files to {}", written.len(), dir.display());
    Ok(written)
}
