//! Generated snapshot handling
//!
//! A run reads the hand-written source document, fills in missing keys and
//! writes the result as the generated snapshot. Before the snapshot is
//! replaced, its current bytes are copied to `config_<sha256>.json` next to
//! it, so previously generated private keys are never lost.
//!
//! Order of operations:
//!
//! 1. Load and validate the source document
//! 2. Inherit keys from the previous snapshot, if one exists
//! 3. Generate any keys still missing
//! 4. Back up the previous snapshot (skipped on the first run)
//! 5. Write the new snapshot via a temporary file and rename

use crate::config::Paths;
use crate::keys::{KeyError, KeyProvider};
use crate::topology::{ensure_keys, inherit_keys, Config};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Malformed topology document {path}: {reason}")]
    MalformedSource { path: PathBuf, reason: String },
    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] KeyError),
    #[error("Failed to {op} {path}: {source}")]
    FileSystem {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Backup {path} does not match the snapshot it was copied from")]
    BackupMismatch { path: PathBuf },
}

impl SnapshotError {
    fn fs<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| SnapshotError::FileSystem {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Outcome of a successful materialization
#[derive(Debug)]
pub struct Materialized {
    pub config: Config,
    /// Where the previous snapshot was copied to, if there was one
    pub backup: Option<PathBuf>,
    /// Number of key pairs newly generated in this run
    pub generated: usize,
}

/// A filled topology that has not been written yet
#[derive(Debug)]
pub struct Pending {
    pub config: Config,
    previous: Option<(Vec<u8>, String)>,
    generated: usize,
    json: String,
}

pub struct Materializer {
    paths: Paths,
}

impl Materializer {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load the source, inherit and generate keys; nothing is written yet
    pub fn prepare(&self, provider: &dyn KeyProvider) -> Result<Pending, SnapshotError> {
        let mut config = load_document(&self.paths.source)?;
        info!(
            "Loaded topology: {} groups, {} clients",
            config.clients.len(),
            config.clients.client_count()
        );

        let previous = self.read_snapshot()?;
        if let Some((bytes, _)) = &previous {
            let old = parse_document(&self.paths.snapshot, bytes)?;
            let inherited = inherit_keys(&mut config, &old);
            debug!("Inherited {} key pairs from previous snapshot", inherited);
        }

        let generated = ensure_keys(&mut config, provider)?;
        info!("Generated {} new key pairs", generated);

        let json = config.to_snapshot_json()?;

        Ok(Pending {
            config,
            previous,
            generated,
            json,
        })
    }

    /// Back up the previous snapshot, then replace it with the pending one
    pub fn commit(&self, pending: Pending) -> Result<Materialized, SnapshotError> {
        let backup = match pending.previous {
            Some((bytes, hash)) => {
                let path = self.backup(&bytes, &hash)?;
                println!("Existing generated config saved as {}\n", path.display());
                Some(path)
            }
            None => None,
        };

        self.persist(&pending.json)?;
        println!(
            "New generated config saved as {snapshot}. If you need to keep generated keys run:\n\
             cp {snapshot} {source}\n",
            snapshot = self.paths.snapshot.display(),
            source = self.paths.source.display()
        );

        Ok(Materialized {
            config: pending.config,
            backup,
            generated: pending.generated,
        })
    }

    /// Current snapshot bytes and their hash, if a snapshot exists
    fn read_snapshot(&self) -> Result<Option<(Vec<u8>, String)>, SnapshotError> {
        let path = &self.paths.snapshot;
        match fs::read(path) {
            Ok(bytes) => {
                let hash = content_hash(&bytes);
                Ok(Some((bytes, hash)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No previous snapshot at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(SnapshotError::fs("read", path)(e)),
        }
    }

    /// Location of the backup for a snapshot with the given hash
    pub fn backup_path(&self, hash: &str) -> PathBuf {
        self.paths
            .snapshot_dir()
            .join(format!("config_{hash}.json"))
    }

    fn backup(&self, bytes: &[u8], hash: &str) -> Result<PathBuf, SnapshotError> {
        let path = self.backup_path(hash);

        fs::write(&path, bytes).map_err(SnapshotError::fs("write backup", &path))?;
        let written = fs::read(&path).map_err(SnapshotError::fs("read back backup", &path))?;
        if content_hash(&written) != hash {
            return Err(SnapshotError::BackupMismatch { path });
        }

        info!("Backed up previous snapshot to {}", path.display());
        Ok(path)
    }

    fn persist(&self, json: &str) -> Result<(), SnapshotError> {
        let snapshot = &self.paths.snapshot;
        let dir = self.paths.snapshot_dir();
        fs::create_dir_all(dir).map_err(SnapshotError::fs("create directory", dir))?;

        let mut tmp = snapshot.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(SnapshotError::fs("write", &tmp))?;
        fs::rename(&tmp, snapshot).map_err(SnapshotError::fs("replace", snapshot))?;

        info!("Wrote snapshot {}", snapshot.display());
        Ok(())
    }
}

/// Read and validate a topology document
pub fn load_document(path: &Path) -> Result<Config, SnapshotError> {
    let bytes = fs::read(path).map_err(SnapshotError::fs("read", path))?;
    parse_document(path, &bytes)
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<Config, SnapshotError> {
    let malformed = |reason: String| SnapshotError::MalformedSource {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
    Config::from_json(content).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathSettings;
    use crate::topology::tests::CountingProvider;
    use tempfile::TempDir;

    const EXAMPLE: &str = r#"{
        "server": {"endpoint": "vpn.example.com:51820"},
        "clients": {"staff": {"names": ["alice", "bob"]}}
    }"#;

    fn setup(source: &str) -> (TempDir, Materializer) {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::resolve(temp_dir.path(), &PathSettings::default());
        fs::create_dir_all(paths.snapshot_dir()).unwrap();
        fs::write(&paths.source, source).unwrap();
        (temp_dir, Materializer::new(paths))
    }

    fn materialize(
        materializer: &Materializer,
        provider: &dyn KeyProvider,
    ) -> Result<Materialized, SnapshotError> {
        let pending = materializer.prepare(provider)?;
        materializer.commit(pending)
    }

    fn backups(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().to_string();
                name.starts_with("config_") && name != "config_latest.json"
            })
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_first_run_writes_snapshot_without_backup() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        let provider = CountingProvider::new();

        let result = materialize(&materializer, &provider).unwrap();

        assert!(result.backup.is_none());
        assert_eq!(result.generated, 3);
        assert!(backups(materializer.paths().snapshot_dir()).is_empty());

        let snapshot = fs::read_to_string(&materializer.paths().snapshot).unwrap();
        let parsed = Config::from_json(&snapshot).unwrap();
        assert_eq!(parsed, result.config);
        assert_eq!(snapshot, result.config.to_snapshot_json().unwrap());
    }

    #[test]
    fn test_second_run_backs_up_previous_snapshot() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        let provider = CountingProvider::new();
        materialize(&materializer, &provider).unwrap();
        let before = fs::read(&materializer.paths().snapshot).unwrap();
        let hash = content_hash(&before);

        let result = materialize(&materializer, &provider).unwrap();

        let backup = result.backup.unwrap();
        assert_eq!(backup, materializer.backup_path(&hash));
        assert_eq!(fs::read(&backup).unwrap(), before);
        // keys came from the previous snapshot
        assert_eq!(result.generated, 0);
        assert_eq!(provider.calls.get(), 3);
    }

    #[test]
    fn test_keys_stable_when_client_added() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        let provider = CountingProvider::new();
        let first = materialize(&materializer, &provider).unwrap().config;

        fs::write(
            &materializer.paths().source,
            r#"{"server": {"endpoint": "vpn.example.com:51820"},
                "clients": {"staff": {"names": ["alice", "bob", "carol"]}}}"#,
        )
        .unwrap();
        let second = materialize(&materializer, &provider).unwrap();

        assert_eq!(second.generated, 1);
        assert_eq!(second.config.server.keys, first.server.keys);
        let old = first.clients.get("staff").unwrap();
        let new = second.config.clients.get("staff").unwrap();
        assert_eq!(new.keys["alice"], old.keys["alice"]);
        assert_eq!(new.keys["bob"], old.keys["bob"]);
        assert!(new.keys.contains_key("carol"));
    }

    #[test]
    fn test_source_keys_win_over_snapshot() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        materialize(&materializer, &CountingProvider::new()).unwrap();

        fs::write(
            &materializer.paths().source,
            r#"{"server": {"endpoint": "h:1", "keys": {"private": "sp", "public": "sP"}},
                "clients": {"staff": {"names": ["alice"]}}}"#,
        )
        .unwrap();
        let result = materialize(&materializer, &CountingProvider::new()).unwrap();

        assert_eq!(result.config.server.keys.unwrap().private, "sp");
    }

    #[test]
    fn test_malformed_source_touches_nothing() {
        let (_temp_dir, materializer) = setup(r#"{"server": {"endpoint": "h:1"}, "clients": {"g": {"names": ["a", "a"]}}}"#);
        let provider = CountingProvider::new();

        let err = materialize(&materializer, &provider).unwrap_err();

        assert!(matches!(err, SnapshotError::MalformedSource { .. }));
        assert!(err.to_string().contains("more than once"));
        assert_eq!(provider.calls.get(), 0);
        assert!(!materializer.paths().snapshot.exists());
    }

    #[test]
    fn test_missing_source_is_filesystem_error() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::resolve(temp_dir.path(), &PathSettings::default());
        let materializer = Materializer::new(paths);

        let err = materialize(&materializer, &CountingProvider::new()).unwrap_err();

        match err {
            SnapshotError::FileSystem { op, path, .. } => {
                assert_eq!(op, "read");
                assert!(path.ends_with("config/config.json"));
            }
            other => panic!("expected FileSystem, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_snapshot_is_not_overwritten() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        fs::write(&materializer.paths().snapshot, "{ not json").unwrap();

        let err = materialize(&materializer, &CountingProvider::new()).unwrap_err();

        assert!(matches!(err, SnapshotError::MalformedSource { .. }));
        assert_eq!(
            fs::read_to_string(&materializer.paths().snapshot).unwrap(),
            "{ not json"
        );
    }

    #[test]
    fn test_serialize_error_display() {
        let source = serde_json::from_str::<Config>("{").unwrap_err();
        let err = SnapshotError::from(source);
        assert!(matches!(err, SnapshotError::Serialize(_)));
        assert!(err.to_string().starts_with("Failed to serialize snapshot"));
    }

    #[test]
    fn test_prepare_writes_nothing() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        let provider = CountingProvider::new();
        materialize(&materializer, &provider).unwrap();
        let before = fs::read(&materializer.paths().snapshot).unwrap();

        fs::write(
            &materializer.paths().source,
            r#"{"server": {"endpoint": "h:1"}, "clients": {"staff": {"names": ["zed"]}}}"#,
        )
        .unwrap();
        let pending = materializer.prepare(&provider).unwrap();

        assert!(pending.config.clients.get("staff").unwrap().keys.contains_key("zed"));
        assert_eq!(fs::read(&materializer.paths().snapshot).unwrap(), before);
        assert!(backups(materializer.paths().snapshot_dir()).is_empty());
    }

    #[test]
    fn test_source_is_never_modified() {
        let (_temp_dir, materializer) = setup(EXAMPLE);
        materialize(&materializer, &CountingProvider::new()).unwrap();
        assert_eq!(
            fs::read_to_string(&materializer.paths().source).unwrap(),
            EXAMPLE
        );
    }
}
