//! End-to-end generation run
//!
//! 1. Load settings and resolve paths
//! 2. Prepare the snapshot (load, inherit, generate keys)
//! 3. Render every interface file in memory
//! 4. Back up and replace the snapshot
//! 5. Write the interface files
//!
//! Any error before step 4 leaves the disk untouched.

use crate::config::{ConfigError, Paths, Settings};
use crate::keys::KeyProvider;
use crate::render::{write_all, RenderError, Renderer};
use crate::snapshot::{Materializer, SnapshotError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Settings error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    SnapshotError(#[from] SnapshotError),
    #[error("Render error: {0}")]
    RenderError(#[from] RenderError),
}

/// What a run produced
#[derive(Debug)]
pub struct Summary {
    pub snapshot: PathBuf,
    pub backup: Option<PathBuf>,
    pub generated_keys: usize,
    pub files: Vec<PathBuf>,
}

/// Run the whole pipeline against `work_dir`
pub fn run(
    work_dir: &Path,
    settings: &Settings,
    provider: &dyn KeyProvider,
) -> Result<Summary, GenerateError> {
    let paths = Paths::resolve(work_dir, &settings.paths);
    info!("Source document: {}", paths.source.display());

    let materializer = Materializer::new(paths.clone());
    let pending = materializer.prepare(provider)?;

    let rendered = Renderer::new(&settings.render).render(&pending.config)?;

    let materialized = materializer.commit(pending)?;
    let files = write_all(&paths.output_dir, &rendered)?;

    Ok(Summary {
        snapshot: paths.snapshot,
        backup: materialized.backup,
        generated_keys: materialized.generated,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::CountingProvider;
    use std::fs;
    use tempfile::TempDir;

    fn write_source(work_dir: &Path, content: &str) {
        let dir = work_dir.join("config");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), content).unwrap();
    }

    #[test]
    fn test_render_failure_leaves_disk_untouched() {
        let temp_dir = TempDir::new().unwrap();
        write_source(
            temp_dir.path(),
            r#"{"server": {"endpoint": "h:1"}, "clients": {"g": {"names": ["a", "b"]}}}"#,
        );
        let mut settings = Settings::default();
        settings.render.subnet = "10.8.0.0/30".parse().unwrap();

        let err = run(temp_dir.path(), &settings, &CountingProvider::new()).unwrap_err();

        assert!(matches!(err, GenerateError::RenderError(RenderError::SubnetExhausted { .. })));
        assert!(!temp_dir.path().join("config/config_latest.json").exists());
        assert!(!temp_dir.path().join("generated").exists());
    }

    #[test]
    fn test_summary_lists_files() {
        let temp_dir = TempDir::new().unwrap();
        write_source(
            temp_dir.path(),
            r#"{"server": {"endpoint": "h:1"}, "clients": {"g": {"names": ["a"]}}}"#,
        );

        let summary = run(temp_dir.path(), &Settings::default(), &CountingProvider::new()).unwrap();

        assert_eq!(summary.generated_keys, 2);
        assert!(summary.backup.is_none());
        assert_eq!(
            summary.files,
            vec![
                temp_dir.path().join("generated/wg0.conf"),
                temp_dir.path().join("generated/g_a.conf"),
            ]
        );
    }
}
