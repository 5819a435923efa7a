//! Throwaway on-disk representation of a submitted program
//!
//! Every pipeline invocation gets its own temp directory holding the source
//! file and any binary built from it. Dropping the unit removes the whole
//! directory, so nothing survives a pipeline on any exit path.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::sanitize::Sanitizer;

/// Name of the compiled program inside the unit directory
pub const BINARY_NAME: &str = if cfg!(windows) { "program.exe" } else { "program" };

/// Submitted C source materialized for one pipeline invocation
pub struct SourceUnit {
    dir: TempDir,
    file_name: String,
    source_path: PathBuf,
}

impl SourceUnit {
    /// Write `source` to a uniquely-named file under `base_dir`
    pub fn create(base_dir: &Path, source: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("csandbox-")
            .tempdir_in(base_dir)
            .context("Failed to create temp directory")?;

        // Timestamp plus random suffix keeps concurrent submissions apart
        let stamp = Local::now().format("%Y%m%d-%H%M%S%3f").to_string();
        let file = tempfile::Builder::new()
            .prefix(&format!("code_{}_", stamp))
            .suffix(".c")
            .rand_bytes(6)
            .tempfile_in(dir.path())
            .context("Failed to create source file")?;
        let (_, source_path) = file
            .keep()
            .context("Failed to persist source file")?;

        std::fs::write(&source_path, source).context("Failed to write source file")?;

        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!("Created source unit {:?}", source_path);

        Ok(Self {
            dir,
            file_name,
            source_path,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Generated basename, e.g. `code_20261016-101500123_Ab9xZq.c`
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn binary_path(&self) -> PathBuf {
        self.dir.path().join(BINARY_NAME)
    }

    /// Sanitizer that scrubs this unit's paths and names
    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new()
            .with_path(self.dir.path())
            .with_basename(&self.file_name)
    }

    /// Delete the directory and everything in it. Failures are logged only.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed source unit {:?}", path),
            Err(e) => warn!("Failed to remove source unit {:?}: {}", path, e),
        }
    }
}
