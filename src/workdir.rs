//! Per-run working directory
//!
//! Every run gets a fresh `<script-type>-XXXXXX` directory under the work
//! root. Resolved scripts are written there and nowhere else.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::{ScriptError, ScriptType};

/// Default parent for per-run working directories
pub const WORK_ROOT: &str = "/var/lib/oci";

/// Working directory owned by a single run
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a uniquely named directory for this run under `root`
    pub fn create(root: impl AsRef<Path>, script_type: ScriptType) -> Result<Self, ScriptError> {
        let root = root.as_ref();

        std::fs::create_dir_all(root).map_err(|e| {
            ScriptError::WorkDir(format!("could not create '{}': {}", root.display(), e))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{script_type}-"))
            .tempdir_in(root)
            .map_err(|e| {
                ScriptError::WorkDir(format!(
                    "could not create work directory in '{}': {}",
                    root.display(),
                    e
                ))
            })?;

        debug!("temp work directory is: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory, or leave it in place when `keep` is set
    ///
    /// Returns the path that was kept, if any.
    pub fn finish(self, keep: bool) -> Result<Option<PathBuf>, ScriptError> {
        if keep {
            let path = self.dir.keep();
            debug!("not removing work dir: {}", path.display());
            return Ok(Some(path));
        }

        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            ScriptError::WorkDir(format!("could not remove '{}': {}", path.display(), e))
        })?;
        Ok(None)
    }
}
