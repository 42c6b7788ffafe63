//! oci-metadata-scripts library
//!
//! Discovers startup and shutdown scripts declared in OCI instance metadata,
//! gathers them into a private working directory and runs them one at a time.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Keep Going**: A script that cannot be fetched or fails to run is logged
//!   and skipped; the rest of the batch still runs
//! - **Ordered**: Scripts run strictly one after another, in discovery order

pub mod metadata;
pub mod objectstorage;
pub mod scripts;
pub mod workdir;

mod error;

pub use error::ScriptError;
pub use metadata::MetadataMap;
pub use scripts::{RunSummary, ScriptPipeline};
pub use workdir::WorkDir;

use std::str::FromStr;

/// Lifecycle phase a run is executing scripts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// Scripts run when the instance boots
    Startup,
    /// Scripts run when the instance is stopping
    Shutdown,
}

impl ScriptType {
    /// Metadata key prefix and CLI spelling for this script type
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Startup => "startup",
            ScriptType::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(ScriptType::Startup),
            "shutdown" => Ok(ScriptType::Shutdown),
            other => Err(ScriptError::UnknownScriptType(other.to_string())),
        }
    }
}
