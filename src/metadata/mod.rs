//! Instance metadata sources
//!
//! The pipeline only needs the instance's user-supplied metadata attributes,
//! as a flat map of attribute name to string value.

pub mod mock;
pub mod oci;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::ScriptError;

/// Attribute name to value, as read from the instance metadata
pub type MetadataMap = HashMap<String, String>;

/// Trait for instance metadata providers
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Name of this source (e.g., "OCI", "Mock")
    fn name(&self) -> &'static str;

    /// Fetch the instance's metadata attributes
    ///
    /// A failure here is fatal for the whole run.
    async fn get_metadata(&self) -> Result<MetadataMap, ScriptError>;
}
