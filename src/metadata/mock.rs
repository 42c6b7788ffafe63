//! Mock metadata source for testing
//!
//! Provides a configurable metadata source that can be used in unit tests.

use async_trait::async_trait;

use super::{MetadataMap, MetadataSource};
use crate::ScriptError;

/// Mock metadata source for testing
///
/// # Example
/// ```
/// use oci_metadata_scripts::metadata::mock::MockMetadata;
///
/// let mock = MockMetadata::new()
///     .with_attribute("startup-script", "ZWNobyBoaQ==");
/// ```
pub struct MockMetadata {
    metadata: MetadataMap,
    error: Option<String>,
}

impl MockMetadata {
    /// Create a new mock with no attributes
    pub fn new() -> Self {
        Self {
            metadata: MetadataMap::new(),
            error: None,
        }
    }

    /// Add a metadata attribute
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Configure to return an error
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

impl Default for MockMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataSource for MockMetadata {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn get_metadata(&self) -> Result<MetadataMap, ScriptError> {
        if let Some(error) = &self.error {
            return Err(ScriptError::Metadata(error.clone()));
        }

        Ok(self.metadata.clone())
    }
}
