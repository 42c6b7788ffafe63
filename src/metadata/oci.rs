//! OCI instance metadata service
//!
//! Fetches the instance document from the OCI metadata service.
//! Prefers the v2 endpoints, which require an `Authorization: Bearer Oracle`
//! header, and falls back to v1 on instances where v2 is disabled.
//! <https://docs.oracle.com/en-us/iaas/Content/Compute/Tasks/gettingmetadata.htm>

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{MetadataMap, MetadataSource};
use crate::ScriptError;

/// OCI metadata service base URL (link-local address)
pub const OCI_METADATA_URL: &str = "http://169.254.169.254";

const AUTHORIZATION_VALUE: &str = "Bearer Oracle";

/// API versions in order of preference
const API_VERSIONS: [&str; 2] = ["opc/v2", "opc/v1"];

#[derive(Debug, Deserialize)]
struct InstanceDocument {
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Metadata source backed by the OCI instance metadata service
#[derive(Debug, Clone)]
pub struct OciMetadata {
    client: Client,
    base_url: String,
}

impl OciMetadata {
    pub fn new() -> Result<Self, ScriptError> {
        Self::with_base_url(OCI_METADATA_URL)
    }

    /// Create with a custom base URL (for testing)
    pub fn with_base_url(base_url: &str) -> Result<Self, ScriptError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(2))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a metadata path as text, trying v2 first then falling back to v1
    pub async fn fetch_path(&self, path: &str) -> Result<String, ScriptError> {
        let mut last_err = None;

        for version in API_VERSIONS {
            let url = format!("{}/{}/{}", self.base_url, version, path);
            debug!("Fetching OCI metadata: {}", url);

            let result = self
                .client
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, AUTHORIZATION_VALUE)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.text().await?);
                }
                Ok(response) => {
                    debug!("{} returned {}", url, response.status());
                    last_err = Some(ScriptError::HttpStatus {
                        url,
                        status: response.status().as_u16(),
                    });
                }
                Err(e) => {
                    debug!("{} failed: {}", url, e);
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ScriptError::Metadata(format!("no endpoint for {path}"))))
    }
}

/// Flatten the `metadata` object of an instance document into strings
fn flatten_metadata(document: InstanceDocument) -> MetadataMap {
    document
        .metadata
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

#[async_trait]
impl MetadataSource for OciMetadata {
    fn name(&self) -> &'static str {
        "OCI"
    }

    async fn get_metadata(&self) -> Result<MetadataMap, ScriptError> {
        debug!("Fetching OCI instance metadata");

        let body = self
            .fetch_path("instance/")
            .await
            .map_err(|e| ScriptError::Metadata(e.to_string()))?;
        let document: InstanceDocument = serde_json::from_str(&body)?;

        Ok(flatten_metadata(document))
    }
}
