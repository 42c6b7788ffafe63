//! Object storage access for `oci` script references
//!
//! A reference has the form `oci://<bucket>@<namespace>/<object path>`; the
//! object path may itself contain `/`.

pub mod auth;
pub mod oci;
mod signer;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::ScriptError;

pub use auth::{Authenticator, Credentials, InstancePrincipal};
pub use oci::OciObjectStorage;

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9\-_]+)@([a-zA-Z0-9\-_]+)/(.+)").expect("valid regex")
});

/// Bucket, namespace and object name of a stored script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub namespace: String,
    pub object: String,
}

impl ObjectLocation {
    /// Parse `<bucket>@<namespace>/<object>` out of a script reference
    pub fn parse(reference: &str) -> Result<Self, ScriptError> {
        let caps = LOCATION_RE
            .captures(reference)
            .ok_or_else(|| ScriptError::InvalidObjectLocation(reference.to_string()))?;

        Ok(Self {
            bucket: caps[1].to_string(),
            namespace: caps[2].to_string(),
            object: caps[3].to_string(),
        })
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.bucket, self.namespace, self.object)
    }
}

/// Body of a fetched object and the length the server declared for it
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub data: Vec<u8>,
    pub content_length: Option<u64>,
}

impl ObjectContent {
    /// True when the number of bytes read matches the declared length
    pub fn is_complete(&self) -> bool {
        self.content_length == Some(self.data.len() as u64)
    }
}

/// Trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a whole object
    async fn get_object(&self, location: &ObjectLocation) -> Result<ObjectContent, ScriptError>;
}
