//! OCI Object Storage client
//!
//! Just enough of the Object Storage REST API to download a script:
//! `GET /n/{namespace}/b/{bucket}/o/{object}`, signed with the credentials
//! of the configured [`Authenticator`].

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::auth::Authenticator;
use super::signer::RequestSigner;
use super::{ObjectContent, ObjectLocation, ObjectStore};
use crate::ScriptError;

/// Object storage client for OCI
pub struct OciObjectStorage {
    client: Client,
    authenticator: Arc<dyn Authenticator>,
    endpoint: Option<String>,
}

impl OciObjectStorage {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Result<Self, ScriptError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            authenticator,
            endpoint: None,
        })
    }

    /// Use a fixed endpoint instead of the regional one
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }
}

/// Build the object URL; each component is encoded as a single path segment
fn object_url(endpoint: &str, location: &ObjectLocation) -> Result<Url, ScriptError> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        ScriptError::ObjectStorage(format!("invalid endpoint '{endpoint}': {e}"))
    })?;

    url.path_segments_mut()
        .map_err(|_| ScriptError::ObjectStorage(format!("invalid endpoint '{endpoint}'")))?
        .pop_if_empty()
        .extend([
            "n",
            location.namespace.as_str(),
            "b",
            location.bucket.as_str(),
            "o",
            location.object.as_str(),
        ]);

    Ok(url)
}

#[async_trait]
impl ObjectStore for OciObjectStorage {
    async fn get_object(&self, location: &ObjectLocation) -> Result<ObjectContent, ScriptError> {
        let credentials = self.authenticator.credentials().await?;

        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "https://objectstorage.{}.{}",
                credentials.region, credentials.realm_domain
            ),
        };
        let url = object_url(&endpoint, location)?;
        debug!("Fetching object {}", url);

        let signer = RequestSigner::new(&credentials.key_id, &credentials.key);
        let mut request = self.client.get(url.clone());
        for (name, value) in signer.headers(&Method::GET, &url, None)? {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ScriptError::ObjectStorage(format!(
                "fetching '{}' returned {}",
                location,
                response.status()
            )));
        }

        let content_length = response.content_length();
        let data = response.bytes().await?.to_vec();
        debug!(
            "bucket object size {:?} and read size {}",
            content_length,
            data.len()
        );

        Ok(ObjectContent {
            data,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(object: &str) -> ObjectLocation {
        ObjectLocation {
            bucket: "scripts".to_string(),
            namespace: "acme".to_string(),
            object: object.to_string(),
        }
    }

    #[test]
    fn test_object_url() {
        let url = object_url(
            "https://objectstorage.us-ashburn-1.oraclecloud.com",
            &location("boot.sh"),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://objectstorage.us-ashburn-1.oraclecloud.com/n/acme/b/scripts/o/boot.sh"
        );
    }

    #[test]
    fn test_object_url_encodes_nested_path() {
        let url = object_url("http://127.0.0.1:9000/", &location("dir/sub dir/run.sh")).unwrap();
        assert_eq!(url.path(), "/n/acme/b/scripts/o/dir%2Fsub%20dir%2Frun.sh");
    }

    #[test]
    fn test_object_url_invalid_endpoint() {
        assert!(object_url("not a url", &location("x")).is_err());
    }
}
