//! Instance principal authentication
//!
//! An OCI instance can act as its own principal: the metadata service hands
//! out a leaf certificate and key for the instance, which are exchanged at the
//! auth service for a short-lived security token bound to a session key we
//! generate ourselves. Requests are then signed with the session key.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, Method, Url};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::signer::RequestSigner;
use crate::ScriptError;
use crate::metadata::oci::OciMetadata;

/// Realm domain used when the metadata service does not report one
const DEFAULT_REALM_DOMAIN: &str = "oraclecloud.com";

const SESSION_KEY_BITS: usize = 2048;

/// Subject attribute value prefixes that carry the tenancy OCID
const TENANCY_MARKERS: [&[u8]; 2] = [b"opc-tenant:", b"opc-identity:"];

/// Key material and location used to sign object storage requests
#[derive(Clone)]
pub struct Credentials {
    pub key_id: String,
    pub key: Arc<RsaPrivateKey>,
    pub region: String,
    pub realm_domain: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("realm_domain", &self.realm_domain)
            .finish_non_exhaustive()
    }
}

/// Source of signing credentials
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, ScriptError>;
}

#[derive(Debug, Deserialize)]
struct FederationResponse {
    token: String,
}

/// Authenticates as the instance itself
pub struct InstancePrincipal {
    metadata: OciMetadata,
    client: Client,
    federation_endpoint: Option<String>,
    session_key_bits: usize,
    session: Mutex<Option<Credentials>>,
}

impl InstancePrincipal {
    pub fn new(metadata: OciMetadata) -> Result<Self, ScriptError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            metadata,
            client,
            federation_endpoint: None,
            session_key_bits: SESSION_KEY_BITS,
            session: Mutex::new(None),
        })
    }

    /// Use a fixed federation endpoint instead of the regional one (for testing)
    pub fn with_federation_endpoint(mut self, endpoint: &str) -> Self {
        self.federation_endpoint = Some(endpoint.to_string());
        self
    }

    /// Override the session key size (for testing)
    pub fn with_session_key_bits(mut self, bits: usize) -> Self {
        self.session_key_bits = bits;
        self
    }

    async fn federate(&self) -> Result<Credentials, ScriptError> {
        let cert_pem = self.identity("identity/cert.pem").await?;
        let key_pem = self.identity("identity/key.pem").await?;
        let intermediate_pem = self.identity("identity/intermediate.pem").await?;

        let region = self
            .identity("instance/canonicalRegionName")
            .await?
            .trim()
            .to_string();
        let realm_domain = match self
            .metadata
            .fetch_path("instance/regionInfo/realmDomainComponent")
            .await
        {
            Ok(domain) if !domain.trim().is_empty() => domain.trim().to_string(),
            _ => DEFAULT_REALM_DOMAIN.to_string(),
        };

        let cert_body = pem_body(&cert_pem);
        let cert_der = BASE64
            .decode(&cert_body)
            .map_err(|e| ScriptError::Auth(format!("invalid instance certificate: {e}")))?;
        let tenancy = tenancy_from_certificate(&cert_der)?;
        let key_id = format!("{}/fed-x509/{}", tenancy, fingerprint(&cert_der));
        let instance_key = parse_private_key(&key_pem)?;

        let session_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, self.session_key_bits)
            .map_err(|e| ScriptError::Auth(format!("session key generation failed: {e}")))?;
        let public_pem = session_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ScriptError::Auth(format!("session key encoding failed: {e}")))?;

        let body = serde_json::to_vec(&serde_json::json!({
            "certificate": cert_body,
            "publicKey": pem_body(&public_pem),
            "intermediateCertificates": [pem_body(&intermediate_pem)],
        }))?;

        let endpoint = match &self.federation_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://auth.{region}.{realm_domain}/v1/x509"),
        };
        let url = Url::parse(&endpoint).map_err(|e| {
            ScriptError::Auth(format!("invalid federation endpoint '{endpoint}': {e}"))
        })?;

        debug!("Requesting security token from {}", url);
        let signer = RequestSigner::new(&key_id, &instance_key);
        let mut request = self.client.post(url.clone());
        for (name, value) in signer.headers(&Method::POST, &url, Some(body.as_slice()))? {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(ScriptError::Auth(format!(
                "federation request failed: {}",
                response.status()
            )));
        }
        let federation: FederationResponse = response.json().await?;

        info!("Obtained instance principal token for region {}", region);
        Ok(Credentials {
            key_id: format!("ST${}", federation.token),
            key: Arc::new(session_key),
            region,
            realm_domain,
        })
    }

    async fn identity(&self, path: &str) -> Result<String, ScriptError> {
        self.metadata
            .fetch_path(path)
            .await
            .map_err(|e| ScriptError::Auth(format!("could not read {path}: {e}")))
    }
}

#[async_trait]
impl Authenticator for InstancePrincipal {
    async fn credentials(&self) -> Result<Credentials, ScriptError> {
        let mut session = self.session.lock().await;
        if let Some(credentials) = session.as_ref() {
            return Ok(credentials.clone());
        }

        let credentials = self.federate().await?;
        *session = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Base64 body of a PEM document, without armor lines or line breaks
fn pem_body(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect()
}

/// Colon separated upper-case SHA-1 of a DER certificate
fn fingerprint(der: &[u8]) -> String {
    Sha1::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Pull the tenancy OCID out of the certificate subject
///
/// The subject attribute value starts with the marker and is preceded by its
/// DER length byte.
fn tenancy_from_certificate(der: &[u8]) -> Result<String, ScriptError> {
    for marker in TENANCY_MARKERS {
        let Some(pos) = der.windows(marker.len()).position(|w| w == marker) else {
            continue;
        };

        let end = pos
            .checked_sub(1)
            .map(|i| pos + der[i] as usize)
            .filter(|&end| end <= der.len() && end > pos + marker.len());
        if let Some(end) = end {
            return Ok(String::from_utf8_lossy(&der[pos + marker.len()..end]).into_owned());
        }
    }

    Err(ScriptError::Auth(
        "no tenancy found in instance certificate".to_string(),
    ))
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, ScriptError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| ScriptError::Auth(format!("invalid instance key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;

    #[test]
    fn test_pem_body() {
        let pem = "-----BEGIN CERTIFICATE-----\nQUJD\nREVG\n-----END CERTIFICATE-----\n";
        assert_eq!(pem_body(pem), "QUJDREVG");
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"abc");
        assert_eq!(fp, "A9:99:3E:36:47:06:81:6A:BA:3E:25:71:78:50:C2:6C:9C:D0:D8:9D");
    }

    fn attribute(value: &str) -> Vec<u8> {
        let mut der = vec![0x0c, value.len() as u8];
        der.extend_from_slice(value.as_bytes());
        der
    }

    #[test]
    fn test_tenancy_from_certificate() {
        let mut der = vec![
            0x30, 0x82, 0x01, 0x0a, 0x31, 0x2f, 0x30, 0x2d, 0x06, 0x03, 0x55, 0x04, 0x0b,
        ];
        der.extend(attribute("opc-tenant:ocid1.tenancy.oc1..aaaabbbb"));
        // next RDN starts with a SET tag, which is an ASCII digit
        der.extend_from_slice(&[0x31, 0x2f]);
        der.extend(attribute("opc-instance:ocid1.instance.oc1..cccc"));

        assert_eq!(
            tenancy_from_certificate(&der).unwrap(),
            "ocid1.tenancy.oc1..aaaabbbb"
        );
    }

    #[test]
    fn test_tenancy_identity_fallback() {
        let mut der = vec![0x30, 0x20];
        der.extend(attribute("opc-identity:ocid1.tenancy.oc1..xyz"));
        der.push(0x31);

        assert_eq!(
            tenancy_from_certificate(&der).unwrap(),
            "ocid1.tenancy.oc1..xyz"
        );
    }

    #[test]
    fn test_tenancy_missing() {
        assert!(tenancy_from_certificate(b"no identity here").is_err());
        // marker with no length byte in front of it
        assert!(tenancy_from_certificate(b"opc-tenant:ocid1.tenancy.oc1..t").is_err());
    }

    #[test]
    fn test_parse_private_key_pkcs1() {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 512).unwrap();
        let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        assert_eq!(parse_private_key(&pem).unwrap(), key);
    }

    #[test]
    fn test_parse_private_key_garbage() {
        assert!(parse_private_key("not a key").is_err());
    }
}
