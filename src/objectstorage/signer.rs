//! OCI HTTP request signatures
//!
//! Implements the `rsa-sha256` signature scheme OCI services expect in the
//! `Authorization` header.
//! <https://docs.oracle.com/en-us/iaas/Content/API/Concepts/signingrequests.htm>

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Method, Url};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};

use crate::ScriptError;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Signs requests with a single key
pub(crate) struct RequestSigner<'a> {
    key_id: &'a str,
    key: &'a RsaPrivateKey,
}

impl<'a> RequestSigner<'a> {
    pub(crate) fn new(key_id: &'a str, key: &'a RsaPrivateKey) -> Self {
        Self { key_id, key }
    }

    /// Headers to attach to a request, `authorization` included
    ///
    /// Requests with a body are signed as JSON with a body digest.
    pub(crate) fn headers(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
    ) -> Result<Vec<(&'static str, String)>, ScriptError> {
        let host = host_header(url)
            .ok_or_else(|| ScriptError::Auth(format!("no host in url '{url}'")))?;

        let mut headers: Vec<(&'static str, String)> = vec![
            ("date", http_date()),
            ("(request-target)", request_target(method, url)),
            ("host", host),
        ];

        if let Some(body) = body {
            headers.push(("content-length", body.len().to_string()));
            headers.push(("content-type", JSON_CONTENT_TYPE.to_string()));
            headers.push(("x-content-sha256", BASE64.encode(Sha256::digest(body))));
        }

        let signature = self.sign(&signing_string(&headers))?;
        let names: Vec<&str> = headers.iter().map(|(name, _)| *name).collect();
        let authorization = format!(
            r#"Signature version="1",headers="{}",keyId="{}",algorithm="rsa-sha256",signature="{}""#,
            names.join(" "),
            self.key_id,
            signature
        );

        // (request-target) and host are implied by the request line; reqwest
        // sets content-length itself
        headers.retain(|(name, _)| {
            !matches!(*name, "(request-target)" | "host" | "content-length")
        });
        headers.push(("authorization", authorization));

        Ok(headers)
    }

    fn sign(&self, data: &str) -> Result<String, ScriptError> {
        let signing_key = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key
            .try_sign(data.as_bytes())
            .map_err(|e| ScriptError::Auth(format!("signing failed: {e}")))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }
}

/// RFC 7231 date in GMT
fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn request_target(method: &Method, url: &Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn signing_string(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}
