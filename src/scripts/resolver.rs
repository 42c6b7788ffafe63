//! Script source resolution
//!
//! Turns a script reference from the metadata into an executable file in the
//! working directory. `*-script` values are either an absolute path on the
//! host or a base64 payload; `*-script-url` values are an `http(s)` URL or an
//! `oci://bucket@namespace/object` locator.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::ScriptError;
use crate::objectstorage::{ObjectLocation, ObjectStore};

/// Mode given to every resolved script (rwxr--r--)
pub const SCRIPT_MODE: u32 = 0o744;

/// Prefix for the generated names of inline scripts
const INLINE_PREFIX: &str = "script";

/// A script materialized in the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScript {
    /// File name inside the working directory
    pub name: String,
    /// Full path of the file
    pub path: PathBuf,
}

/// Resolves script references into files in a working directory
pub struct SourceResolver {
    work_dir: PathBuf,
    http: Client,
    object_store: Arc<dyn ObjectStore>,
}

impl SourceResolver {
    pub fn new(
        work_dir: impl AsRef<Path>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ScriptError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            http,
            object_store,
        })
    }

    /// Resolve a `*-script` value: a local absolute path or a base64 payload
    pub async fn resolve_inline_or_local(
        &self,
        value: &str,
    ) -> Result<ResolvedScript, ScriptError> {
        let script = if value.starts_with('/') {
            self.copy_local(value).await?
        } else {
            self.decode_inline(value).await?
        };

        set_executable(&script.path).await?;
        Ok(script)
    }

    /// Resolve a `*-script-url` value: an http(s) URL or an object storage locator
    pub async fn resolve_remote(&self, value: &str) -> Result<ResolvedScript, ScriptError> {
        let name = remote_name(value)?;

        let data = if value.starts_with("http") {
            self.download(value).await?
        } else if value.starts_with("oci") {
            self.fetch_object(value).await?
        } else {
            return Err(ScriptError::UnsupportedReference(value.to_string()));
        };

        let path = self.work_dir.join(&name);
        write_new(&path, &data)
            .await
            .map_err(|e| ScriptError::resolve(value, e))?;
        set_executable(&path).await?;
        debug!("wrote {} bytes to script file '{}'", data.len(), path.display());

        Ok(ResolvedScript { name, path })
    }

    async fn copy_local(&self, source: &str) -> Result<ResolvedScript, ScriptError> {
        let metadata = fs::metadata(source)
            .await
            .map_err(|e| ScriptError::resolve(source, e.to_string()))?;
        if !metadata.is_file() {
            return Err(ScriptError::NotRegularFile(source.to_string()));
        }

        let name = Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ScriptError::resolve(source, "path has no file name"))?;
        let path = self.work_dir.join(&name);

        let data = fs::read(source)
            .await
            .map_err(|e| ScriptError::resolve(source, format!("error reading script file: {e}")))?;
        write_new(&path, &data)
            .await
            .map_err(|e| ScriptError::resolve(source, e))?;
        debug!("copied {} bytes of script file to work dir", data.len());

        Ok(ResolvedScript { name, path })
    }

    async fn decode_inline(&self, payload: &str) -> Result<ResolvedScript, ScriptError> {
        // line breaks are allowed inside the payload
        let cleaned: String = payload.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        let data = BASE64.decode(cleaned)?;

        let (file, path) = tempfile::Builder::new()
            .prefix(INLINE_PREFIX)
            .tempfile_in(&self.work_dir)?
            .keep()
            .map_err(|e| e.error)?;
        drop(file);

        fs::write(&path, &data).await?;
        debug!("wrote {} bytes to script file '{}'", data.len(), path.display());

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ScriptError::resolve(payload, "generated file has no name"))?;

        Ok(ResolvedScript { name, path })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ScriptError> {
        debug!("Fetching remote script: {}", url);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ScriptError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_object(&self, reference: &str) -> Result<Vec<u8>, ScriptError> {
        let location = ObjectLocation::parse(reference)?;
        let content = self.object_store.get_object(&location).await?;

        if !content.is_complete() {
            return Err(ScriptError::LengthMismatch {
                object: location.to_string(),
                declared: content.content_length,
                read: content.data.len() as u64,
            });
        }

        Ok(content.data)
    }
}

/// File name for a remote script: the last `/` separated segment of the reference
fn remote_name(reference: &str) -> Result<String, ScriptError> {
    match reference.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name.to_string()),
        _ => Err(ScriptError::resolve(
            reference,
            "reference does not end in a file name",
        )),
    }
}

/// Write `data` to a file that must not exist yet
async fn write_new(path: &Path, data: &[u8]) -> Result<(), String> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => format!(
                "work directory already holds a script named '{}'",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            _ => format!("error creating script file '{}': {e}", path.display()),
        })?;

    let written = match file.write_all(data).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    written.map_err(|e| format!("error writing script file '{}': {e}", path.display()))
}

async fn set_executable(path: &Path) -> Result<(), ScriptError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, std::fs::Permissions::from_mode(SCRIPT_MODE))
            .await
            .map_err(|e| {
                ScriptError::resolve(
                    path.display().to_string(),
                    format!("error on chmod of dest file: {e}"),
                )
            })?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstorage::ObjectContent;
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Object store returning canned content and recording requests
    struct StaticStore {
        content: ObjectContent,
        requests: Mutex<Vec<ObjectLocation>>,
    }

    impl StaticStore {
        fn new(data: &[u8], content_length: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                content: ObjectContent {
                    data: data.to_vec(),
                    content_length,
                },
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ObjectStore for StaticStore {
        async fn get_object(
            &self,
            location: &ObjectLocation,
        ) -> Result<ObjectContent, ScriptError> {
            self.requests.lock().unwrap().push(location.clone());
            Ok(self.content.clone())
        }
    }

    fn resolver(dir: &TempDir, store: Arc<StaticStore>) -> SourceResolver {
        SourceResolver::new(dir.path(), store).unwrap()
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_local_copy() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("boot.sh");
        std::fs::write(&src, b"#!/bin/bash\necho boot\n").unwrap();

        let work = TempDir::new().unwrap();
        let script = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local(src.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(script.name, "boot.sh");
        assert_eq!(script.path, work.path().join("boot.sh"));
        assert_eq!(std::fs::read(&script.path).unwrap(), b"#!/bin/bash\necho boot\n");
        assert_eq!(mode(&script.path), SCRIPT_MODE);
    }

    #[tokio::test]
    async fn test_local_copy_keeps_existing_script() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path().join("boot.sh");
        std::fs::write(&src, b"echo second\n").unwrap();

        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("boot.sh"), b"echo first\n").unwrap();

        let err = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local(src.to_str().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::Resolve { .. }));
        assert!(err.to_string().contains("boot.sh"));
        assert_eq!(
            std::fs::read(work.path().join("boot.sh")).unwrap(),
            b"echo first\n"
        );
    }

    #[tokio::test]
    async fn test_local_missing() {
        let work = TempDir::new().unwrap();
        let err = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local("/nonexistent/path/boot.sh")
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::Resolve { .. }));
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_local_directory_rejected() {
        let src_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();

        let err = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local(src_dir.path().to_str().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::NotRegularFile(_)));
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_inline_base64() {
        let payload = b"#!/bin/sh\necho hi\n";
        let work = TempDir::new().unwrap();

        let script = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local(&BASE64.encode(payload))
            .await
            .unwrap();

        assert!(script.name.starts_with(INLINE_PREFIX));
        assert!(script.path.starts_with(work.path()));
        assert_eq!(std::fs::read(&script.path).unwrap(), payload);
        assert_eq!(mode(&script.path), SCRIPT_MODE);
    }

    #[tokio::test]
    async fn test_inline_names_are_unique() {
        let work = TempDir::new().unwrap();
        let resolver = resolver(&work, StaticStore::new(b"", None));
        let encoded = BASE64.encode(b"echo same");

        let first = resolver.resolve_inline_or_local(&encoded).await.unwrap();
        let second = resolver.resolve_inline_or_local(&encoded).await.unwrap();
        assert_ne!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_inline_wrapped_base64() {
        let payload = b"#!/bin/sh\necho wrapped output from a long script\n";
        let encoded = BASE64.encode(payload);
        let wrapped = format!("{}\n{}\r\n", &encoded[..20], &encoded[20..]);
        let work = TempDir::new().unwrap();

        let script = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local(&wrapped)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&script.path).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_inline_bad_base64() {
        let work = TempDir::new().unwrap();
        let err = resolver(&work, StaticStore::new(b"", None))
            .resolve_inline_or_local("echo hi; not base64!")
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::Base64(_)));
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_remote_object_storage() {
        let work = TempDir::new().unwrap();
        let store = StaticStore::new(b"echo from bucket\n", Some(17));

        let script = resolver(&work, store.clone())
            .resolve_remote("oci://scripts@acme/path/obj.sh")
            .await
            .unwrap();

        assert_eq!(script.name, "obj.sh");
        assert_eq!(std::fs::read(&script.path).unwrap(), b"echo from bucket\n");
        assert_eq!(mode(&script.path), SCRIPT_MODE);

        let requests = store.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bucket, "scripts");
        assert_eq!(requests[0].namespace, "acme");
        assert_eq!(requests[0].object, "path/obj.sh");
    }

    #[tokio::test]
    async fn test_remote_object_storage_missing_at() {
        let work = TempDir::new().unwrap();
        let store = StaticStore::new(b"echo", Some(4));

        let err = resolver(&work, store.clone())
            .resolve_remote("oci://scripts-acme/path/obj.sh")
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::InvalidObjectLocation(_)));
        assert!(store.requests.lock().unwrap().is_empty());
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_remote_object_storage_length_mismatch() {
        let work = TempDir::new().unwrap();
        let store = StaticStore::new(b"echo trunc", Some(64));

        let err = resolver(&work, store)
            .resolve_remote("oci://scripts@acme/obj.sh")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScriptError::LengthMismatch {
                declared: Some(64),
                read: 10,
                ..
            }
        ));
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_remote_unsupported_scheme() {
        let work = TempDir::new().unwrap();
        let err = resolver(&work, StaticStore::new(b"", None))
            .resolve_remote("ftp://example.com/boot.sh")
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::UnsupportedReference(_)));
        assert_eq!(entries(&work), 0);
    }

    #[test]
    fn test_remote_name() {
        assert_eq!(remote_name("https://example.com/a/b/run.sh").unwrap(), "run.sh");
        assert_eq!(remote_name("oci://b@ns/dir/obj.sh").unwrap(), "obj.sh");
        assert!(remote_name("https://example.com/scripts/").is_err());
        assert!(remote_name("https://example.com/..").is_err());
    }
}
