//! Error types for oci-metadata-scripts

use thiserror::Error;

/// Main error type for script acquisition and execution
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("unknown script type: {0}")]
    UnknownScriptType(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Work directory error: {0}")]
    WorkDir(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request to '{url}' returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("error decoding base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("source file '{0}' is not a regular file")]
    NotRegularFile(String),

    #[error("could not read source '{reference}': {message}")]
    Resolve { reference: String, message: String },

    #[error("unsupported script reference '{0}'")]
    UnsupportedReference(String),

    #[error("could not parse object storage location from '{0}'")]
    InvalidObjectLocation(String),

    #[error("object '{object}' declared {declared:?} bytes but {read} were read")]
    LengthMismatch {
        object: String,
        declared: Option<u64>,
        read: u64,
    },

    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Script '{script}' failed: {message}")]
    Execution { script: String, message: String },
}

impl ScriptError {
    /// Create a resolution error for a script reference
    pub fn resolve(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create an execution error for a script
    pub fn execution(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            script: script.into(),
            message: message.into(),
        }
    }
}
