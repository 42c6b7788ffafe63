//! Script discovery from instance metadata
//!
//! Each script type is looked up under two attributes, `<type>-script-url`
//! and `<type>-script`, always in that order. The order of the returned
//! scripts is the order they will run in.

use tracing::{debug, error, info};

use super::resolver::{ResolvedScript, SourceResolver};
use crate::{MetadataMap, ScriptType};

/// Kind of metadata attribute a script reference can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// `<type>-script-url`: http(s) URL or object storage locator
    RemoteReference,
    /// `<type>-script`: absolute local path or base64 payload
    InlineOrLocal,
}

impl AttributeKind {
    /// Consultation order, which is also execution order
    pub const ORDER: [AttributeKind; 2] = [
        AttributeKind::RemoteReference,
        AttributeKind::InlineOrLocal,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            AttributeKind::RemoteReference => "script-url",
            AttributeKind::InlineOrLocal => "script",
        }
    }

    /// Metadata key for this attribute under a script type
    pub fn key(&self, script_type: ScriptType) -> String {
        format!("{}-{}", script_type, self.suffix())
    }
}

/// Resolve every script reference present in the metadata for a script type
///
/// References that cannot be resolved are logged and skipped.
pub async fn discover(
    script_type: ScriptType,
    metadata: &MetadataMap,
    resolver: &SourceResolver,
) -> Vec<ResolvedScript> {
    let mut scripts = Vec::new();

    for kind in AttributeKind::ORDER {
        let key = kind.key(script_type);
        let Some(value) = metadata.get(&key) else {
            debug!("{} not set in metadata", key);
            continue;
        };

        info!("Found {} in metadata", key);
        debug!("{} = {}", key, value);

        let result = match kind {
            AttributeKind::RemoteReference => resolver.resolve_remote(value).await,
            AttributeKind::InlineOrLocal => resolver.resolve_inline_or_local(value).await,
        };

        match result {
            Ok(script) => {
                debug!("{} resolved to {}", key, script.path.display());
                scripts.push(script);
            }
            Err(e) => error!("error retrieving {}: {}", key, e),
        }
    }

    scripts
}
