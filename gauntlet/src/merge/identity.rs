//! Dedup identity keys for sources and fragments.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::state::{KnowledgeFragment, Source};

/// Decides when two sources or two fragments are the same item.
///
/// Two items with equal keys are duplicates: the first one merged is kept and later
/// ones are dropped (their ids become aliases of the kept id).
pub trait IdentityPolicy: Send + Sync + Debug {
    fn source_key(&self, source: &Source) -> String;

    fn fragment_key(&self, fragment: &KnowledgeFragment) -> String {
        content_hash(&fragment.text)
    }
}

/// Which source field identifies a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKey {
    #[default]
    NormalizedUrl,
    Id,
}

/// Built-in policy: sources by [`SourceKey`], fragments by content hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIdentity {
    pub source_key: SourceKey,
}

impl DefaultIdentity {
    pub fn new(source_key: SourceKey) -> Self {
        Self { source_key }
    }
}

impl IdentityPolicy for DefaultIdentity {
    fn source_key(&self, source: &Source) -> String {
        match self.source_key {
            SourceKey::NormalizedUrl => normalize_url(&source.url),
            SourceKey::Id => source.id.clone(),
        }
    }
}

/// Lowercases scheme and host, drops the fragment, the default port and a trailing slash.
///
/// Strings that do not parse as URLs are compared trimmed and lowercased.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return trimmed.to_lowercase(),
    };
    url.set_fragment(None);
    // `Url` already lowercases scheme/host and elides the scheme's default port.
    let mut s = url.to_string();
    if url.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Hex SHA-256 of the lowercased text with whitespace runs collapsed.
pub fn content_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{:x}", digest)
}
