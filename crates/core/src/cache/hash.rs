//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::Error;

/// Filesystem-safe identifier for one cached resource.
///
/// Lower-case hex SHA-256 of the canonical URL. Never reversed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an already-parsed URL.
    pub fn from_url(url: &Url) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of one of this key's on-disk components, e.g. `<key>.header`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a target URL, requiring an absolute URL with a host.
pub fn parse_target(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty URL".into()));
    }

    let url = Url::parse(trimmed).map_err(|e| Error::InvalidInput(format!("{trimmed}: {e}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidInput(format!("{trimmed}: URL has no host")));
    }

    Ok(url)
}

/// Derive the cache key for a URL string.
pub fn derive_key(url: &str) -> Result<CacheKey, Error> {
    parse_target(url).map(|url| CacheKey::from_url(&url))
}
