//! Contract between the cache controller and whatever retrieves origin content.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::Error;

/// Per-call limits the fetcher must enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// A body reaching this many bytes fails with [`Error::SizeExceeded`].
    pub max_bytes: usize,
    pub timeout: Duration,
}

/// What a successful fetch captured from the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// Raw header lines in the order the origin sent them, e.g. `Content-Type: text/plain`.
    pub headers: Vec<String>,
    pub body: Bytes,
}

/// Retrieves a resource from its origin.
///
/// Implementations fail with [`Error::Fetch`] for network errors, timeouts
/// and non-retrievable URLs, and with [`Error::SizeExceeded`] when the body
/// would reach `limits.max_bytes`. Partial bodies are never returned.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, limits: FetchLimits) -> Result<FetchedResource, Error>;
}
