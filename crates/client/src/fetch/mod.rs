//! HTTP fetch collaborator with SSRF protection and a hard body cap.
//!
//! ### Header capture
//! - First line is the status line (`HTTP/1.1 200 OK`)
//! - Then every response header as `name: value`. Repeated names are grouped
//!   together at the position of their first occurrence, so interleaved
//!   repeats do not keep their exact received order
//! - Values that are not valid UTF-8 (obs-text) are dropped with a warning
//!
//! ### Safety Gates
//! - Only `http`/`https`
//! - Deny private ranges (RFC1918, link-local, localhost, etc.) unless disabled
//! - Redirects are followed here, one hop at a time, and every hop goes
//!   through the same scheme and address checks as the first request
//! - Max redirects: 5 (configurable)
//! - Body streamed and abandoned as soon as it reaches the byte cap

pub mod ssrf;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::{Client, Response, StatusCode, Version, header};
use std::time::Instant;
use url::Url;

pub use ssrf::{SsrfError, check_url, validate_ip};

use revcache_core::{AppConfig, Error, FetchLimits, FetchedResource, Fetcher};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "revcache/0.1")
    pub user_agent: String,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Refuse hosts resolving to private/reserved addresses (default: true)
    pub block_private_addresses: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "revcache/0.1".to_string(), max_redirects: 5, block_private_addresses: true }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_redirects: config.max_redirects,
            block_private_addresses: config.block_private_addresses,
        }
    }
}

/// reqwest-backed [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        // reqwest never follows redirects itself; `send_following` does, so
        // each hop can be resolved and checked before it is requested.
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Scheme and address checks applied to the first URL and every redirect target.
    async fn check_hop(&self, url: &Url) -> Result<(), Error> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::Fetch(format!("unsupported scheme: {scheme}"))),
        }

        if self.config.block_private_addresses {
            check_url(url).await.map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        }
        Ok(())
    }

    /// GET `url`, following up to `max_redirects` redirects before `deadline`.
    async fn send_following(&self, url: &Url, deadline: Instant) -> Result<Response, Error> {
        let mut current = url.clone();
        let mut hops = 0;

        loop {
            self.check_hop(&current).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Fetch(format!("{url}: timed out")));
            }

            let response = self
                .http
                .get(current.as_str())
                .timeout(remaining)
                .send()
                .await
                .map_err(|e| network_error(url, &e))?;

            let Some(next) = redirect_target(&current, &response)? else {
                return Ok(response);
            };

            hops += 1;
            if hops > self.config.max_redirects {
                return Err(Error::Fetch(format!("{url}: too many redirects")));
            }
            tracing::debug!("{} redirected to {}", current, next);
            current = next;
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, limits: FetchLimits) -> Result<FetchedResource, Error> {
        let start = Instant::now();
        let mut response = self.send_following(url, start + limits.timeout).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{url}: status {}", status.as_u16())));
        }

        if let Some(len) = response.content_length()
            && len >= limits.max_bytes as u64
        {
            return Err(Error::SizeExceeded { limit: limits.max_bytes });
        }

        let headers = capture_headers(&response);

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| network_error(url, &e))? {
            if body.len() + chunk.len() >= limits.max_bytes {
                return Err(Error::SizeExceeded { limit: limits.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(
            "fetched {} in {}ms ({} bytes, {} headers)",
            url,
            start.elapsed().as_millis(),
            body.len(),
            headers.len()
        );

        Ok(FetchedResource { headers, body: body.freeze() })
    }
}

fn network_error(url: &Url, err: &reqwest::Error) -> Error {
    if err.is_timeout() { Error::Fetch(format!("{url}: timed out")) } else { Error::Fetch(format!("{url}: {err}")) }
}

/// Where a 3xx response points, resolved against the URL that produced it.
///
/// Redirect statuses without a `Location` header are returned as-is and fail
/// the success check like any other non-2xx status.
fn redirect_target(current: &Url, response: &Response) -> Result<Option<Url>, Error> {
    if !response.status().is_redirection() {
        return Ok(None);
    }
    let Some(location) = response.headers().get(header::LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|_| Error::Fetch(format!("{current}: redirect location is not valid text")))?;
    current
        .join(location)
        .map(Some)
        .map_err(|e| Error::Fetch(format!("{current}: bad redirect location {location:?}: {e}")))
}

/// Status line followed by the response headers as raw lines.
fn capture_headers(response: &Response) -> Vec<String> {
    let mut lines = Vec::with_capacity(response.headers().len() + 1);
    lines.push(status_line(response.version(), response.status()));
    lines.extend(header_lines(response.headers()));
    lines
}

fn status_line(version: Version, status: StatusCode) -> String {
    format!("{version:?} {status}")
}

fn header_lines(headers: &header::HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers.iter().filter_map(|(name, value)| match std::str::from_utf8(value.as_bytes()) {
        Ok(text) => Some(format!("{name}: {text}")),
        Err(_) => {
            tracing::warn!(header = %name, "dropping header with non-UTF-8 value");
            None
        }
    })
}
