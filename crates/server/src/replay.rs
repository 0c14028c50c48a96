//! Turning a stored entry back into an HTTP response.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use revcache_core::CachedResponse;

/// Headers the server manages itself and must not be copied from the origin.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Replay stored header lines in order, followed by the body.
///
/// A stored status line sets the response status. Lines that are not valid
/// `Name: value` pairs are skipped.
pub fn replay(entry: CachedResponse) -> Response {
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::with_capacity(entry.headers.len());

    for line in &entry.headers {
        if let Some(code) = parse_status_line(line) {
            status = code;
            continue;
        }
        match parse_header_line(line) {
            Some((name, _)) if HOP_BY_HOP.contains(&name.as_str()) => {}
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => tracing::warn!(line = %line, "skipping unparseable stored header"),
        }
    }

    let mut response = Response::new(Body::from(entry.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn parse_status_line(line: &str) -> Option<StatusCode> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    let code = line.split_whitespace().nth(1)?.parse::<u16>().ok()?;
    StatusCode::from_u16(code).ok()
}

fn parse_header_line(line: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = line.split_once(':')?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).ok()?;
    let value = HeaderValue::from_str(value.trim()).ok()?;
    Some((name, value))
}
