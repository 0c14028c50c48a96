//! Reversible URL tokens for inbound requests.
//!
//! A token is the URL in the URL-safe base64 alphabet without padding,
//! optionally followed by `.ext` copied from the URL's last path segment so
//! that intermediaries can guess a content type from the request path.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::Error;
use crate::cache::parse_target;

const MAX_EXTENSION_LEN: usize = 8;

/// Encode an absolute URL into a token.
pub fn encode(url: &str) -> Result<String, Error> {
    let parsed = parse_target(url)?;
    let mut token = URL_SAFE_NO_PAD.encode(url.as_bytes());

    if let Some(ext) = parsed.path_segments().and_then(|mut s| s.next_back()).and_then(extension) {
        token.push('.');
        token.push_str(ext);
    }

    Ok(token)
}

/// Decode a token back into the URL string it was built from.
///
/// Anything after the first `.` is ignored. Trailing `=` padding (raw or as
/// `%3D`) and the standard `+`/`/` alphabet are accepted.
pub fn decode(token: &str) -> Result<String, Error> {
    let data = token.split('.').next().unwrap_or_default().trim();
    let data = strip_padding(data);
    if data.is_empty() {
        return Err(Error::InvalidInput("empty token".into()));
    }

    let normalized: String = data
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("token is not base64: {e}")))?;
    let url = String::from_utf8(bytes).map_err(|_| Error::InvalidInput("token does not decode to UTF-8".into()))?;

    parse_target(&url)?;
    Ok(url)
}

fn strip_padding(mut data: &str) -> &str {
    loop {
        if let Some(rest) = data.strip_suffix('=') {
            data = rest;
        } else if let Some(rest) = data.strip_suffix("%3D").or_else(|| data.strip_suffix("%3d")) {
            data = rest;
        } else {
            return data;
        }
    }
}

fn extension(segment: &str) -> Option<&str> {
    let (stem, ext) = segment.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then_some(ext)
}
