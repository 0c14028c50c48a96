//! Binary encoding of the stored header component.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! b"RVCH" | u32 version | u32 count | count * (u32 len | len bytes of UTF-8)
//! ```
//!
//! Any short read, trailing bytes, wrong magic, unknown version or invalid
//! UTF-8 is reported as [`Error::CorruptEntry`].

use crate::Error;

const MAGIC: &[u8; 4] = b"RVCH";
const VERSION: u32 = 1;

pub fn encode_headers(headers: &[String]) -> Vec<u8> {
    let payload: usize = headers.iter().map(|h| 4 + h.len()).sum();
    let mut out = Vec::with_capacity(12 + payload);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(headers.len() as u32).to_le_bytes());
    for header in headers {
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
    }
    out
}

pub fn decode_headers(bytes: &[u8]) -> Result<Vec<String>, Error> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(Error::CorruptEntry("header blob has wrong magic".into()));
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(Error::CorruptEntry(format!("unsupported header blob version {version}")));
    }

    let count = reader.u32()? as usize;
    // Each line needs at least its length prefix.
    if count > reader.remaining() / 4 {
        return Err(Error::CorruptEntry(format!("header count {count} exceeds blob size")));
    }

    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.u32()? as usize;
        let raw = reader.take(len)?;
        let line = std::str::from_utf8(raw)
            .map_err(|e| Error::CorruptEntry(format!("header line is not UTF-8: {e}")))?;
        headers.push(line.to_owned());
    }

    if reader.remaining() != 0 {
        return Err(Error::CorruptEntry(format!("{} trailing bytes after header lines", reader.remaining())));
    }

    Ok(headers)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if len > self.remaining() {
            return Err(Error::CorruptEntry(format!(
                "header blob truncated: wanted {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<String> {
        vec!["HTTP/1.1 200 OK".to_string(), "Content-Type: text/plain".to_string(), "X-Note: ünïcode".to_string()]
    }

    #[test]
    fn test_preserves_order_and_content() {
        let decoded = decode_headers(&encode_headers(&sample())).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_empty_list() {
        let encoded = encode_headers(&[]);
        assert_eq!(encoded.len(), 12);
        assert!(decode_headers(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let encoded = encode_headers(&sample());
        for cut in [0, 3, 8, 11, encoded.len() - 1] {
            let result = decode_headers(&encoded[..cut]);
            assert!(matches!(result, Err(Error::CorruptEntry(_))), "cut at {cut}");
        }
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut encoded = encode_headers(&sample());
        encoded.push(0);
        assert!(matches!(decode_headers(&encoded), Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn test_wrong_magic_and_version() {
        let mut encoded = encode_headers(&sample());
        encoded[0] = b'X';
        assert!(matches!(decode_headers(&encoded), Err(Error::CorruptEntry(_))));

        let mut encoded = encode_headers(&sample());
        encoded[4] = 2;
        assert!(matches!(decode_headers(&encoded), Err(Error::CorruptEntry(msg)) if msg.contains("version")));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let mut encoded = encode_headers(&["ab".to_string()]);
        let last = encoded.len() - 1;
        encoded[last] = 0xff;
        assert!(matches!(decode_headers(&encoded), Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn test_huge_count_is_rejected_without_allocating() {
        let mut encoded = encode_headers(&[]);
        encoded[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode_headers(&encoded), Err(Error::CorruptEntry(_))));
    }
}
