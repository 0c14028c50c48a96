//! On-disk entry storage.
//!
//! Each key owns two components under the cache root: `<key>.header` holds
//! the encoded header lines and `<key>.content` holds the raw body. Callers
//! are expected to hold the key's lock from [`super::lock`] around every call.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;

use super::hash::CacheKey;
use super::header::{decode_headers, encode_headers};
use crate::Error;

const HEADER_EXT: &str = "header";
const BODY_EXT: &str = "content";

/// Summary of a stored entry, for inspection tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStat {
    pub key: CacheKey,
    pub headers: Vec<String>,
    pub body_len: u64,
    pub last_written: Option<SystemTime>,
}

/// Filesystem-backed entry store rooted at one directory.
#[derive(Debug, Clone)]
pub struct EntryStore {
    root: PathBuf,
}

impl EntryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn header_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name(HEADER_EXT))
    }

    pub fn body_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name(BODY_EXT))
    }

    /// True iff the header component is on disk.
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.header_path(key).is_file()
    }

    /// Modification time of the body component.
    pub fn last_written(&self, key: &CacheKey) -> Option<SystemTime> {
        fs::metadata(self.body_path(key)).and_then(|m| m.modified()).ok()
    }

    /// Whether the body was written no more than `ttl` before `now`.
    ///
    /// Only entries strictly older than `ttl` are stale. Unreadable metadata counts as stale.
    pub fn is_fresh(&self, key: &CacheKey, ttl: Duration, now: SystemTime) -> bool {
        let Some(written) = self.last_written(key) else {
            return false;
        };
        match now.checked_sub(ttl) {
            Some(threshold) => written >= threshold,
            None => true,
        }
    }

    /// Decode the stored header lines.
    pub fn read_headers(&self, key: &CacheKey) -> Result<Vec<String>, Error> {
        let mut file = File::open(self.header_path(key))?;
        let expected = file.metadata()?.len();

        let mut blob = Vec::with_capacity(expected as usize);
        let read = file.read_to_end(&mut blob)?;
        if read as u64 != expected {
            return Err(Error::CorruptEntry(format!("header component for {key}: read {read} of {expected} bytes")));
        }

        decode_headers(&blob)
    }

    /// Raw stored body. A missing body component reads as empty.
    pub fn read_body(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
        match fs::read(self.body_path(key)) {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace both components of an entry.
    ///
    /// Both components are staged in the cache root and verified before
    /// anything is renamed into place. The body is published first and the
    /// header last. A failed write leaves the previous pair intact.
    pub fn write(&self, key: &CacheKey, headers: &[String], body: &[u8]) -> Result<(), Error> {
        fs::create_dir_all(&self.root)?;

        let body_tmp = self.stage("body", body)?;
        let header_tmp = self.stage("header", &encode_headers(headers))?;
        publish(body_tmp, &self.body_path(key), header_tmp, &self.header_path(key))?;

        tracing::debug!(key = %key, headers = headers.len(), bytes = body.len(), "entry written");
        Ok(())
    }

    /// Inspect an entry without returning its body.
    pub fn stat(&self, key: &CacheKey) -> Result<Option<EntryStat>, Error> {
        if !self.exists(key) {
            return Ok(None);
        }

        let headers = self.read_headers(key)?;
        let body_len = match fs::metadata(self.body_path(key)) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(EntryStat { key: key.clone(), headers, body_len, last_written: self.last_written(key) }))
    }

    fn stage(&self, component: &'static str, bytes: &[u8]) -> Result<NamedTempFile, Error> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        let written = write_counted(tmp.as_file_mut(), bytes)?;
        if written != bytes.len() {
            return Err(Error::IncompleteWrite { component, expected: bytes.len(), written });
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_data()?;
        Ok(tmp)
    }
}

/// Rename the staged body and header into place, in that order.
///
/// The current body is parked next to itself until the header lands. If
/// either rename fails the parked body is moved back (keeping its mtime), or
/// the new body is removed when there was none before, so the old header is
/// never left paired with a new body.
fn publish(
    body_tmp: NamedTempFile,
    body_dest: &Path,
    header_tmp: NamedTempFile,
    header_dest: &Path,
) -> Result<(), Error> {
    let parked = parked_path(body_dest);
    let had_body = match fs::rename(body_dest, &parked) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    let published = body_tmp
        .persist(body_dest)
        .and_then(|_| header_tmp.persist(header_dest))
        .map_err(|e| e.error);

    match published {
        Ok(_) => {
            if had_body && let Err(e) = fs::remove_file(&parked) {
                tracing::warn!(path = %parked.display(), error = %e, "failed to remove parked body");
            }
            Ok(())
        }
        Err(e) => {
            let rollback = if had_body { fs::rename(&parked, body_dest) } else { fs::remove_file(body_dest) };
            match rollback {
                Ok(()) => {}
                Err(re) if !had_body && re.kind() == io::ErrorKind::NotFound => {}
                Err(re) => {
                    tracing::error!(path = %body_dest.display(), error = %re, "failed to restore previous body")
                }
            }
            Err(e.into())
        }
    }
}

fn parked_path(body_dest: &Path) -> PathBuf {
    let mut name = body_dest.as_os_str().to_owned();
    name.push(".prev");
    PathBuf::from(name)
}

/// Write as much of `bytes` as the sink accepts, returning the count that landed.
fn write_counted(sink: &mut impl Write, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match sink.write(&bytes[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
