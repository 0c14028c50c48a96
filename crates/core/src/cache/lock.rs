//! Per-key reader/writer locks shared across tasks and processes.
//!
//! A lock is two layers: a `tokio::sync::RwLock` per key for tasks inside this
//! process, and an advisory `fs2` lock on `<key>.lock` for other processes
//! sharing the cache root. Both are released when the [`EntryLock`] drops.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::hash::CacheKey;
use crate::Error;

const LOCK_EXT: &str = "lock";

/// Prune idle per-key locks once the registry grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
enum ProcessGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// A held lock on one cache key.
///
/// Dropping it releases the file lock first and then the in-process guard.
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    mode: LockMode,
    _guard: ProcessGuard,
}

impl EntryLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Hands out [`EntryLock`]s for keys under one cache root.
///
/// Different keys never contend. There is no acquisition timeout: a holder
/// that never finishes stalls every waiter on the same key.
#[derive(Debug)]
pub struct LockCoordinator {
    root: PathBuf,
    locks: Mutex<HashMap<CacheKey, Arc<RwLock<()>>>>,
}

impl LockCoordinator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Mutex::new(HashMap::new()) }
    }

    pub fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name(LOCK_EXT))
    }

    /// Wait for exclusive access to `key`.
    pub async fn exclusive(&self, key: &CacheKey) -> Result<EntryLock, Error> {
        let guard = ProcessGuard::Exclusive(self.process_lock(key).write_owned().await);
        let file = self.lock_file(key, LockMode::Exclusive).await?;
        Ok(EntryLock { file, mode: LockMode::Exclusive, _guard: guard })
    }

    /// Wait for shared access to `key`.
    pub async fn shared(&self, key: &CacheKey) -> Result<EntryLock, Error> {
        let guard = ProcessGuard::Shared(self.process_lock(key).read_owned().await);
        let file = self.lock_file(key, LockMode::Shared).await?;
        Ok(EntryLock { file, mode: LockMode::Shared, _guard: guard })
    }

    /// Run `f` while holding the exclusive lock for `key`.
    pub async fn with_exclusive<T, F, Fut>(&self, key: &CacheKey, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let _lock = self.exclusive(key).await?;
        f().await
    }

    /// Run `f` while holding a shared lock for `key`.
    pub async fn with_shared<T, F, Fut>(&self, key: &CacheKey, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let _lock = self.shared(key).await?;
        f().await
    }

    fn process_lock(&self, key: &CacheKey) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if map.len() >= PRUNE_THRESHOLD {
            // Only the registry holds an idle lock, and new holders must come through here.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Arc::clone(map.entry(key.clone()).or_default())
    }

    async fn lock_file(&self, key: &CacheKey, mode: LockMode) -> Result<File, Error> {
        let path = self.lock_path(key);
        tokio::task::spawn_blocking(move || open_and_lock(&path, mode))
            .await
            .map_err(|e| Error::LockAcquisition(format!("lock task for {key} failed: {e}")))?
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

fn open_and_lock(path: &Path, mode: LockMode) -> Result<File, Error> {
    let lock_err = |e: std::io::Error| Error::LockAcquisition(format!("{}: {e}", path.display()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(lock_err)?;

    match mode {
        LockMode::Shared => fs2::FileExt::lock_shared(&file),
        LockMode::Exclusive => fs2::FileExt::lock_exclusive(&file),
    }
    .map_err(lock_err)?;

    Ok(file)
}
