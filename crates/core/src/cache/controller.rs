//! Fetch-or-serve state machine.
//!
//! `ensure_fresh` decides under the key's exclusive lock whether the stored
//! entry can be reused or must be refetched, and writes the new pair inside
//! that same critical section, so at most one fetch per key is in flight.
//! `serve` reads the pair under a shared lock, so it never observes a write
//! in progress.

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use url::Url;

use super::hash::{CacheKey, derive_key, parse_target};
use super::lock::LockCoordinator;
use super::store::{EntryStat, EntryStore};
use crate::Error;
use crate::config::CacheConfig;
use crate::fetch::{FetchLimits, FetchedResource, Fetcher};

/// Source of the current time for freshness decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// What `ensure_fresh` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The stored entry was fresh and left alone.
    Reused,
    /// The origin was fetched and the entry rewritten.
    Fetched,
}

/// A stored entry as handed back to the entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub headers: Vec<String>,
    pub body: Bytes,
}

/// Cache controller handle. Cheap to clone; clones share locks and storage.
#[derive(Clone)]
pub struct CacheController {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: EntryStore,
    locks: LockCoordinator,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheController").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl CacheController {
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_clock(config, fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>) -> Self {
        let store = EntryStore::new(&config.root);
        let locks = LockCoordinator::new(&config.root);
        Self { inner: Arc::new(Inner { config, store, locks, fetcher, clock }) }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Make sure a usable entry exists for `url`, fetching it if missing, stale, or forced.
    ///
    /// A failed fetch is returned to the caller and leaves any earlier entry untouched.
    pub async fn ensure_fresh(&self, url: &str, force_refresh: bool) -> Result<Refresh, Error> {
        let url = parse_target(url)?;
        let key = CacheKey::from_url(&url);
        let inner = Arc::clone(&self.inner);

        // Detached so that dropping the caller cannot abandon a write halfway.
        tokio::spawn(async move { inner.refresh(&key, &url, force_refresh).await }).await?
    }

    /// Read the stored pair for `url`. `ensure_fresh` must have succeeded for it before.
    pub async fn serve(&self, url: &str) -> Result<CachedResponse, Error> {
        let key = derive_key(url)?;
        if !self.inner.store.exists(&key) {
            return Err(Error::NotCached(url.trim().to_string()));
        }

        self.inner
            .locks
            .with_shared(&key, || async {
                let key = key.clone();
                let (headers, body) = self
                    .inner
                    .blocking(move |store| Ok((store.read_headers(&key)?, store.read_body(&key)?)))
                    .await?;
                Ok(CachedResponse { headers, body: Bytes::from(body) })
            })
            .await
    }

    /// `ensure_fresh` followed by `serve`, the path every proxied request takes.
    pub async fn fetch_and_serve(&self, url: &str, force_refresh: bool) -> Result<CachedResponse, Error> {
        self.ensure_fresh(url, force_refresh).await?;
        self.serve(url).await
    }

    /// Stored metadata for `url`, or `None` if nothing was cached yet.
    pub async fn inspect(&self, url: &str) -> Result<Option<EntryStat>, Error> {
        let key = derive_key(url)?;
        self.inner
            .locks
            .with_shared(&key, || async {
                let key = key.clone();
                self.inner.blocking(move |store| store.stat(&key)).await
            })
            .await
    }
}

impl Inner {
    async fn refresh(&self, key: &CacheKey, url: &Url, force_refresh: bool) -> Result<Refresh, Error> {
        self.locks
            .with_exclusive(key, || async {
                if !force_refresh && self.is_usable(key).await? {
                    tracing::debug!(url = %url, key = %key, "cache hit");
                    return Ok(Refresh::Reused);
                }

                let limits = FetchLimits { max_bytes: self.config.max_bytes, timeout: self.config.fetch_timeout };
                let started = Instant::now();
                let FetchedResource { headers, body } = match self.fetcher.fetch(url, limits).await {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        tracing::warn!(url = %url, key = %key, error = %e, "refresh failed, previous entry kept");
                        return Err(e);
                    }
                };

                if body.len() >= self.config.max_bytes {
                    tracing::warn!(url = %url, bytes = body.len(), "fetcher returned an oversized body");
                    return Err(Error::SizeExceeded { limit: self.config.max_bytes });
                }

                let bytes = body.len();
                let write_key = key.clone();
                self.blocking(move |store| store.write(&write_key, &headers, &body)).await?;

                tracing::info!(
                    url = %url,
                    key = %key,
                    bytes,
                    forced = force_refresh,
                    fetch_ms = started.elapsed().as_millis() as u64,
                    "entry refreshed"
                );
                Ok(Refresh::Fetched)
            })
            .await
    }

    async fn is_usable(&self, key: &CacheKey) -> Result<bool, Error> {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let key = key.clone();
        self.blocking(move |store| Ok(store.exists(&key) && store.is_fresh(&key, ttl, now))).await
    }

    /// Run a storage operation on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&EntryStore) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const URL: &str = "http://example.com/a.txt";

    #[derive(Clone)]
    enum Reply {
        Ok(Vec<String>, &'static [u8]),
        FetchFails,
        TooLarge,
    }

    struct StubFetcher {
        calls: AtomicUsize,
        reply: Mutex<Reply>,
        delay: Duration,
    }

    impl StubFetcher {
        fn new(headers: &[&str], body: &'static [u8]) -> Arc<Self> {
            Self::delayed(headers, body, Duration::ZERO)
        }

        fn delayed(headers: &[&str], body: &'static [u8], delay: Duration) -> Arc<Self> {
            let headers = headers.iter().map(|h| h.to_string()).collect();
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Mutex::new(Reply::Ok(headers, body)), delay })
        }

        fn set_reply(&self, reply: Reply) {
            *self.reply.lock().unwrap() = reply;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, _url: &Url, limits: FetchLimits) -> Result<FetchedResource, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let reply = self.reply.lock().unwrap().clone();
            match reply {
                Reply::Ok(headers, body) => Ok(FetchedResource { headers, body: Bytes::from_static(body) }),
                Reply::FetchFails => Err(Error::Fetch("connection refused".into())),
                Reply::TooLarge => Err(Error::SizeExceeded { limit: limits.max_bytes }),
            }
        }
    }

    /// Numbers every fetch so tests can check header/body pairing.
    struct GenerationFetcher {
        generation: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for GenerationFetcher {
        async fn fetch(&self, _url: &Url, _limits: FetchLimits) -> Result<FetchedResource, Error> {
            let n = self.generation.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(FetchedResource { headers: vec![format!("X-Gen: {n}")], body: Bytes::from(format!("gen-{n}")) })
        }
    }

    struct ManualClock {
        now: Mutex<SystemTime>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self { now: Mutex::new(SystemTime::now()) })
        }

        fn set(&self, now: SystemTime) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap()
        }
    }

    fn controller(dir: &tempfile::TempDir, fetcher: Arc<dyn Fetcher>) -> CacheController {
        CacheController::new(CacheConfig::new(dir.path()), fetcher)
    }

    fn last_written(controller: &CacheController, url: &str) -> SystemTime {
        controller.inner.store.last_written(&derive_key(url).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_first_fetch_then_serve() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&["Content-Type: text/plain"], b"hello");
        let cache = controller(&dir, fetcher.clone());

        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Fetched);
        let served = cache.serve(URL).await.unwrap();
        assert_eq!(served.headers, vec!["Content-Type: text/plain".to_string()]);
        assert_eq!(served.body, Bytes::from_static(b"hello"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&["Content-Type: text/plain"], b"hello");
        let cache = controller(&dir, fetcher.clone());
        cache.ensure_fresh(URL, false).await.unwrap();

        fetcher.set_reply(Reply::Ok(vec!["Content-Type: text/plain".into()], b"bye"));
        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Reused);

        assert_eq!(cache.serve(URL).await.unwrap().body, Bytes::from_static(b"hello"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&["Content-Type: text/plain"], b"hello");
        let cache = controller(&dir, fetcher.clone());
        cache.ensure_fresh(URL, false).await.unwrap();

        fetcher.set_reply(Reply::Ok(vec!["Content-Type: text/plain".into()], b"bye"));
        assert_eq!(cache.ensure_fresh(URL, true).await.unwrap(), Refresh::Fetched);

        assert_eq!(cache.serve(URL).await.unwrap().body, Bytes::from_static(b"bye"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&[], b"hello");
        let clock = ManualClock::new();
        let config = CacheConfig { ttl: Duration::from_secs(60), ..CacheConfig::new(dir.path()) };
        let cache = CacheController::with_clock(config, fetcher.clone(), clock.clone());
        cache.ensure_fresh(URL, false).await.unwrap();

        let written = last_written(&cache, URL);
        let ttl = Duration::from_secs(60);
        let second = Duration::from_secs(1);

        clock.set(written + ttl - second);
        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Reused);
        clock.set(written + ttl);
        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Reused);
        clock.set(written + ttl + second);
        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Fetched);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&["Content-Type: text/plain"], b"hello");
        let clock = ManualClock::new();
        let cache = CacheController::with_clock(CacheConfig::new(dir.path()), fetcher.clone(), clock.clone());
        cache.ensure_fresh(URL, false).await.unwrap();

        clock.set(last_written(&cache, URL) + cache.config().ttl + Duration::from_secs(1));
        fetcher.set_reply(Reply::FetchFails);
        assert!(matches!(cache.ensure_fresh(URL, false).await, Err(Error::Fetch(_))));

        let served = cache.serve(URL).await.unwrap();
        assert_eq!(served.headers, vec!["Content-Type: text/plain".to_string()]);
        assert_eq!(served.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_size_exceeded_keeps_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&[], b"hello");
        let cache = controller(&dir, fetcher.clone());
        cache.ensure_fresh(URL, false).await.unwrap();

        fetcher.set_reply(Reply::TooLarge);
        assert!(matches!(cache.ensure_fresh(URL, true).await, Err(Error::SizeExceeded { .. })));
        assert_eq!(cache.serve(URL).await.unwrap().body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_oversized_body_from_fetcher_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&[], b"12345");
        let config = CacheConfig { max_bytes: 5, ..CacheConfig::new(dir.path()) };
        let cache = CacheController::new(config, fetcher);

        assert!(matches!(cache.ensure_fresh(URL, false).await, Err(Error::SizeExceeded { limit: 5 })));
        assert!(matches!(cache.serve(URL).await, Err(Error::NotCached(_))));
    }

    #[tokio::test]
    async fn test_serve_before_ensure_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = controller(&dir, StubFetcher::new(&[], b"hello"));
        assert!(matches!(cache.serve(URL).await, Err(Error::NotCached(_))));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&[], b"hello");
        let cache = controller(&dir, fetcher.clone());
        assert!(matches!(cache.ensure_fresh("not a url", false).await, Err(Error::InvalidInput(_))));
        assert!(matches!(cache.serve("").await, Err(Error::InvalidInput(_))));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_header_component_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = controller(&dir, StubFetcher::new(&["A: b"], b"hello"));
        cache.ensure_fresh(URL, false).await.unwrap();

        let key = derive_key(URL).unwrap();
        std::fs::write(cache.inner.store.header_path(&key), b"garbage").unwrap();
        assert!(matches!(cache.serve(URL).await, Err(Error::CorruptEntry(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::delayed(&["Content-Type: text/plain"], b"hello", Duration::from_millis(20));
        let cache = controller(&dir, fetcher.clone());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.ensure_fresh(URL, false).await }));
        }

        let mut fetched = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == Refresh::Fetched {
                fetched += 1;
            }
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetched, 1);
        assert_eq!(cache.serve(URL).await.unwrap().body, Bytes::from_static(b"hello"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_controllers_sharing_a_root_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::delayed(&["Content-Type: text/plain"], b"hello", Duration::from_millis(20));
        let first = controller(&dir, fetcher.clone());
        let second = controller(&dir, fetcher.clone());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let cache = if i % 2 == 0 { first.clone() } else { second.clone() };
            tasks.push(tokio::spawn(async move { cache.ensure_fresh(URL, false).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(second.serve(URL).await.unwrap().body, Bytes::from_static(b"hello"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mixed_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(GenerationFetcher { generation: AtomicUsize::new(0) });
        let cache = controller(&dir, fetcher);
        cache.ensure_fresh(URL, false).await.unwrap();

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    cache.ensure_fresh(URL, true).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let served = cache.serve(URL).await.unwrap();
                    let generation = served.headers[0].trim_start_matches("X-Gen: ").to_string();
                    assert_eq!(served.body, Bytes::from(format!("gen-{generation}")));
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_abandon_write() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::delayed(&["A: b"], b"hello", Duration::from_millis(100));
        let cache = controller(&dir, fetcher.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.ensure_fresh(URL, false)).await;
        assert!(abandoned.is_err());

        // The next exclusive holder waits for the detached refresh and then reuses its entry.
        assert_eq!(cache.ensure_fresh(URL, false).await.unwrap(), Refresh::Reused);
        assert_eq!(cache.serve(URL).await.unwrap().body, Bytes::from_static(b"hello"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let cache = controller(&dir, StubFetcher::new(&["HTTP/1.1 200 OK", "A: b"], b"hello"));
        assert!(cache.inspect(URL).await.unwrap().is_none());

        cache.ensure_fresh(URL, false).await.unwrap();
        let stat = cache.inspect(URL).await.unwrap().unwrap();
        assert_eq!(stat.headers.len(), 2);
        assert_eq!(stat.body_len, 5);
    }

    #[tokio::test]
    async fn test_fetch_and_serve() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(&["Content-Type: text/plain"], b"hello");
        let cache = controller(&dir, fetcher.clone());

        let first = cache.fetch_and_serve(URL, false).await.unwrap();
        let second = cache.fetch_and_serve(URL, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
    }
}
