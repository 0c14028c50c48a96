//! File-backed reverse-fetching cache.
//!
//! This module provides the cache-entry lifecycle:
//!
//! - Key derivation using SHA-256 of the canonical URL
//! - Entry storage as a header/body file pair per key
//! - Per-key shared/exclusive locking across tasks and processes
//! - The fetch-or-serve controller tying them together

pub mod controller;
pub mod hash;
pub mod header;
pub mod lock;
pub mod store;

pub use crate::Error;

pub use controller::{CacheController, CachedResponse, Clock, Refresh, SystemClock};
pub use hash::{CacheKey, derive_key, parse_target};
pub use lock::{EntryLock, LockCoordinator, LockMode};
pub use store::{EntryStat, EntryStore};
