//! Core types and shared functionality for revcache.
//!
//! This crate provides:
//! - The cache controller with its file-backed entry store and per-key locks
//! - The reversible URL token codec
//! - The fetcher contract implemented by `revcache-client`
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod token;

pub use cache::{CacheController, CacheKey, CachedResponse, Refresh};
pub use config::{AppConfig, CacheConfig, ConfigError};
pub use error::Error;
pub use fetch::{FetchLimits, FetchedResource, Fetcher};
