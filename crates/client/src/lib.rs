//! Client code for revcache.
//!
//! This crate provides the outbound HTTP fetch used by the server and CLI to
//! populate the cache.

pub mod fetch;

pub use fetch::{FetchConfig, HttpFetcher};
