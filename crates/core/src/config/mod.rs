//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (REVCACHE_*)
//! 2. TOML config file (if REVCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (REVCACHE_*)
/// 2. TOML config file (if REVCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding every entry's header, body and lock files.
    ///
    /// Set via REVCACHE_CACHE_ROOT environment variable.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Freshness window in seconds.
    ///
    /// Set via REVCACHE_TTL_SECS environment variable.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum cacheable body size in bytes. A body reaching this size is rejected.
    ///
    /// Set via REVCACHE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Outbound fetch timeout in seconds.
    ///
    /// Set via REVCACHE_TIMEOUT_SECS environment variable.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Query parameter carrying the encoded URL token.
    ///
    /// Set via REVCACHE_URL_PARAM environment variable.
    #[serde(default = "default_url_param")]
    pub url_param: String,

    /// Query parameter that forces a refetch when present. Empty disables it.
    ///
    /// Set via REVCACHE_REFRESH_PARAM environment variable.
    #[serde(default = "default_refresh_param")]
    pub refresh_param: Option<String>,

    /// Address the HTTP entrypoint listens on.
    ///
    /// Set via REVCACHE_BIND_ADDR environment variable.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// User-Agent string for outbound requests.
    ///
    /// Set via REVCACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects followed per fetch.
    ///
    /// Set via REVCACHE_MAX_REDIRECTS environment variable.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Refuse origins that resolve to loopback, private or link-local addresses.
    ///
    /// Set via REVCACHE_BLOCK_PRIVATE_ADDRESSES environment variable.
    #[serde(default = "default_true")]
    pub block_private_addresses: bool,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./revcache-data")
}

fn default_ttl_secs() -> u64 {
    86_400 // 24h
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_url_param() -> String {
    "url".into()
}

fn default_refresh_param() -> Option<String> {
    Some("refresh".into())
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_user_agent() -> String {
    "revcache/0.1".into()
}

fn default_max_redirects() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            ttl_secs: default_ttl_secs(),
            max_bytes: default_max_bytes(),
            timeout_secs: default_timeout_secs(),
            url_param: default_url_param(),
            refresh_param: default_refresh_param(),
            bind_addr: default_bind_addr(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            block_private_addresses: true,
        }
    }
}

/// Settings the cache controller needs, split out of [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub ttl: Duration,
    pub max_bytes: usize,
    pub fetch_timeout: Duration,
}

impl CacheConfig {
    /// Controller settings rooted at `root` with the built-in limits.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = AppConfig::default();
        Self { root: root.into(), ..defaults.cache_config() }
    }
}

impl AppConfig {
    /// TTL as Duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Fetch timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The force-refresh parameter name, or `None` when the feature is disabled.
    pub fn refresh_param(&self) -> Option<&str> {
        self.refresh_param.as_deref().filter(|p| !p.is_empty())
    }

    /// Settings handed to the cache controller at construction.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            root: self.cache_root.clone(),
            ttl: self.ttl(),
            max_bytes: self.max_bytes,
            fetch_timeout: self.timeout(),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `REVCACHE_`
    /// 2. TOML file from `REVCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("REVCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("REVCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
