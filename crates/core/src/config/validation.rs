//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

const MAX_BODY_LIMIT: usize = 1024 * 1024 * 1024;
const MAX_TIMEOUT_SECS: u64 = 600;

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `ttl_secs` is 0
    /// - `max_bytes` is 0 or exceeds 1GB
    /// - `timeout_secs` is 0 or exceeds 10 minutes
    /// - `url_param` is empty or collides with `refresh_param`
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid { field: "ttl_secs".into(), reason: "must be greater than 0".into() });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > MAX_BODY_LIMIT {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 1GB".into() });
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid { field: "timeout_secs".into(), reason: "must be at least 1s".into() });
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                field: "timeout_secs".into(),
                reason: "must not exceed 10 minutes (600s)".into(),
            });
        }

        if self.url_param.is_empty() {
            return Err(ConfigError::Invalid { field: "url_param".into(), reason: "must not be empty".into() });
        }
        if self.refresh_param() == Some(self.url_param.as_str()) {
            return Err(ConfigError::Invalid {
                field: "refresh_param".into(),
                reason: "must differ from url_param".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if !self.block_private_addresses {
            tracing::warn!("block_private_addresses is off; origins on internal networks can be fetched");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ttl_zero() {
        let config = AppConfig { ttl_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "ttl_secs"));
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_max_bytes_exceeds_limit() {
        let config = AppConfig { max_bytes: MAX_BODY_LIMIT + 1, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_secs: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_secs"));

        let config = AppConfig { timeout_secs: 601, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_secs"));
    }

    #[test]
    fn test_validate_param_collision() {
        let config = AppConfig { refresh_param: Some("url".into()), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "refresh_param"));
    }

    #[test]
    fn test_validate_empty_url_param() {
        let config = AppConfig { url_param: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "url_param"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { ttl_secs: 1, max_bytes: 1, timeout_secs: 1, refresh_param: None, ..Default::default() };
        assert!(config.validate().is_ok());

        let config = AppConfig { max_bytes: MAX_BODY_LIMIT, timeout_secs: 600, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
