use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
    pub pool_size: u32,
    pub connection_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl RedisConfig {
    /// Create configuration from the centralized app config
    pub fn from_app_config() -> Self {
        let config = &crate::app_config::config().redis;

        Self {
            redis_url: config.url.clone(),
            pool_size: config.pool_size,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size too large (max: 1000)".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("Retry attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RedisConfig {
        RedisConfig {
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            connection_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_empty_url_rejected() {
        let mut config = base_config();
        config.redis_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut config = base_config();
        config.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
