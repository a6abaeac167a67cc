use secrecy::ExposeSecret;
use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.delivery.base_delay_ms > self.delivery.max_delay_ms {
            return Err(ConfigError::InvalidConfig(
                "delivery.base_delay_ms cannot exceed delivery.max_delay_ms".to_string(),
            ));
        }

        if self.delivery.webhook_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "delivery.webhook_name cannot be empty".to_string(),
            ));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }
}
