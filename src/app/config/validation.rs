use super::{Config, ConfigError};
use std::collections::HashSet;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Input file must be set (--input or ANNOTATOR_INPUT)".to_string(),
            ));
        }

        Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;

        if self.id_field.trim().is_empty() || self.text_field.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Id and text field names must not be empty".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.shards == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Shard count must be greater than 0".to_string(),
            ));
        }

        if self.retry_policy.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry_policy.base_delay > self.retry_policy.max_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry base delay ({}ms) must not exceed max delay ({}ms)",
                self.retry_base_ms, self.retry_max_ms
            )));
        }

        if self.retry_policy.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Attempt timeout must be greater than 0".to_string(),
            ));
        }

        if self.categories.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one score category is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.categories.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(ConfigError::InvalidConfig(format!(
                "Score category '{duplicate}' is listed twice"
            )));
        }

        Ok(())
    }
}
