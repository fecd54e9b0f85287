//! Engine configuration.
//!
//! # Invariants
//! - `application_id` is trimmed and never blank.

use std::time::Duration;
use thiserror::Error;

const DEFAULT_PATTERN_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("application id must not be blank")]
    BlankApplicationId,
}

/// Runtime settings of one slug engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugConfig {
    application_id: String,
    abort_on_conflict: bool,
    pattern_cache_ttl: Duration,
}

impl SlugConfig {
    /// Creates config with defaults: abort on conflict, 24h pattern cache.
    pub fn new(application_id: impl Into<String>) -> Result<Self, ConfigError> {
        let application_id = application_id.into().trim().to_string();
        if application_id.is_empty() {
            return Err(ConfigError::BlankApplicationId);
        }
        Ok(Self {
            application_id,
            abort_on_conflict: true,
            pattern_cache_ttl: DEFAULT_PATTERN_CACHE_TTL,
        })
    }

    pub fn with_abort_on_conflict(mut self, abort_on_conflict: bool) -> Self {
        self.abort_on_conflict = abort_on_conflict;
        self
    }

    pub fn with_pattern_cache_ttl(mut self, ttl: Duration) -> Self {
        self.pattern_cache_ttl = ttl;
        self
    }

    /// Identifies this instance in queue claim ownership.
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn abort_on_conflict(&self) -> bool {
        self.abort_on_conflict
    }

    pub fn pattern_cache_ttl(&self) -> Duration {
        self.pattern_cache_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SlugConfig};
    use std::time::Duration;

    #[test]
    fn new_trims_and_applies_defaults() {
        let config = SlugConfig::new("  web-01 ").unwrap();
        assert_eq!(config.application_id(), "web-01");
        assert!(config.abort_on_conflict());
        assert_eq!(config.pattern_cache_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn new_rejects_blank_application_id() {
        assert_eq!(SlugConfig::new("   "), Err(ConfigError::BlankApplicationId));
    }
}
