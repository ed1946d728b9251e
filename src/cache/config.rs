//! Cache configuration.
//!
//! Controls which built-in admission rules run and how large the in-memory store may grow.

use std::num::NonZeroUsize;

use serde::Deserialize;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_PATH_SEGMENT_LENGTH: usize = 255;

/// Runtime cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Static caching on/off. When off every request is skipped outright.
    pub enabled: bool,
    /// Maximum entries held by the in-memory store.
    pub capacity: usize,
    /// URIs with a longer path segment are not cached.
    pub max_path_segment_length: usize,
    /// Register the rule that refuses to cache authenticated sessions.
    pub exclude_authenticated: bool,
    /// Append a generation signature comment to cached HTML.
    pub show_generation_signature: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            max_path_segment_length: DEFAULT_MAX_PATH_SEGMENT_LENGTH,
            exclude_authenticated: false,
            show_generation_signature: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity: settings.capacity.get(),
            max_path_segment_length: settings.max_path_segment_length.get(),
            exclude_authenticated: settings.exclude_authenticated,
            show_generation_signature: settings.show_generation_signature,
        }
    }
}

impl CacheConfig {
    /// Store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.max_path_segment_length, 255);
        assert!(!config.exclude_authenticated);
        assert!(!config.show_generation_signature);
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let config = CacheConfig {
            capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }

    #[test]
    fn partial_deserialize_keeps_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"exclude_authenticated": true}"#).expect("valid config");
        assert!(config.exclude_authenticated);
        assert!(config.enabled);
        assert_eq!(config.capacity, 1000);
    }
}
