use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

/// Environment variable overriding [`PackConfig::registry_concurrency`].
pub const ENV_REGISTRY_CONCURRENCY: &str = "IMGPACK_REGISTRY_CONCURRENCY";
/// Environment variable overriding [`PackConfig::write_concurrency`].
pub const ENV_WRITE_CONCURRENCY: &str = "IMGPACK_WRITE_CONCURRENCY";
/// Environment variable overriding [`PackConfig::queue_concurrency`].
pub const ENV_QUEUE_CONCURRENCY: &str = "IMGPACK_QUEUE_CONCURRENCY";

/// Packaging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Parallel top-level registry lookups while building a descriptor graph
    pub registry_concurrency: usize,

    /// Parallel layer fill-in workers when writing a seekable archive
    pub write_concurrency: usize,

    /// Parallel items in build/resolve/import queues
    pub queue_concurrency: usize,

    /// Check manifest and layer digests against their content
    pub verify_digests: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            registry_concurrency: 10,
            write_concurrency: 8,
            queue_concurrency: 5,
            verify_digests: true,
        }
    }
}

impl PackConfig {
    /// Defaults overridden by `IMGPACK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_REGISTRY_CONCURRENCY) {
            config.registry_concurrency = parse_concurrency(ENV_REGISTRY_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_WRITE_CONCURRENCY) {
            config.write_concurrency = parse_concurrency(ENV_WRITE_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_QUEUE_CONCURRENCY) {
            config.queue_concurrency = parse_concurrency(ENV_QUEUE_CONCURRENCY, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would deadlock a throttle.
    pub fn validate(&self) -> Result<()> {
        if self.registry_concurrency == 0 {
            return Err(PackError::ConfigError(
                "registry_concurrency must be at least 1".to_string(),
            ));
        }
        if self.write_concurrency == 0 {
            return Err(PackError::ConfigError(
                "write_concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue_concurrency == 0 {
            return Err(PackError::ConfigError(
                "queue_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_concurrency(key: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|e| {
        PackError::ConfigError(format!("{} must be a positive integer, got '{}': {}", key, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PackConfig::default();
        assert_eq!(config.registry_concurrency, 10);
        assert_eq!(config.write_concurrency, 8);
        assert_eq!(config.queue_concurrency, 5);
        assert!(config.verify_digests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides() {
        let config = PackConfig::from_lookup(lookup_from(&[
            (ENV_REGISTRY_CONCURRENCY, "3"),
            (ENV_WRITE_CONCURRENCY, " 1 "),
        ]))
        .unwrap();
        assert_eq!(config.registry_concurrency, 3);
        assert_eq!(config.write_concurrency, 1);
        assert_eq!(config.queue_concurrency, 5);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = PackConfig::from_lookup(lookup_from(&[(ENV_QUEUE_CONCURRENCY, "many")]))
            .unwrap_err();
        assert!(matches!(err, PackError::ConfigError(_)));
        assert!(err.to_string().contains(ENV_QUEUE_CONCURRENCY));
    }

    #[test]
    fn test_lookup_rejects_zero() {
        let err = PackConfig::from_lookup(lookup_from(&[(ENV_WRITE_CONCURRENCY, "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("write_concurrency"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PackConfig = serde_json::from_str(r#"{"write_concurrency": 2}"#).unwrap();
        assert_eq!(config.write_concurrency, 2);
        assert_eq!(config.registry_concurrency, 10);
    }
}
