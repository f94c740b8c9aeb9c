//! Configuration types for the query cache.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CacheError;

/// Default interval between periodic sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Top-level cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Where entries are stored.
    pub backend: BackendConfig,
    /// When `false` every call bypasses the cache and goes straight to the
    /// backend.
    pub active: bool,
    /// Optional age/size limits. `None` keeps entries until flushed.
    pub expiration: Option<ExpirationPolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            active: true,
            expiration: None,
        }
    }
}

/// Backing medium of a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// One file per entry under `root`.
    Disk { root: PathBuf },
    /// Process memory, shared by every cache configured with the same `name`.
    Memory { name: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory {
            name: "default".to_string(),
        }
    }
}

/// Age and size limits enforced by
/// [`ExpiringStore`](crate::storage::ExpiringStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// Entries older than this are never served and are removed by the sweep.
    pub max_age: Option<Duration>,
    /// When the entry count exceeds this, each sweep removes the single oldest
    /// entry.
    pub max_size: Option<usize>,
    /// Interval between periodic sweeps.
    pub gc_interval: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            max_age: None,
            max_size: None,
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }
}

impl ExpirationPolicy {
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Checks the policy can drive a sweep loop.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if `gc_interval` is zero.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.gc_interval.is_zero() {
            return Err(CacheError::Configuration(
                "expiration gc_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert!(config.active);
        assert!(config.expiration.is_none());
        assert_eq!(
            config.backend,
            BackendConfig::Memory {
                name: "default".to_string()
            }
        );

        let policy = ExpirationPolicy::default();
        assert_eq!(policy.gc_interval, Duration::from_secs(3600));
        assert!(policy.max_age.is_none());
        assert!(policy.max_size.is_none());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn zero_gc_interval_is_rejected() {
        let policy = ExpirationPolicy::default().with_gc_interval(Duration::ZERO);
        assert!(matches!(policy.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn builders_set_limits() {
        let policy = ExpirationPolicy::default()
            .with_max_age(Duration::from_secs(30))
            .with_max_size(100);
        assert_eq!(policy.max_age, Some(Duration::from_secs(30)));
        assert_eq!(policy.max_size, Some(100));
    }
}
