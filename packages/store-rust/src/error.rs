//! Error taxonomy of the cache stores.

use querycache_core::{CacheKey, CodecError};

/// Errors surfaced by [`BackingStore`](crate::storage::BackingStore)
/// implementations and the [`QueryCache`](crate::cache::QueryCache) facade.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store could not be built from its configuration.
    #[error("invalid cache configuration: {0}")]
    Configuration(String),
    /// A cache-only lookup missed.
    #[error("no cache entry for {key}")]
    NoCacheEntry { key: CacheKey },
    /// The producer or the encoding of its rows failed. Nothing was published.
    #[error("populating {key} failed: {source:#}")]
    PopulationFailure {
        key: CacheKey,
        #[source]
        source: anyhow::Error,
    },
    /// I/O failure while writing an entry.
    #[error("writing {key} failed: {source}")]
    Serialization {
        key: CacheKey,
        #[source]
        source: std::io::Error,
    },
    /// A published entry could not be decoded.
    #[error("cache entry {key} is corrupt: {source}")]
    CorruptEntry {
        key: CacheKey,
        #[source]
        source: CodecError,
    },
    /// I/O failure in an administrative operation (flush, size, scan).
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Classifies a codec failure raised while populating `key`.
    ///
    /// Row source failures and rows that do not fit their columns are
    /// population failures; I/O errors on the staging sink are serialization
    /// failures.
    pub(crate) fn from_encode(key: &CacheKey, err: CodecError) -> Self {
        match err {
            CodecError::Io(source) => Self::Serialization {
                key: key.clone(),
                source,
            },
            CodecError::Source(source) => Self::PopulationFailure {
                key: key.clone(),
                source,
            },
            other => Self::PopulationFailure {
                key: key.clone(),
                source: other.into(),
            },
        }
    }

    /// Wraps a codec failure raised while reading a published entry.
    pub(crate) fn from_decode(key: &CacheKey, source: CodecError) -> Self {
        Self::CorruptEntry {
            key: key.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::parse("abc.jdbc_cache").unwrap()
    }

    #[test]
    fn encode_io_failures_are_serialization_errors() {
        let err = CacheError::from_encode(
            &key(),
            CodecError::Io(std::io::Error::other("disk full")),
        );
        assert!(matches!(err, CacheError::Serialization { .. }));
    }

    #[test]
    fn source_failures_keep_their_cause() {
        let err = CacheError::from_encode(&key(), CodecError::Source(anyhow::anyhow!("boom")));
        match err {
            CacheError::PopulationFailure { source, .. } => {
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncation_on_read_is_corruption() {
        let err = CacheError::from_decode(
            &key(),
            CodecError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
        );
        assert!(matches!(err, CacheError::CorruptEntry { .. }));

        let err = CacheError::from_decode(
            &key(),
            CodecError::Corrupt {
                reason: "bad header".to_string(),
            },
        );
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }
}
