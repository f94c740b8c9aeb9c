//! Cache key fingerprinting.
//!
//! A [`CacheKey`] is the hex SHA-256 digest of the query text followed by each
//! bound parameter, plus the fixed [`CACHE_FILE_EXTENSION`]. The digest input is
//! built as:
//!
//! ```text
//! sql ( SEPARATOR param_id '=' param_text )*
//! ```
//!
//! where parameters are visited in ascending order: numeric indices first, then
//! names. The query text is used verbatim, so whitespace or case differences
//! produce different keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::SqlValue;

/// Suffix shared by every cache key and therefore every on-disk entry file.
pub const CACHE_FILE_EXTENSION: &str = ".jdbc_cache";

/// Marks the start of a parameter in the digest input. Chosen to be unlikely in
/// hand-written SQL.
pub const PARAM_SEPARATOR: char = '\u{2022}';

/// Sits between a parameter id and its value, so `(1, "42")` and `(14, "2")`
/// digest differently.
pub const VALUE_SEPARATOR: char = '=';

/// Rendering of a parameter explicitly bound to null.
const NULL_TEXT: &str = "NULL";

/// Identifies a bound parameter by position or by name.
///
/// Ordering puts every positional index before every name, so iteration over
/// [`Parameters`] is ascending index, then ascending name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamId {
    Index(u32),
    Name(String),
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => f.write_str(n),
        }
    }
}

impl From<u32> for ParamId {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for ParamId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ParamId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Ordered parameter bindings of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    bindings: BTreeMap<ParamId, Option<SqlValue>>,
}

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to `id`, replacing any previous binding.
    pub fn set(&mut self, id: impl Into<ParamId>, value: SqlValue) -> &mut Self {
        self.bindings.insert(id.into(), Some(value));
        self
    }

    /// Binds SQL NULL to `id`.
    pub fn set_null(&mut self, id: impl Into<ParamId>) -> &mut Self {
        self.bindings.insert(id.into(), None);
        self
    }

    /// Removes a binding. Returns `true` if one existed.
    pub fn clear_parameter(&mut self, id: impl Into<ParamId>) -> bool {
        self.bindings.remove(&id.into()).is_some()
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    #[must_use]
    pub fn get(&self, id: &ParamId) -> Option<&Option<SqlValue>> {
        self.bindings.get(id)
    }

    /// Bindings in fingerprint order.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamId, &Option<SqlValue>)> {
        self.bindings.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A cache key rejected by [`CacheKey::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache key {key:?}: {reason}")]
pub struct InvalidKey {
    pub key: String,
    pub reason: &'static str,
}

/// Deterministic fingerprint of a query and its parameters.
///
/// Keys double as file names in the on-disk store, so a key never contains a
/// path separator and never ends in the staging suffix `.tmp`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprints `sql` with its bound `params`.
    ///
    /// # Examples
    ///
    /// ```
    /// use querycache_core::key::{CacheKey, Parameters};
    ///
    /// let key = CacheKey::generate("SELECT 1", &Parameters::new());
    /// assert_eq!(
    ///     key.as_str(),
    ///     "e004ebd5b5532a4b85984a62f8ad48a81aa3460c1ca07701f386135d72cdecf5.jdbc_cache"
    /// );
    /// ```
    #[must_use]
    pub fn generate(sql: &str, params: &Parameters) -> Self {
        let digest = Sha256::digest(fingerprint_source(sql, params).as_bytes());
        let mut key = hex::encode(digest);
        key.push_str(CACHE_FILE_EXTENSION);
        Self(key)
    }

    /// Accepts an externally supplied key (e.g. from an admin command).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if the key is empty, contains a path separator or
    /// a `..` sequence, or ends with the staging suffix.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidKey> {
        let key = raw.into();
        let reason = if key.is_empty() {
            Some("empty")
        } else if key.contains('/') || key.contains('\\') {
            Some("contains a path separator")
        } else if key.contains("..") {
            Some("contains a parent reference")
        } else if key.ends_with(".tmp") {
            Some("uses the staging suffix")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = InvalidKey;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the string that gets digested into a [`CacheKey`].
#[must_use]
pub fn fingerprint_source(sql: &str, params: &Parameters) -> String {
    let mut src = String::with_capacity(sql.len() + params.len() * 16);
    src.push_str(sql);
    for (id, value) in params.iter() {
        src.push(PARAM_SEPARATOR);
        src.push_str(&id.to_string());
        src.push(VALUE_SEPARATOR);
        match value {
            Some(v) => src.push_str(&v.to_string()),
            None => src.push_str(NULL_TEXT),
        }
    }
    src
}

/// A statement as seen by the caching facade: query text plus bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Parameters,
}

impl Query {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Parameters::new(),
        }
    }

    /// Builder-style binding.
    #[must_use]
    pub fn bind(mut self, id: impl Into<ParamId>, value: SqlValue) -> Self {
        self.params.set(id, value);
        self
    }

    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::generate(&self.sql, &self.params)
    }
}
