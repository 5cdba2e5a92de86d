use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

const MAX_KEY_LEN: usize = 200;

/// The identifier of a cached resource, like `asu_hockey_roster`.
///
/// The key is used verbatim as the file name of the cache entry, which is why it is restricted
/// to ASCII alphanumerics, `_`, `-` and `.`, and may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyError {
    #[error("cache key is empty")]
    Empty,
    #[error("cache key is longer than {MAX_KEY_LEN} bytes")]
    TooLong,
    #[error("cache key may not start with a dot")]
    LeadingDot,
    #[error("invalid character {0:?} in cache key")]
    InvalidChar(char),
}

impl CacheKey {
    pub fn new(key: &str) -> Result<Self, CacheKeyError> {
        if key.is_empty() {
            return Err(CacheKeyError::Empty);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheKeyError::TooLong);
        }
        if key.starts_with('.') {
            return Err(CacheKeyError::LeadingDot);
        }
        if let Some(c) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(CacheKeyError::InvalidChar(c));
        }

        Ok(Self(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = CacheKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
