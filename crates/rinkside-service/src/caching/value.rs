use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A value that can be kept in the cache.
///
/// [`is_empty`](Self::is_empty) decides whether a freshly produced value is "trivial", like a
/// scrape that returned zero rows. Resources configured to not cache empty values keep their
/// previous entry instead of storing such a value.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn is_empty(&self) -> bool {
        false
    }
}

impl<V> CacheValue for Vec<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl<K, V> CacheValue for BTreeMap<K, V>
where
    K: Serialize + DeserializeOwned + Ord + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl CacheValue for String {
    fn is_empty(&self) -> bool {
        str::is_empty(self)
    }
}

impl CacheValue for serde_json::Value {
    fn is_empty(&self) -> bool {
        use serde_json::Value;

        match self {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(fields) => fields.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }
}
