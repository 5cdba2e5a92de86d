use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use url::Url;

use crate::caching::{
    CacheKey, CacheKeyError, CacheValue, Cacher, Fetched, RefreshOutcome, RefreshPolicy,
};
use crate::config::{EmptyWhen, ResourceConfig};
use crate::download::Downloader;

/// A configured resource, served under `/api/<name>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub key: CacheKey,
    pub policy: RefreshPolicy,
    pub upstream: Url,
    pub fallback: Value,
    pub refresh_every: Option<Duration>,
    pub empty_when: EmptyWhen,
}

impl Resource {
    pub fn from_config(name: &str, config: &ResourceConfig) -> Result<Self, CacheKeyError> {
        Ok(Self {
            name: name.to_owned(),
            key: CacheKey::new(&config.cache_key(name))?,
            policy: RefreshPolicy::new(config.ttl).cache_empty(config.cache_empty),
            upstream: config.upstream.clone(),
            fallback: config.fallback.clone(),
            refresh_every: config.refresh_every,
            empty_when: config.empty_when,
        })
    }

    /// Whether `value` carries no data for this resource.
    pub fn is_empty(&self, value: &Value) -> bool {
        match (self.empty_when, value) {
            (EmptyWhen::AllFieldsEmpty, Value::Object(fields)) => {
                fields.values().all(<Value as CacheValue>::is_empty)
            }
            _ => CacheValue::is_empty(value),
        }
    }
}

/// The registry of all resources, sharing one [`Cacher`].
#[derive(Debug, Clone)]
pub struct ResourceService {
    cacher: Cacher<Value>,
    downloader: Downloader,
    resources: Arc<BTreeMap<String, Resource>>,
}

impl ResourceService {
    pub fn new(
        cacher: Cacher<Value>,
        downloader: Downloader,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Self {
        let resources = resources
            .into_iter()
            .map(|resource| (resource.name.clone(), resource))
            .collect();

        Self {
            cacher,
            downloader,
            resources: Arc::new(resources),
        }
    }

    pub fn cacher(&self) -> &Cacher<Value> {
        &self.cacher
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// All resources, ordered by name.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Returns the best available value of the resource `name`, or `None` if it does not exist.
    pub async fn fetch(&self, name: &str) -> Option<Fetched<Value>> {
        let resource = self.resources.get(name)?;
        let fetched = self
            .cacher
            .request(
                &resource.key,
                resource.policy,
                self.producer(resource),
                resource.fallback.clone(),
            )
            .await;
        Some(fetched)
    }

    /// Refreshes the resource `name` from its upstream, regardless of its cache state.
    pub async fn refresh(&self, name: &str) -> Option<RefreshOutcome<Value>> {
        let resource = self.resources.get(name)?;
        let outcome = self
            .cacher
            .refresh(&resource.key, resource.policy, self.producer(resource))
            .await;
        Some(outcome)
    }

    /// Refreshes all the given resources concurrently.
    pub async fn refresh_all<I, S>(&self, names: I) -> Vec<(String, Option<RefreshOutcome<Value>>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let refreshes = names.into_iter().map(|name| async move {
            let name = name.as_ref();
            (name.to_owned(), self.refresh(name).await)
        });
        futures::future::join_all(refreshes).await
    }

    fn producer(
        &self,
        resource: &Resource,
    ) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<Value>> + use<> {
        let downloader = self.downloader.clone();
        let url = resource.upstream.clone();
        move || async move { downloader.fetch_json(&url).await }.boxed()
    }
}
