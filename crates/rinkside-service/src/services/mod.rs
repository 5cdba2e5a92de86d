//! Provides the Rinkside services and a way to initialize them.
//!
//! The main [`create_service`] fn opens the cache store, builds the upstream downloader and
//! registers all configured resources, according to the provided [`Config`].

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::{CacheStore, Cacher};
use crate::config::Config;
use crate::download::Downloader;

mod resources;

pub use resources::{Resource, ResourceService};

pub fn create_service(config: &Config) -> Result<ResourceService> {
    let store = CacheStore::open(&config.cache_dir).with_context(|| {
        format!(
            "failed to open cache directory {}",
            config.cache_dir.display()
        )
    })?;
    let cacher = Cacher::new(Arc::new(store));
    let downloader = Downloader::new(&config.http)?;

    let mut keys = BTreeSet::new();
    let mut resources = Vec::with_capacity(config.resources.len());
    for (name, resource_config) in &config.resources {
        let resource = Resource::from_config(name, resource_config)
            .with_context(|| format!("invalid configuration for resource `{name}`"))?;
        if !keys.insert(resource.key.clone()) {
            anyhow::bail!("resource `{name}` reuses cache key `{}`", resource.key);
        }
        resources.push(resource);
    }

    Ok(ResourceService::new(cacher, downloader, resources))
}
