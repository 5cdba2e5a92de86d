//! The one-off `refresh` command.

use anyhow::{Context, Result};
use rinkside_service::caching::RefreshOutcome;
use rinkside_service::config::Config;
use rinkside_service::services::{ResourceService, create_service};

/// Refreshes the named resources, or all of them if `names` is empty.
pub fn refresh(config: Config, names: Vec<String>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("rinkside-refresh")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let service = create_service(&config).context("failed to create service")?;
        refresh_resources(&service, names).await
    })
}

pub async fn refresh_resources(service: &ResourceService, names: Vec<String>) -> Result<()> {
    let names = match names.is_empty() {
        true => service.resources().map(|r| r.name.clone()).collect(),
        false => names,
    };

    let unknown: Vec<_> = names
        .iter()
        .filter(|name| service.resource(name).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        anyhow::bail!("unknown resources: {}", unknown.join(", "));
    }

    let mut failed = Vec::new();
    for (name, outcome) in service.refresh_all(&names).await {
        match outcome {
            Some(RefreshOutcome::Success(_)) => println!("{name}: ok"),
            Some(RefreshOutcome::Failure(err)) => {
                println!("{name}: {err}");
                failed.push(name);
            }
            None => failed.push(name),
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("failed to refresh {}", failed.join(", "));
    }
    Ok(())
}
