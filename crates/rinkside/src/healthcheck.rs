use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rinkside_service::config::Config;

/// Checks a running server and prints `OK` or `ERROR`.
///
/// Queries `addr`, or the configured `bind` address if none is given.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address `{}`", config.bind))?,
    };

    match check(addr, Duration::from_secs(timeout)) {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(err) => {
            println!("ERROR");
            Err(err)
        }
    }
}

fn check(addr: SocketAddr, timeout: Duration) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to create HTTP client")?;

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!(url, "Checking server health");

    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("rinkside at {addr} is unreachable"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("rinkside at {addr} is unhealthy: {status}");
    }

    let body = response
        .text()
        .context("failed to read healthcheck response")?;
    if body.trim() != "ok" {
        bail!("rinkside at {addr} answered with {body:?}");
    }

    Ok(())
}
