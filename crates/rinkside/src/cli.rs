//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rinkside_service::config::Config;
use rinkside_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::refresh;
use crate::server;

/// Rinkside commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server and the refresh scheduler.
    Run,

    /// Refresh resources from their upstreams and exit.
    ///
    /// Refreshes all configured resources when none are named. Exits with an error if any
    /// refresh failed.
    Refresh {
        /// The names of the resources to refresh.
        resources: Vec<String>,
    },

    /// Check the health of a running server.
    Healthcheck {
        /// The address of the server. Defaults to the configured `bind` address.
        #[arg(long, value_name = "ADDR")]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5, value_name = "SECS")]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: This is called before any runtime or other thread is started.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, hostname);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Refresh { resources } => {
            refresh::refresh(config, resources).context("failed to refresh resources")?
        }
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(config, addr, timeout)?,
    }

    Ok(())
}
