//! Rinkside.
//!
//! Rinkside is the backend of a college hockey fan site. It serves roster, schedule, stats and
//! news data scraped from slow upstream sites, caching every resource on disk and refreshing it
//! in the background, so that the site stays fast and keeps working when an upstream is down.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod refresh;
mod scheduler;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
