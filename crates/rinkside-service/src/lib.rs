//! The caching core and shared services of the Rinkside backend.
//!
//! The interesting part lives in [`caching`]: a file-backed stale-while-revalidate
//! cache that coalesces concurrent refreshes of the same key. Everything else is plumbing
//! that feeds it: a retrying JSON [`download`]er acting as producer, the configured
//! resource registry in [`services`], and the ambient [`config`], [`logging`] and
//! [`metrics`] modules.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
pub mod services;
pub mod utils;
