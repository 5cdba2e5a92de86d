use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the server.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "rinkside".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings for fetching from upstream sources.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// The `User-Agent` sent with every upstream request.
    pub user_agent: String,

    /// Total timeout of a single request attempt.
    ///
    /// This is also the only bound on how long an in-flight refresh can hold its key.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How often a failed request is retried. Client errors (4xx) are never retried.
    pub max_retries: u32,

    /// The delay before the first retry, doubled for every further attempt.
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,

    /// Upper bound for the delay between two attempts.
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("rinkside/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

/// When a fallback served by the API counts as having no data at all.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWhen {
    /// The value itself is empty: `null`, `""`, `[]` or `{}`.
    #[default]
    Empty,
    /// The value is empty, or an object whose fields are all empty, like
    /// `{"skaters": [], "goalies": []}`.
    AllFieldsEmpty,
}

/// Limits on requests to the `/api` routes, counted per client IP.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// The sliding window requests are counted in.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How many requests a client may make per window. `0` disables the limit.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let window = env::var("RATE_LIMIT_WINDOW_MS")
            .ok()
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(15 * 60));
        let max_requests = env::var("RATE_LIMIT_MAX")
            .ok()
            .and_then(|max| max.parse::<u32>().ok())
            .unwrap_or(100);

        Self {
            window,
            max_requests,
        }
    }
}

/// A single cached resource, served under `/api/<name>`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// The cache key. Defaults to `asu_hockey_<name>`.
    #[serde(default)]
    pub key: Option<String>,

    /// Where fresh data for this resource is fetched from.
    pub upstream: Url,

    /// How long a stored value counts as fresh.
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,

    /// Whether an empty upstream result may replace the stored value.
    ///
    /// Off by default, so that a transient empty response never clobbers good stale data.
    #[serde(default)]
    pub cache_empty: bool,

    /// Served when there is neither cached data nor a successful upstream response.
    #[serde(default = "default_fallback")]
    pub fallback: serde_json::Value,

    /// Refresh this resource in the background at this interval, regardless of traffic.
    #[serde(with = "humantime_serde", default)]
    pub refresh_every: Option<Duration>,

    /// How the API decides that a fallback carries no data and answers with an error instead.
    #[serde(default)]
    pub empty_when: EmptyWhen,
}

fn default_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_fallback() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

impl ResourceConfig {
    /// The configured cache key, or the conventional one derived from the resource name.
    pub fn cache_key(&self, name: &str) -> String {
        match self.key {
            Some(ref key) => key.clone(),
            None => format!("asu_hockey_{name}"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to store cache entries in. One file is written per cache key.
    pub cache_dir: PathBuf,

    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Origins that may call the API from a browser.
    pub cors_origins: Vec<String>,

    /// A directory with the front-end build to serve next to the API.
    pub static_dir: Option<PathBuf>,

    /// Whether responses are gzip-compressed for clients accepting it.
    pub compression: bool,

    /// Per-client limits on the `/api` routes.
    pub rate_limit: RateLimitConfig,

    /// Settings for upstream requests.
    pub http: HttpConfig,

    /// All resources, keyed by the name they are served under.
    pub resources: BTreeMap<String, ResourceConfig>,
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    let port = env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(5000);
    format!("127.0.0.1:{port}")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: PathBuf::from("cache"),
            bind: default_bind(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            cors_origins: Vec::new(),
            static_dir: None,
            compression: true,
            rate_limit: RateLimitConfig::default(),
            http: HttpConfig::default(),
            resources: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
