use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
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
    /// A tag name to report the environment to, for each metric. Defaults to not sending such a tag.
    pub environment_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "sentiment".into(),
            hostname_tag: None,
            environment_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Access to the Polygon market data API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PolygonConfig {
    /// The API key, defaults to the `POLYGON_API_KEY` environment variable.
    pub api_key: Option<String>,
    /// Base URL of the API.
    pub base_url: Url,
    /// How many of the most recent news items are fetched per ticker.
    pub news_limit: usize,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("POLYGON_API_KEY").ok(),
            base_url: default_url("https://api.polygon.io/"),
            news_limit: 10,
        }
    }
}

/// Scraping of Google News headlines.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GoogleNewsConfig {
    /// Base URL of the news site, the search is performed at `{base_url}/search`.
    pub base_url: Url,
}

impl Default for GoogleNewsConfig {
    fn default() -> Self {
        Self {
            base_url: default_url("https://news.google.com/"),
        }
    }
}

/// Access to the OpenAI chat completions API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// The API key, defaults to the `OPENAI_KEY` environment variable.
    pub api_key: Option<String>,
    /// Base URL of the API, the completion is requested at `{base_url}/chat/completions`.
    pub base_url: Url,
    /// The model used for the analysis.
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("OPENAI_KEY").ok(),
            base_url: default_url("https://api.openai.com/v1/"),
            model: "gpt-4o".into(),
        }
    }
}

fn default_url(url: &str) -> Url {
    // The defaults are literals that are known to parse.
    Url::parse(url).unwrap_or_else(|err| panic!("invalid default url {url}: {err}"))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// How long a finished analysis is reused for later requests of the same ticker.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// The timeout for establishing a connection to an upstream API.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Market data and news.
    pub polygon: PolygonConfig,

    /// Headline scraping.
    pub google_news: GoogleNewsConfig,

    /// The language model.
    pub openai: OpenAiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:5000".to_owned(),
            cache_ttl: Duration::from_secs(2 * 60),
            connect_timeout: Duration::from_secs(15),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            polygon: PolygonConfig::default(),
            google_news: GoogleNewsConfig::default(),
            openai: OpenAiConfig::default(),
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

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
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

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
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
