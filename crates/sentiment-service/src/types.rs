//! The data model of an analysis: tickers, the gathered sources and the model's answer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_TICKER_LEN: usize = 12;

/// A ticker string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTicker {
    #[error("ticker must not be empty")]
    Empty,
    #[error("ticker must be at most {MAX_TICKER_LEN} characters long")]
    TooLong,
    #[error("ticker contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated, upper-cased stock ticker symbol.
///
/// Tickers consist of 1 to 12 ASCII letters, digits, dots and dashes, e.g. `AAPL` or `BRK.B`.
/// Lowercase input is normalized, so `aapl` and `AAPL` name the same analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Ticker {
    type Err = InvalidTicker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InvalidTicker::Empty);
        }
        if s.len() > MAX_TICKER_LEN {
            return Err(InvalidTicker::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
        {
            return Err(InvalidTicker::InvalidChar(c));
        }

        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The publisher of a [`TickerNews`] item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

/// A news article about a ticker, as returned by the market data API.
///
/// These are the source items of an analysis. They are streamed to the client as they are,
/// so the field names follow the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerNews {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub publisher: Publisher,
    pub published_utc: DateTime<Utc>,
    pub article_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Company details of a ticker, as returned by the market data API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerOverview {
    pub ticker: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_class_shares_outstanding: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_shares_outstanding: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_employees: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sic_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
}

/// A directional call of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
    Unknown,
}

/// The model's estimate of an upcoming squeeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqueezePotential {
    High,
    Medium,
    Low,
    Unknown,
}

/// The structured answer of the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSentiment {
    /// A very brief overview of the company.
    pub overview: String,
    /// The sentiment driven by technical analysis.
    pub technical_sentiment: Sentiment,
    /// The sentiment driven by the news.
    pub news_sentiment: Sentiment,
    /// The potential for a gamma or momentum squeeze today.
    pub squeeze_potential: SqueezePotential,
    /// A short description of a known catalyst, or a statement that there is none.
    pub known_catalyst: String,
    /// Other brief notes about the ticker or the market in general.
    pub notes: String,
}

/// A completed analysis, the value that is cached per ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentReport {
    /// The news items gathered before the model was asked.
    pub news: Vec<TickerNews>,
    /// The model's final answer.
    pub chat: ChatSentiment,
    /// When the analysis completed.
    pub ran_at: DateTime<Utc>,
}
