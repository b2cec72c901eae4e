//! Access to company details and news from the Polygon market data API.

use std::fmt;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::PolygonConfig;
use crate::types::{Ticker, TickerNews, TickerOverview};
use crate::utils::http::check_status;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    results: T,
}

pub struct PolygonClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    news_limit: usize,
}

impl fmt::Debug for PolygonClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolygonClient")
            .field("base_url", &self.base_url)
            .field("news_limit", &self.news_limit)
            .finish_non_exhaustive()
    }
}

impl PolygonClient {
    pub fn new(client: reqwest::Client, config: &PolygonConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("missing polygon API key, set POLYGON_API_KEY or `polygon.api_key`")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            news_limit: config.news_limit,
        })
    }

    /// Fetches the company details of `ticker`.
    #[tracing::instrument(skip(self), fields(%ticker))]
    pub async fn overview(&self, ticker: &Ticker) -> Result<TickerOverview> {
        let url = self.url(&format!("v3/reference/tickers/{ticker}"))?;
        self.fetch_json(url)
            .await
            .with_context(|| format!("failed to fetch overview of {ticker}"))
    }

    /// Fetches the most recent news about `ticker`, newest first.
    #[tracing::instrument(skip(self), fields(%ticker))]
    pub async fn news(&self, ticker: &Ticker) -> Result<Vec<TickerNews>> {
        let mut url = self.url("v2/reference/news")?;
        url.query_pairs_mut()
            .append_pair("ticker", ticker.as_str())
            .append_pair("order", "desc")
            .append_pair("sort", "published_utc")
            .append_pair("limit", &self.news_limit.to_string());

        self.fetch_json(url)
            .await
            .with_context(|| format!("failed to fetch news of {ticker}"))
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid polygon URL for `{path}`"))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("Fetching from Polygon: {}", url.path());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("polygon request failed")?;
        let response = check_status("polygon", response).await?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .context("failed to decode polygon response")?;
        Ok(envelope.results)
    }
}
