//! Scrapes recent headlines from the Google News search page.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use url::Url;

use crate::config::GoogleNewsConfig;
use crate::types::Ticker;
use crate::utils::http::check_status;

static ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").unwrap());
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap());
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<time\b[^>]*>(.*?)</time>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// The visible texts of a single search result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Article {
    pub headlines: Vec<String>,
    pub times: Vec<String>,
}

impl Article {
    /// Renders the article for the prompt.
    fn render(&self) -> String {
        format!(
            "Headlines: {}\nTimes:{}\n",
            self.headlines.join(", "),
            self.times.join(", ")
        )
    }
}

#[derive(Debug)]
pub struct GoogleNewsClient {
    client: reqwest::Client,
    base_url: Url,
}

impl GoogleNewsClient {
    pub fn new(client: reqwest::Client, config: &GoogleNewsConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
        }
    }

    /// Searches for `ticker` and renders all results for the prompt.
    #[tracing::instrument(skip(self), fields(%ticker))]
    pub async fn headlines(&self, ticker: &Ticker) -> Result<String> {
        let mut url = self
            .base_url
            .join("search")
            .context("invalid google news URL")?;
        url.query_pairs_mut().append_pair("q", ticker.as_str());

        tracing::debug!("Scraping headlines from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("google news request failed")?;
        let response = check_status("google news", response).await?;
        let html = response
            .text()
            .await
            .context("failed to read google news response")?;

        let articles = parse_articles(&html);
        tracing::debug!("Scraped {} articles", articles.len());

        Ok(render_articles(&articles))
    }
}

/// Extracts the texts of all links and times from every `<article>` of a page.
pub fn parse_articles(html: &str) -> Vec<Article> {
    ARTICLE
        .captures_iter(html)
        .map(|article| {
            let body = &article[1];
            Article {
                headlines: texts(&LINK, body),
                times: texts(&TIME, body),
            }
        })
        .collect()
}

/// Renders articles in the order they were found, separated by blank lines.
pub fn render_articles(articles: &[Article]) -> String {
    articles
        .iter()
        .map(Article::render)
        .collect::<Vec<_>>()
        .join("\n")
}

fn texts(element: &Regex, html: &str) -> Vec<String> {
    element
        .captures_iter(html)
        .map(|captures| inner_text(&captures[1]))
        .filter(|text| !text.is_empty())
        .collect()
}

fn inner_text(html: &str) -> String {
    let text = TAG.replace_all(html, "");
    decode_entities(text.trim())
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
