//! The analysis pipeline that gathers sources for a ticker and asks the model about them.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::google_news::GoogleNewsClient;
use super::openai::{OpenAiClient, ResponseSchema};
use super::polygon::PolygonClient;
use super::prompt;
use crate::config::Config;
use crate::stream::{Marker, PhaseWriter, StreamState};
use crate::types::{ChatSentiment, SentimentReport, Ticker};

/// Computes a fresh [`SentimentReport`], reporting its progress to a [`PhaseWriter`].
///
/// An implementation writes the phases of a live stream up to and including the streamed
/// answer. Terminating the stream is left to the caller.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, ticker: &Ticker, writer: &mut PhaseWriter) -> Result<SentimentReport>;
}

/// Analyzes tickers with market data, scraped headlines and a language model.
#[derive(Debug)]
pub struct SentimentAnalyzer {
    polygon: PolygonClient,
    google_news: GoogleNewsClient,
    openai: OpenAiClient,
}

impl SentimentAnalyzer {
    pub fn new(polygon: PolygonClient, google_news: GoogleNewsClient, openai: OpenAiClient) -> Self {
        Self {
            polygon,
            google_news,
            openai,
        }
    }

    /// Creates all upstream clients from the configuration, sharing one HTTP client.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self> {
        let polygon = PolygonClient::new(client.clone(), &config.polygon)?;
        let google_news = GoogleNewsClient::new(client.clone(), &config.google_news);
        let openai = OpenAiClient::new(client, &config.openai)?;
        Ok(Self::new(polygon, google_news, openai))
    }
}

#[async_trait]
impl Analyzer for SentimentAnalyzer {
    #[tracing::instrument(skip_all, fields(%ticker))]
    async fn analyze(&self, ticker: &Ticker, writer: &mut PhaseWriter) -> Result<SentimentReport> {
        let start = Instant::now();

        writer.marker(Marker::Overview)?;
        let overview = self.polygon.overview(ticker).await?;

        writer.marker(Marker::PolygonNews)?;
        let news = self.polygon.news(ticker).await?;
        writer.event(serde_json::to_string(&news).context("failed to serialize news")?)?;

        writer.marker(Marker::GoogleNews)?;
        let headlines = self.google_news.headlines(ticker).await?;

        writer.marker(Marker::Model)?;
        let user = prompt::user_prompt(ticker, &overview, &news, &headlines, Utc::now())?;
        let schema = ResponseSchema {
            name: prompt::SCHEMA_NAME,
            description: prompt::SCHEMA_DESCRIPTION,
            schema: prompt::answer_schema(),
        };

        let mut fragments: i64 = 0;
        let answer = self
            .openai
            .stream_completion(prompt::SYSTEM_PROMPT, &user, &schema, |fragment| {
                if writer.state() == StreamState::Model {
                    writer.marker(Marker::ModelBegin)?;
                }
                writer.event(fragment)?;
                fragments += 1;
                Ok(())
            })
            .await
            .context("model stream failed")?;

        metric!(counter("analysis.fragments") += fragments);

        if answer.trim().is_empty() {
            anyhow::bail!("model returned an empty answer");
        }
        let chat: ChatSentiment =
            serde_json::from_str(&answer).context("failed to decode model answer")?;

        metric!(timer("analysis.duration") = start.elapsed());
        tracing::info!(
            news = news.len(),
            squeeze_potential = ?chat.squeeze_potential,
            "Analysis completed",
        );

        Ok(SentimentReport {
            news,
            chat,
            ran_at: Utc::now(),
        })
    }
}
