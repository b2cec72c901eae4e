//! Provides the sentiment service and a way to initialize it.
//!
//! The main [`create_service`] fn creates the upstream clients according to the provided
//! [`Config`] and returns a [`SentimentService`], which streams the analysis of a ticker to
//! a client. Concurrent requests for the same ticker share one analysis, and completed
//! analyses are replayed from an in-memory cache until they expire.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sentiment_cache::{CoalescingCache, LoadError};

use crate::config::Config;
use crate::stream::{PhaseWriter, emit_live, emit_replay};
use crate::types::{SentimentReport, Ticker};
use crate::utils::http;

pub mod analysis;
pub mod google_news;
pub mod openai;
pub mod polygon;
pub mod prompt;

pub use self::analysis::{Analyzer, SentimentAnalyzer};

/// How a call to [`SentimentService::stream_sentiment`] was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// This caller ran the analysis and streamed it live.
    Live,
    /// A cached or in-flight result of another caller was replayed.
    Replayed,
    /// The stream was terminated with an error.
    Failed,
    /// The caller went away while waiting for another caller's analysis.
    Cancelled,
}

impl StreamOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamOutcome::Live => "live",
            StreamOutcome::Replayed => "replayed",
            StreamOutcome::Failed => "failed",
            StreamOutcome::Cancelled => "cancelled",
        }
    }
}

pub fn create_service(config: &Config) -> Result<SentimentService> {
    let client = http::create_client(config)?;
    let analyzer = SentimentAnalyzer::from_config(client, config)
        .context("failed to create upstream clients")?;

    Ok(SentimentService::new(Arc::new(analyzer), config.cache_ttl))
}

/// Streams analyses of tickers, sharing and caching them per ticker.
#[derive(Clone)]
pub struct SentimentService {
    cache: Arc<CoalescingCache<Ticker, SentimentReport>>,
    analyzer: Arc<dyn Analyzer>,
}

impl std::fmt::Debug for SentimentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SentimentService {
    pub fn new(analyzer: Arc<dyn Analyzer>, cache_ttl: Duration) -> Self {
        Self {
            cache: Arc::new(CoalescingCache::new("sentiment", cache_ttl)),
            analyzer,
        }
    }

    /// How long completed analyses are replayed.
    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    /// Streams the analysis of `ticker` to `writer`, and terminates the stream.
    ///
    /// - If no analysis is cached or running, this caller runs a new one and streams its
    ///   progress live.
    /// - If an analysis is cached, or completes while waiting for it, it is replayed.
    /// - If the analysis waited for fails, the stream is terminated with an error naming the
    ///   failed analysis. The next call retries.
    ///
    /// Once `cancelled` resolves, a waiting caller stops waiting and writes nothing more. A
    /// running analysis is never interrupted, as other callers may be waiting for it.
    #[tracing::instrument(skip_all, fields(%ticker))]
    pub async fn stream_sentiment<C>(
        &self,
        ticker: &Ticker,
        writer: &mut PhaseWriter,
        cancelled: C,
    ) -> StreamOutcome
    where
        C: Future<Output = ()>,
    {
        metric!(counter("cache.access") += 1);

        let analyzer = Arc::clone(&self.analyzer);
        let key = ticker.clone();
        let compute = || {
            emit_live(&mut *writer, move |w| {
                Box::pin(async move { analyzer.analyze(&key, w).await })
            })
        };

        let result = self
            .cache
            .get_or_load_until(ticker, compute, cancelled)
            .await;

        let outcome = match result {
            Ok(loaded) if loaded.is_fresh() => {
                metric!(counter("cache.miss") += 1);
                StreamOutcome::Live
            }
            Ok(loaded) => {
                metric!(counter("cache.hit") += 1);
                match emit_replay(writer, loaded.value()) {
                    Ok(()) => StreamOutcome::Replayed,
                    Err(_) => StreamOutcome::Failed,
                }
            }
            // The live stream already carries the error.
            Err(LoadError::Compute(_)) => {
                metric!(counter("cache.computation.failed") += 1);
                StreamOutcome::Failed
            }
            Err(err @ LoadError::LeaderFailed { .. }) => {
                if let Err(protocol_err) = writer.error(&err) {
                    tracing::error!(error = %protocol_err, "could not report failed analysis");
                }
                StreamOutcome::Failed
            }
            Err(LoadError::Cancelled) => StreamOutcome::Cancelled,
        };

        metric!(counter("stream.outcome") += 1, "outcome" => outcome.as_str());
        tracing::debug!(outcome = outcome.as_str(), "Finished sentiment stream");
        outcome
    }

    /// Returns the cached report of `ticker`, if it is still fresh.
    pub async fn cached_report(&self, ticker: &Ticker) -> Option<Arc<SentimentReport>> {
        self.cache.get_if_live(ticker).await
    }
}
