//! Streams the analysis of stock tickers from market data, news and a language model.
//!
//! The [`SentimentService`](services::SentimentService) runs at most one analysis per ticker
//! at a time and keeps completed analyses for a configurable time. The progress of an analysis
//! is written as a sequence of phase markers and payloads, see [`stream`].

#[macro_use]
pub mod metrics;
pub mod config;
pub mod services;
pub mod stream;
pub mod types;
pub mod utils;
