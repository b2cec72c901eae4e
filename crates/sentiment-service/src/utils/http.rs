use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Response;

use crate::config::Config;

/// The user agent sent to all upstream APIs.
pub const USER_AGENT: &str = concat!("sentiment/", env!("CARGO_PKG_VERSION"));

/// Creates the [`reqwest::Client`] shared by all upstream clients.
///
/// Only connecting is bounded by a timeout. The model streams its answer for an unknown amount
/// of time, so the duration of a whole request is not limited.
pub fn create_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("failed to create HTTP client")
}

/// Turns a non-success response into an error that names the upstream.
///
/// The body of the response is included, as APIs report the reason of a failure there.
pub async fn check_status(upstream: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    tracing::warn!("{} returned status code {}", upstream, status);
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        anyhow::bail!("{upstream} responded with {status}");
    }
    anyhow::bail!("{upstream} responded with {status}: {}", truncate(body, 200))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 2), "ab");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("äöü", 1), "ä");
    }
}
