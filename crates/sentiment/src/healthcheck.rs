use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use sentiment_service::config::Config;

/// Requests `/healthcheck` from a running server and prints whether it responded.
pub fn healthcheck(config: &Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    let addr = match addr {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address `{}`", config.bind))?,
    };

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("OK");
            Ok(())
        }
        Ok(response) => {
            println!("ERROR");
            anyhow::bail!("sentiment ({addr}) is unhealthy, status: {}", response.status())
        }
        Err(error) => {
            println!("ERROR");
            anyhow::bail!("failed to check health of sentiment ({addr}): {error}")
        }
    }
}
