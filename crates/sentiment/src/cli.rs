//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentiment_service::config::Config;
use sentiment_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

const LONG_VERSION: &str = concat!(
    "version: ",
    env!("CARGO_PKG_VERSION"),
    "\ngit commit: ",
    env!("SENTIMENT_GIT_VERSION")
);

/// Sentiment commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Check whether a running server responds.
    Healthcheck {
        /// The address of the server, defaults to the configured `bind` address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Seconds to wait for a response.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(name = "sentiment", version, long_version = LONG_VERSION)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(env!("SENTIMENT_RELEASE").into()),
        enable_logs: true,
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        let hostname = config.metrics.hostname_tag.clone().and_then(|tag| {
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .map(|name| (tag, name))
        });
        let environment = config.metrics.environment_tag.clone().and_then(|tag| {
            sentry
                .options()
                .environment
                .as_ref()
                .map(|name| (tag, name.to_string()))
        });
        tags.extend(hostname);
        tags.extend(environment);

        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure metrics")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(&config, addr, timeout)?,
    }

    Ok(())
}
