//! Sentiment.
//!
//! Sentiment is a web service that streams a quick analysis of a stock ticker. It gathers
//! company details and news from market data APIs, scrapes recent headlines, and asks a
//! language model for its read on the ticker. Analyses are shared between concurrent
//! requests and cached for a short time.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
