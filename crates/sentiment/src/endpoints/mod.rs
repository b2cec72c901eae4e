use axum::Router;
use axum::middleware;
use axum::routing::get;
use sentiment_service::metric;
use sentiment_service::services::SentimentService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

mod error;
mod metrics;
mod sse;

pub use error::ResponseError;

use sse::stream_sentiment;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: SentimentService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction());

    Router::new()
        .route("/sse/{ticker}", get(stream_sentiment))
        .route_layer(middleware::from_fn(metrics::track_metrics))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

/// Creates a service whose upstreams are mocked by `upstreams`.
#[cfg(test)]
pub(crate) fn test_service(upstreams: &sentiment_test::MockUpstreams) -> SentimentService {
    use sentiment_service::config::Config;

    let mut config = Config::default();
    config.polygon.api_key = Some("polygon-key".into());
    config.polygon.base_url = upstreams.polygon_url();
    config.google_news.base_url = upstreams.google_news_url();
    config.openai.api_key = Some("openai-key".into());
    config.openai.base_url = upstreams.openai_url();

    sentiment_service::services::create_service(&config).unwrap()
}
