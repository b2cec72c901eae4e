use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use sentiment_service::metric;

/// Records the duration and status code of every routed request.
///
/// Streaming responses are complete as soon as their headers are sent, so their duration
/// only covers the time until the stream starts.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_default();

    let response = next.run(request).await;

    metric!(timer("requests.duration") = start.elapsed(), "route" => &route);
    metric!(
        counter("responses.status_code") += 1,
        "status" => response.status().as_str(),
        "route" => &route,
    );

    response
}
