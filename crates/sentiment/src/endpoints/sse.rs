use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use sentiment_service::services::SentimentService;
use sentiment_service::stream::{Frame, PhaseWriter};
use sentiment_service::types::Ticker;
use sentry::{Hub, SentryFutureExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::Instrument;

use super::ResponseError;

/// Streams the analysis of a ticker as server-sent events.
///
/// Every frame of the analysis is sent as the `data` of one event. The stream ends after the
/// `[DONE]` marker or an `[ERROR]` frame. Invalid tickers are rejected before streaming.
pub async fn stream_sentiment(
    State(service): State<SentimentService>,
    Path(ticker): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ResponseError> {
    let ticker: Ticker = ticker.parse()?;
    sentry::configure_scope(|scope| scope.set_tag("ticker", &ticker));

    let (tx, rx) = mpsc::unbounded_channel();
    let client = tx.clone();
    let mut writer = PhaseWriter::new(tx);

    // The analysis runs detached from the response, so that it completes for waiting
    // requests even if this client disconnects.
    let analysis = async move {
        let outcome = service
            .stream_sentiment(&ticker, &mut writer, client.closed())
            .await;
        tracing::debug!("Stream of {} ended: {:?}", ticker, outcome);
    };
    tokio::spawn(
        analysis
            .in_current_span()
            .bind_hub(Hub::new_from_top(Hub::current())),
    );

    let events = UnboundedReceiverStream::new(rx)
        .map(|frame| Ok(Event::default().data(event_data(&frame))));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Renders a frame as event data, which cannot carry carriage returns.
fn event_data(frame: &Frame) -> String {
    frame.data().replace('\r', "")
}

#[cfg(test)]
mod tests {
    use sentiment_test::{BROKEN_TICKER, MockUpstreams, Server};

    use super::*;
    use crate::endpoints::{create_app, test_service};

    /// Returns the `data` of all events, with payloads other than errors abbreviated.
    fn outline(body: &str) -> Vec<String> {
        payloads(body)
            .into_iter()
            .map(|data| match Frame::from_data(data) {
                Frame::Event(_) => "<event>".to_owned(),
                frame => frame.data(),
            })
            .collect()
    }

    fn payloads(body: &str) -> Vec<&str> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| data.strip_prefix(' ').unwrap_or(data))
            .collect()
    }

    async fn get(server: &Server, path: &str) -> reqwest::Response {
        reqwest::get(server.url(path)).await.unwrap()
    }

    #[tokio::test]
    async fn test_live_then_replay() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        let server = Server::with_router(create_app(test_service(&upstreams)));

        let response = get(&server, "/sse/abc").await;
        assert!(response.status().is_success());
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let live = response.text().await.unwrap();
        insta::assert_debug_snapshot!(outline(&live), @r#"
        [
            "[OVERVIEW]",
            "[PNEWS]",
            "<event>",
            "[GNEWS]",
            "[MODEL]",
            "[MODELBEGIN]",
            "<event>",
            "<event>",
            "<event>",
            "[RANAT]",
            "<event>",
            "[DONE]",
        ]
        "#);

        let replay = get(&server, "/sse/ABC").await.text().await.unwrap();
        insta::assert_debug_snapshot!(outline(&replay), @r#"
        [
            "[TICKNEWS]",
            "<event>",
            "[MODELBEGIN]",
            "<event>",
            "[RANAT]",
            "<event>",
            "[DONE]",
        ]
        "#);

        // The replay carries the same sources, answer and timestamp as the live stream.
        let live = payloads(&live);
        let replay = payloads(&replay);
        assert_eq!(replay[1], live[2]);
        assert_eq!(replay[5], live[10]);

        let streamed: serde_json::Value = serde_json::from_str(&live[6..9].concat()).unwrap();
        let answer: serde_json::Value = serde_json::from_str(replay[3]).unwrap();
        let expected: serde_json::Value =
            serde_json::from_str(&sentiment_test::read_fixture_string("openai/answer.json"))
                .unwrap();
        assert_eq!(streamed, expected);
        assert_eq!(answer, expected);

        assert_eq!(upstreams.hits("/openai/chat/completions"), 1);
        assert_eq!(upstreams.hits("/polygon/v3/reference/tickers/ABC"), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        let server = Server::with_router(create_app(test_service(&upstreams)));

        let response = get(&server, &format!("/sse/{BROKEN_TICKER}")).await;
        assert!(response.status().is_success());

        let body = response.text().await.unwrap();
        insta::assert_debug_snapshot!(outline(&body), @r#"
        [
            "[OVERVIEW]",
            "[ERROR] failed to fetch overview of BROKE: polygon responded with 500 Internal Server Error: internal error",
        ]
        "#);

        // Failures are not cached.
        get(&server, &format!("/sse/{BROKEN_TICKER}"))
            .await
            .text()
            .await
            .unwrap();
        assert_eq!(upstreams.hits("/polygon/v3/reference/tickers/BROKE"), 2);
    }

    #[tokio::test]
    async fn test_invalid_ticker() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        let server = Server::with_router(create_app(test_service(&upstreams)));

        let response = get(&server, "/sse/ABC$").await;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json().await.unwrap();
        insta::assert_json_snapshot!(body, @r#"
        {
          "causes": [
            "ticker contains invalid character '$'"
          ],
          "detail": "invalid ticker"
        }
        "#);
        assert_eq!(upstreams.accesses(), 0);
    }

    #[test]
    fn test_carriage_returns_are_dropped() {
        assert_eq!(event_data(&Frame::Event("{\r\n}".into())), "{\n}");
        assert_eq!(event_data(&Frame::Error("a\rb".into())), "[ERROR] ab");
    }
}
