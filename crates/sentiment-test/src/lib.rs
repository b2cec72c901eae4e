//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`MockUpstreams`], make sure that the mocks are held until all requests to
//!    them have been made. If they are dropped, the ports remain open and all connections to
//!    them will time out. To avoid this, assign them to a variable: `let upstreams =
//!    MockUpstreams::new();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{self, Request};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// A ticker for which the mocked market data API responds with a server error.
pub const BROKEN_TICKER: &str = "BROKE";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `sentiment` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "sentiment=trace,sentiment_service=trace,sentiment_cache=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

/// Returns the contents of a fixture as a string.
pub fn read_fixture_string(path: impl AsRef<Path>) -> String {
    String::from_utf8(read_fixture(path)).unwrap()
}

/// Renders a chat completions event stream that delivers `fragments` as content deltas.
pub fn completion_stream<S: AsRef<str>>(fragments: &[S]) -> String {
    let mut body = String::new();
    for (index, fragment) in fragments.iter().enumerate() {
        let finish_reason = (index + 1 == fragments.len()).then_some("stop");
        let chunk = serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "delta": { "content": fragment.as_ref() },
                "finish_reason": finish_reason,
            }],
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// The model answer served by [`MockUpstreams`] by default, split into a few fragments.
pub fn default_answer_fragments() -> Vec<String> {
    let answer = read_fixture_string("openai/answer.json");
    let answer = answer.trim();
    let third = answer.len() / 3;
    vec![
        answer[..third].to_owned(),
        answer[third..2 * third].to_owned(),
        answer[2 * third..].to_owned(),
    ]
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Creates a new test server serving the given router.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct Behavior {
    completion: String,
    completion_delay: Duration,
}

/// Local stand-ins for the market data, headline and language model APIs.
///
/// - `polygon/` serves ticker details and news from the `polygon` fixtures, and fails with a
///   500 for [`BROKEN_TICKER`].
/// - `google/` serves the search page from the `google_news.html` fixture.
/// - `openai/` streams a chat completion, by default the `openai/answer.json` fixture.
///
/// Every request is counted by its path.
#[derive(Debug)]
pub struct MockUpstreams {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
    behavior: Arc<Mutex<Behavior>>,
}

impl MockUpstreams {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));
        let behavior = Arc::new(Mutex::new(Behavior {
            completion: completion_stream(&default_answer_fragments()),
            completion_delay: Duration::ZERO,
        }));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri, req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.path().to_owned()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let completions = {
            let behavior = behavior.clone();
            move || {
                let behavior = behavior.clone();
                async move {
                    let (body, delay) = {
                        let behavior = behavior.lock().unwrap();
                        (behavior.completion.clone(), behavior.completion_delay)
                    };
                    tokio::time::sleep(delay).await;
                    ([(header::CONTENT_TYPE, "text/event-stream")], body)
                }
            }
        };

        let router = Router::new()
            .route(
                "/polygon/v3/reference/tickers/{ticker}",
                get(|extract::Path(ticker): extract::Path<String>| async move {
                    if ticker == BROKEN_TICKER {
                        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
                    }
                    json_fixture("polygon/ticker_details.json")
                }),
            )
            .route(
                "/polygon/v2/reference/news",
                get(|| async { json_fixture("polygon/news.json") }),
            )
            .route(
                "/google/search",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        read_fixture("google_news.html"),
                    )
                }),
            )
            .route("/openai/chat/completions", post(completions))
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self {
            server,
            hits,
            behavior,
        }
    }

    /// Replaces the body of the streamed chat completion.
    pub fn set_completion(&self, body: impl Into<String>) {
        self.behavior.lock().unwrap().completion = body.into();
    }

    /// Delays the start of every chat completion response.
    pub fn set_completion_delay(&self, delay: Duration) {
        self.behavior.lock().unwrap().completion_delay = delay;
    }

    /// Returns how often the given path was requested so far.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Returns the number of requests made since the last call, and resets the counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns all requested paths and their counts since the last call, and resets the counts.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    /// Base URL of the mocked market data API.
    pub fn polygon_url(&self) -> Url {
        self.server.url("polygon/")
    }

    /// Base URL of the mocked news site.
    pub fn google_news_url(&self) -> Url {
        self.server.url("google/")
    }

    /// Base URL of the mocked language model API.
    pub fn openai_url(&self) -> Url {
        self.server.url("openai/")
    }
}

impl Default for MockUpstreams {
    fn default() -> Self {
        Self::new()
    }
}

fn json_fixture(path: &str) -> axum::response::Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        read_fixture(path),
    )
        .into_response()
}
