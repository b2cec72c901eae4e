use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentiment_service::types::InvalidTicker;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

/// An error that is returned to the client instead of a stream.
#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl From<InvalidTicker> for ResponseError {
    fn from(err: InvalidTicker) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: anyhow::Error::new(err).context("invalid ticker"),
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = (!causes.is_empty()).then_some(causes);

        ApiErrorResponse { detail, causes }
    }
}
