use std::fmt;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Which outbound integration an upstream failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Proxy,
    Search,
    Translate,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Proxy => f.write_str("proxy"),
            Service::Search => f.write_str("search"),
            Service::Translate => f.write_str("translate"),
        }
    }
}

/// Classification of a failed conversation with a third-party server.
///
/// Only the classification ever reaches a client; the underlying transport
/// error is logged where it happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Timeout,
    Connect,
    Status(u16),
    Body,
    Decode,
    Other,
}

impl UpstreamFailure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamFailure::Timeout
        } else if err.is_connect() {
            UpstreamFailure::Connect
        } else if let Some(status) = err.status() {
            UpstreamFailure::Status(status.as_u16())
        } else if err.is_body() {
            UpstreamFailure::Body
        } else if err.is_decode() {
            UpstreamFailure::Decode
        } else {
            UpstreamFailure::Other
        }
    }

    /// Transient failures worth another attempt: timeouts, refused
    /// connections, throttling and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamFailure::Timeout | UpstreamFailure::Connect => true,
            UpstreamFailure::Status(status) => *status == 429 || *status >= 500,
            UpstreamFailure::Body | UpstreamFailure::Decode | UpstreamFailure::Other => false,
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Timeout => f.write_str("upstream request timed out"),
            UpstreamFailure::Connect => f.write_str("could not connect to upstream server"),
            UpstreamFailure::Status(status) => write!(f, "upstream responded with status {status}"),
            UpstreamFailure::Body => f.write_str("failed to read upstream response"),
            UpstreamFailure::Decode => f.write_str("upstream response could not be decoded"),
            UpstreamFailure::Other => f.write_str("upstream request failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing target url")]
    MissingTarget,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("{service} upstream failed: {failure}")]
    UpstreamFetch {
        service: Service,
        failure: UpstreamFailure,
    },

    #[error("destination {0} is not allowed")]
    DestinationBlocked(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
}

impl GatewayError {
    pub fn upstream(service: Service, failure: UpstreamFailure) -> Self {
        GatewayError::UpstreamFetch { service, failure }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingTarget
            | GatewayError::InvalidUrl(_)
            | GatewayError::MissingParameter(_)
            | GatewayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamFetch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::DestinationBlocked(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn envelope(&self) -> ErrorBody {
        let (error, details) = match self {
            GatewayError::MissingTarget => ("URL parameter is required".to_string(), None),
            GatewayError::InvalidUrl(reason) => ("Invalid URL".to_string(), Some(reason.clone())),
            GatewayError::MissingParameter(name) => {
                (format!("`{name}` is required"), None)
            }
            GatewayError::InvalidBody(reason) => {
                ("Invalid request body".to_string(), Some(reason.clone()))
            }
            GatewayError::UpstreamFetch { service, failure } => {
                let error = match service {
                    Service::Proxy => "Proxy request failed",
                    Service::Search => "Search request failed",
                    Service::Translate => "Translation request failed",
                };
                (error.to_string(), Some(failure.to_string()))
            }
            GatewayError::DestinationBlocked(host) => (
                "Destination not allowed".to_string(),
                Some(format!("{host} resolves to a private or local network address")),
            ),
            GatewayError::RateLimited { retry_after_secs } => (
                "Too many requests".to_string(),
                Some(format!("retry after {retry_after_secs} seconds")),
            ),
        };
        ErrorBody { error, details }
    }
}

/// JSON error envelope returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.envelope())).into_response();
        if let GatewayError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
