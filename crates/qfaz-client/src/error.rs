//! Client error types

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The request exceeded its configured timeout before any response arrived
    #[error("Request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No HTTP response was received (connection refused, DNS failure, reset...)
    #[error("Could not reach backend at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A reachable backend answered with an error status
    #[error("Backend returned error: {status} - {}", server_message(.detail, .body))]
    Server {
        status: StatusCode,
        detail: Option<String>,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn server_message<'a>(detail: &'a Option<String>, body: &'a str) -> &'a str {
    detail.as_deref().unwrap_or(body)
}

impl ClientError {
    /// Classify an error raised by `send()`.
    ///
    /// Redirect errors mean responses did arrive, and builder errors mean the
    /// request never left; neither is a connectivity failure.
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        if source.is_redirect() || source.is_builder() {
            ClientError::Http(source)
        } else if source.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
                source,
            }
        } else {
            ClientError::Connection {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Build a server error from a non-success response body.
    ///
    /// The backend reports failures as `{"detail": "..."}`; anything else is
    /// kept as the raw body.
    pub(crate) fn server(status: StatusCode, body: String) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| match v.get("detail") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            });

        ClientError::Server {
            status,
            detail,
            body,
        }
    }

    /// Whether the next backend candidate should be tried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::Connection { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// Server-supplied detail message, if the backend sent one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Server { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of an authoritative server rejection
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
