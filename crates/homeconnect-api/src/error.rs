use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Top-level error type for the `homeconnect-api` crate.
///
/// Covers every failure mode of the client engine: transport, HTTP
/// status, response shape, authorisation, event stream and token
/// persistence. `homeconnect-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Network-level failure (connection refused, DNS, timeout, ...).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── HTTP status ─────────────────────────────────────────────────
    /// Non-2xx response (other than an expected redirect).
    #[error("HTTP {status} for {method} {path}: {body}")]
    StatusCode {
        status: u16,
        method: String,
        path: String,
        body: ErrorBody,
        /// Parsed `retry-after` header, when the server sent one.
        retry_after: Option<Duration>,
    },

    // ── Response shape ──────────────────────────────────────────────
    /// The response did not have the expected shape (content type,
    /// status, or JSON structure). Carries the raw body for debugging.
    #[error("Unexpected response: {message}")]
    Validation { message: String, body: String },

    // ── Authorisation ───────────────────────────────────────────────
    /// Failure while obtaining or using credentials.
    #[error("Authorisation failed: {message}")]
    Authorisation {
        message: String,
        #[source]
        source: Option<Arc<Error>>,
    },

    // ── Event stream ────────────────────────────────────────────────
    #[error(transparent)]
    EventStream(#[from] EventStreamError),

    // ── Persistence ─────────────────────────────────────────────────
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// Invalid runtime configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Terminal condition of a server-sent event stream.
///
/// The stream is never restartable in place; callers reconnect with a
/// fresh request and decide from the variant how long to back off.
#[derive(Debug, Error)]
pub enum EventStreamError {
    /// The server closed the stream cleanly.
    #[error("Event stream ended")]
    Ended,

    /// No data (not even a keep-alive) arrived within the read timeout.
    #[error("Event stream idle for more than {0:?}")]
    Timeout(Duration),

    /// The body failed mid-stream.
    #[error("Event stream failed: {0}")]
    Failed(#[source] reqwest::Error),

    /// A record could not be interpreted.
    #[error("Malformed event: {0}")]
    Malformed(String),
}

impl Error {
    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::StatusCode { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// API or OAuth error code from the response body
    /// (e.g. `"SDK.Error.NoProgramActive"` or `"authorization_pending"`).
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::StatusCode { body, .. } => body.code(),
            Self::Authorisation {
                source: Some(cause),
                ..
            } => cause.error_code(),
            _ => None,
        }
    }

    /// Returns `true` for failures likely to succeed if repeated
    /// after a delay: network errors and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::StatusCode { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

// ── Error bodies ─────────────────────────────────────────────────────

/// Parsed body of an error response.
///
/// Data endpoints return `{"error": {"key", "description"}}`, the OAuth
/// endpoints return `{"error", "error_description"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorBody {
    Api {
        key: String,
        description: Option<String>,
    },
    OAuth {
        error: String,
        description: Option<String>,
    },
    Raw(String),
    Empty,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireErrorBody {
    Api { error: ApiErrorDetail },
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    key: String,
    #[serde(default)]
    description: Option<String>,
}

impl ErrorBody {
    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<WireErrorBody>(text) {
            Ok(WireErrorBody::Api { error }) => Self::Api {
                key: error.key,
                description: error.description,
            },
            Ok(WireErrorBody::OAuth {
                error,
                error_description,
            }) => Self::OAuth {
                error,
                description: error_description,
            },
            Err(_) => Self::Raw(text.to_owned()),
        }
    }

    /// The machine-readable error code, if the body had one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { key, .. } => Some(key),
            Self::OAuth { error, .. } => Some(error),
            Self::Raw(_) | Self::Empty => None,
        }
    }

    /// The human-readable description, if the body had one.
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Api { description, .. } | Self::OAuth { description, .. } => {
                description.as_deref()
            }
            Self::Raw(_) | Self::Empty => None,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { key, description } | Self::OAuth { error: key, description } => {
                match description {
                    Some(d) => write!(f, "{key} ({d})"),
                    None => f.write_str(key),
                }
            }
            Self::Raw(text) => f.write_str(text),
            Self::Empty => f.write_str("<empty body>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_error_body() {
        let body = ErrorBody::parse(
            r#"{"error":{"key":"SDK.Error.NoProgramActive","description":"No program active"}}"#,
        );
        assert_eq!(body.code(), Some("SDK.Error.NoProgramActive"));
        assert_eq!(body.description(), Some("No program active"));
    }

    #[test]
    fn parses_oauth_error_body() {
        let body = ErrorBody::parse(r#"{"error":"authorization_pending","error_description":"wait"}"#);
        assert_eq!(
            body,
            ErrorBody::OAuth {
                error: "authorization_pending".into(),
                description: Some("wait".into()),
            }
        );
    }

    #[test]
    fn keeps_unparseable_body_raw() {
        assert_eq!(ErrorBody::parse("<html>"), ErrorBody::Raw("<html>".into()));
        assert_eq!(ErrorBody::parse("  "), ErrorBody::Empty);
    }

    #[test]
    fn authorisation_error_exposes_cause_code() {
        let cause = Error::StatusCode {
            status: 400,
            method: "POST".into(),
            path: "/security/oauth/token".into(),
            body: ErrorBody::OAuth {
                error: "invalid_client".into(),
                description: None,
            },
            retry_after: None,
        };
        let err = Error::Authorisation {
            message: "token exchange failed".into(),
            source: Some(Arc::new(cause)),
        };
        assert_eq!(err.error_code(), Some("invalid_client"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::StatusCode {
            status: 503,
            method: "GET".into(),
            path: "/api/homeappliances".into(),
            body: ErrorBody::Empty,
            retry_after: None,
        };
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }
}
