// ── Core error types ──
//
// User-facing errors from homeconnect-core. Callers never see raw HTTP
// status codes or OAuth error strings; the `From<homeconnect_api::Error>`
// impl translates them into variants with actionable messages. Schema
// drift is never an error.

use thiserror::Error;

use homeconnect_api::ErrorBody;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the Home Connect API at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Event stream failed: {reason}")]
    EventStream { reason: String },

    // ── Authorisation errors ─────────────────────────────────────────
    #[error("Not authorised: {message}")]
    NotAuthorised {
        message: String,
        /// Guidance for the user, when the cause is known.
        help: Option<String>,
    },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Unexpected response from the API: {message}")]
    InvalidResponse { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Request rejected by the API: {message}")]
    Rejected {
        message: String,
        /// The API error key (e.g. `SDK.Error.HomeAppliance.Connection.Initialization.Failed`).
        code: Option<String>,
        status: u16,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The API error key, if the failure carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

fn status_message(body: &ErrorBody) -> String {
    body.description()
        .or_else(|| body.code())
        .map_or_else(|| body.to_string(), str::to_owned)
}

impl From<homeconnect_api::Error> for CoreError {
    fn from(err: homeconnect_api::Error) -> Self {
        use homeconnect_api::Error;

        match err {
            Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            Error::HttpClient(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Error::StatusCode {
                status: 401 | 403,
                body,
                ..
            } => CoreError::NotAuthorised {
                message: status_message(&body),
                help: Some("check the scopes granted to the client id".into()),
            },
            Error::StatusCode {
                status: 404, path, ..
            } => CoreError::NotFound { resource: path },
            Error::StatusCode { status, body, .. } => CoreError::Rejected {
                message: status_message(&body),
                code: body.code().map(str::to_owned),
                status,
            },
            Error::Validation { message, body: _ } => CoreError::InvalidResponse { message },
            Error::Authorisation { message, source } => {
                let help = source.as_deref().and_then(|cause| match cause.error_code() {
                    Some("invalid_client" | "unauthorized_client") => {
                        Some("check the client id and secret of the registered application".into())
                    }
                    Some("invalid_scope") => {
                        Some("the application is not permitted to request these scopes".into())
                    }
                    Some("access_denied") => Some("authorisation was declined by the user".into()),
                    _ => None,
                });
                CoreError::NotAuthorised { message, help }
            }
            Error::EventStream(e) => CoreError::EventStream {
                reason: e.to_string(),
            },
            Error::TokenStore(message) => CoreError::Internal(format!("Token store: {message}")),
            Error::Config(message) => CoreError::Config { message },
        }
    }
}
