//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use homeconnect_config::ConfigError;
use homeconnect_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Home Connect API at {url}")]
    #[diagnostic(
        code(homeconnect::connection_failed),
        help("Check your network connection.\nReason: {reason}")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Event stream failed: {reason}")]
    #[diagnostic(code(homeconnect::event_stream))]
    EventStream { reason: String },

    // ── Authorisation ────────────────────────────────────────────────
    #[error("Not authorised: {message}")]
    #[diagnostic(code(homeconnect::not_authorised), help("{help}"))]
    NotAuthorised { message: String, help: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(homeconnect::not_found),
        help("Run: homeconnect {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(homeconnect::api_error))]
    ApiError {
        code: String,
        message: String,
        status: u16,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(homeconnect::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(homeconnect::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: homeconnect config init --client-id <ID>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(homeconnect::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out{context}")]
    #[diagnostic(
        code(homeconnect::timeout),
        help("The API did not answer in time; try again or raise the profile timeout.")
    )]
    Timeout { context: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(homeconnect::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::EventStream { .. } => exit_code::CONNECTION,
            Self::NotAuthorised { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ApiError { status: 409, .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::Config { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => {
                CliError::ConnectionFailed { url, reason }
            }

            CoreError::Timeout => CliError::Timeout {
                context: String::new(),
            },

            CoreError::EventStream { reason } => CliError::EventStream { reason },

            CoreError::NotAuthorised { message, help } => CliError::NotAuthorised {
                message,
                help: help.unwrap_or_else(|| "Run: homeconnect auth login".into()),
            },

            CoreError::NotFound { resource } => CliError::NotFound {
                resource_type: "resource".into(),
                identifier: resource,
                list_command: "appliances list".into(),
            },

            CoreError::Rejected {
                message,
                code,
                status,
            } => CliError::ApiError {
                code: code.unwrap_or_else(|| status.to_string()),
                message,
                status,
            },

            CoreError::InvalidResponse { message } | CoreError::Internal(message) => {
                CliError::ApiError {
                    code: "internal".into(),
                    message,
                    status: 0,
                }
            }

            CoreError::Config { message } => CliError::Config { message },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => {
                let cfg = homeconnect_config::load_config_or_default();
                let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
                names.sort();
                let available = if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                };
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Io(err) => CliError::Io(err),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
