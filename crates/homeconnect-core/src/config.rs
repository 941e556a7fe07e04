// ── Runtime client configuration ──
//
// These types describe how the client talks to the API and how eagerly
// it reacts to drift. They carry the client id and secret but never
// touch disk; `homeconnect-config` builds a `ClientConfig` from a
// profile and hands it in.

use std::time::Duration;

use homeconnect_api::{AuthConfig, Endpoint, RetryConfig, TransportConfig};

use crate::error::CoreError;
use crate::reporter::ReporterConfig;
use crate::validator::DEFAULT_LOG_INTERVAL;

/// Event stream reconnect tuning.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Interruptions shorter than this are not reported as
    /// disconnections.
    pub grace_window: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// `None` reconnects forever.
    pub max_reconnects: Option<u32>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(5),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            max_reconnects: None,
        }
    }
}

/// Everything needed to construct a `HomeConnectClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub auth: AuthConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub events: EventsConfig,
    pub reporter: ReporterConfig,
    /// Minimum interval between repeated drift warnings for one key.
    pub validation_log_interval: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint, auth: AuthConfig) -> Result<Self, CoreError> {
        Ok(Self {
            auth,
            transport: TransportConfig::for_endpoint(endpoint)?,
            retry: RetryConfig::default(),
            events: EventsConfig::default(),
            reporter: ReporterConfig::new().map_err(homeconnect_api::Error::from)?,
            validation_log_interval: DEFAULT_LOG_INTERVAL,
        })
    }
}
