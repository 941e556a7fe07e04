// OAuth2 token shapes: wire responses and the persisted absolute token.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifetime assumed when a token response omits `expires_in`. Access
/// tokens are issued for a day.
const DEFAULT_LIFETIME_SECS: u64 = 86_400;

/// Access/refresh token pair with an absolute expiry.
///
/// The expiry is stored as epoch milliseconds so it survives persistence
/// and process restarts. A token is never mutated after being handed out;
/// each refresh produces a new one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsoluteToken {
    pub refresh_token: String,
    pub access_token: String,
    /// Epoch milliseconds at which `access_token` stops being accepted.
    #[serde(rename = "accessExpires")]
    pub access_expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for AbsoluteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbsoluteToken")
            .field("refresh_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_expires_at", &self.expires_at())
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl AbsoluteToken {
    /// Build a token from a token-endpoint response received at `now_ms`.
    ///
    /// When refreshing, `previous` supplies the refresh token (if the
    /// server did not rotate it) and the scopes (if the server omitted
    /// them), and the new expiry is forced strictly later than the old.
    pub fn from_response(
        response: TokenResponse,
        previous: Option<&AbsoluteToken>,
        requested_scopes: &[String],
        now_ms: i64,
    ) -> Result<Self, Error> {
        let refresh_token = response
            .refresh_token
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| Error::Validation {
                message: "token response did not include a refresh token".into(),
                body: String::new(),
            })?;

        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_LIFETIME_SECS);
        let lifetime_ms = i64::try_from(lifetime.saturating_mul(1000)).unwrap_or(i64::MAX);
        let mut access_expires_at = now_ms.saturating_add(lifetime_ms);
        if let Some(previous) = previous {
            if access_expires_at <= previous.access_expires_at {
                access_expires_at = previous.access_expires_at + 1;
            }
        }

        let scopes = match response.scope {
            Some(ref scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_owned).collect()
            }
            _ => previous.map_or_else(|| requested_scopes.to_vec(), |p| p.scopes.clone()),
        };

        Ok(Self {
            refresh_token,
            access_token: response.access_token,
            access_expires_at,
            scopes,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.access_expires_at).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now_ms: i64) -> Duration {
        u64::try_from(self.access_expires_at.saturating_sub(now_ms))
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the token expires within `window` of `now_ms`.
    pub fn needs_refresh(&self, now_ms: i64, window: Duration) -> bool {
        self.remaining(now_ms) <= window
    }

    /// Delay until the token enters the refresh window.
    pub fn refresh_delay(&self, now_ms: i64, window: Duration) -> Duration {
        self.remaining(now_ms).saturating_sub(window)
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ── Wire types ───────────────────────────────────────────────────────

/// Body of a successful `/security/oauth/token` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of `access_token` in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Body of a `/security/oauth/device_authorization` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorisation {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds until `device_code` expires.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Minimum polling interval in seconds.
    #[serde(default)]
    pub interval: Option<u64>,
}
