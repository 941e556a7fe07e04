// OAuth2 grant flows: Device Flow, Authorization Code, refresh.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use super::token::now_millis;
use super::{
    AUTHORIZE_PATH, AbsoluteToken, AuthFlow, AuthInner, AuthStatus, DEVICE_AUTHORIZATION_PATH,
    DeviceAuthorisation, TOKEN_PATH, TokenResponse, is_valid_client_id,
};
use crate::error::{Error, ErrorBody};
use crate::retry::{DefaultHooks, RateLimitClock, RetryHooks, default_can_retry};
use crate::transport::Request;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

impl AuthInner {
    /// Obtain a fresh token with the configured flow.
    pub(super) async fn authorise(&self) -> Result<AbsoluteToken, Error> {
        match self.config.flow {
            AuthFlow::DeviceFlow => self.device_flow().await,
            AuthFlow::AuthorizationCode => self.code_flow().await,
        }
    }

    /// Exchange the refresh token of `previous` for a new token.
    pub(super) async fn refresh(&self, previous: &AbsoluteToken) -> Result<AbsoluteToken, Error> {
        debug!("refreshing access token");
        let mut fields = vec![
            ("grant_type", "refresh_token".to_owned()),
            ("refresh_token", previous.refresh_token.clone()),
        ];
        self.push_client_secret(&mut fields);

        let response = self
            .token_request(Request::post(TOKEN_PATH).form(fields), &DefaultHooks)
            .await?;
        AbsoluteToken::from_response(response, Some(previous), &self.config.scopes, now_millis())
    }

    // ── Device Flow ──────────────────────────────────────────────────

    async fn device_flow(&self) -> Result<AbsoluteToken, Error> {
        let request = Request::post(DEVICE_AUTHORIZATION_PATH).form([
            ("client_id", self.config.client_id.clone()),
            ("scope", self.config.scope_param()),
        ]);
        let (request, response) = self.requester.execute(&request, &DefaultHooks).await?;
        let device: DeviceAuthorisation = self
            .requester
            .transport()
            .decode_json(&request, response)
            .await?;

        let verification_uri = device
            .verification_uri_complete
            .clone()
            .unwrap_or_else(|| device.verification_uri.clone());
        let expires_at = device.expires_in.and_then(|secs| {
            chrono::Utc::now().checked_add_signed(chrono::TimeDelta::seconds(
                i64::try_from(secs).unwrap_or(i64::MAX),
            ))
        });
        self.publish(AuthStatus::AwaitingUser {
            verification_uri: verification_uri.clone(),
            user_code: device.user_code.clone(),
            expires_at,
        });

        let interval = device
            .interval
            .map(Duration::from_secs)
            .map_or(self.config.poll_interval, |server| {
                server.max(self.config.poll_interval)
            });
        let deadline = device
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        tokio::select! {
            never = self.prompt_loop(&verification_uri, &device.user_code) => match never {},
            result = self.poll_device_token(&device.device_code, interval, deadline) => result,
        }
    }

    async fn prompt_loop(&self, verification_uri: &str, user_code: &str) -> Infallible {
        loop {
            info!(
                verification_uri,
                user_code, "visit the verification URL and enter the code to authorise"
            );
            tokio::time::sleep(self.config.prompt_interval).await;
        }
    }

    async fn poll_device_token(
        &self,
        device_code: &str,
        interval: Duration,
        deadline: Option<Instant>,
    ) -> Result<AbsoluteToken, Error> {
        let hooks = DevicePollHooks::new(interval, deadline);
        tokio::time::sleep(hooks.interval()).await;

        let mut fields = vec![
            ("grant_type", DEVICE_CODE_GRANT.to_owned()),
            ("device_code", device_code.to_owned()),
            ("client_id", self.config.client_id.clone()),
        ];
        self.push_client_secret(&mut fields);

        let response = self
            .token_request(Request::post(TOKEN_PATH).form(fields), &hooks)
            .await
            .map_err(|e| {
                if hooks.expired() {
                    Error::Authorisation {
                        message: "the user code expired before authorisation completed".into(),
                        source: Some(Arc::new(e)),
                    }
                } else {
                    e
                }
            })?;
        AbsoluteToken::from_response(response, None, &self.config.scopes, now_millis())
    }

    // ── Authorization Code flow ──────────────────────────────────────

    async fn code_flow(&self) -> Result<AbsoluteToken, Error> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope_param())
            .append_pair("user", "me")
            .finish();
        let request = Request::get(format!("{AUTHORIZE_PATH}?{query}"));

        let transport = self.requester.transport();
        let (request, response) = self.requester.execute(&request, &DefaultHooks).await?;
        let location = transport.decode_redirect(&request, response).await?;
        let redirect = match Url::parse(&location) {
            Ok(url) => url,
            Err(_) => transport.url(&location)?,
        };
        let code = authorisation_code(&redirect)?;
        debug!("authorisation code received");

        let mut fields = vec![
            ("grant_type", "authorization_code".to_owned()),
            ("code", code),
            ("client_id", self.config.client_id.clone()),
        ];
        self.push_client_secret(&mut fields);

        let response = self
            .token_request(Request::post(TOKEN_PATH).form(fields), &DefaultHooks)
            .await?;
        AbsoluteToken::from_response(response, None, &self.config.scopes, now_millis())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn token_request<H: RetryHooks>(
        &self,
        request: Request,
        hooks: &H,
    ) -> Result<TokenResponse, Error> {
        let (request, response) = self.requester.execute(&request, hooks).await?;
        self.requester
            .transport()
            .decode_json(&request, response)
            .await
    }

    fn push_client_secret(&self, fields: &mut Vec<(&'static str, String)>) {
        if let Some(ref secret) = self.config.client_secret {
            fields.push(("client_secret", secret.expose_secret().to_owned()));
        }
    }
}

/// Pull `code` out of an authorisation redirect, or turn its `error`
/// parameters into an error.
fn authorisation_code(redirect: &Url) -> Result<String, Error> {
    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::Authorisation {
            message: format!("authorisation redirect carried error '{error}'"),
            source: Some(Arc::new(Error::StatusCode {
                status: 302,
                method: "GET".into(),
                path: AUTHORIZE_PATH.into(),
                body: ErrorBody::OAuth { error, description },
                retry_after: None,
            })),
        });
    }

    code.ok_or_else(|| Error::Validation {
        message: "authorisation redirect has no code parameter".into(),
        body: redirect.to_string(),
    })
}

// ── Device token polling ─────────────────────────────────────────────

/// Retry rule for the Device Flow token poll: keep polling while the
/// user has not finished, slowing down when asked, until the code expires.
struct DevicePollHooks {
    interval_ms: AtomicU64,
    deadline: Option<Instant>,
}

impl DevicePollHooks {
    fn new(interval: Duration, deadline: Option<Instant>) -> Self {
        Self {
            interval_ms: AtomicU64::new(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)),
            deadline,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl RetryHooks for DevicePollHooks {
    fn can_retry(
        &self,
        clock: &RateLimitClock,
        error: &Error,
        request: &Request,
    ) -> impl Future<Output = bool> + Send {
        let keep_polling = match error.error_code() {
            Some("authorization_pending") => true,
            Some("slow_down") => {
                let step = u64::try_from(SLOW_DOWN_STEP.as_millis()).unwrap_or(0);
                self.interval_ms.fetch_add(step, Ordering::Relaxed);
                true
            }
            _ => error.is_transient(),
        };
        // The rate-limit side effects of the standard rule still apply.
        let _ = default_can_retry(clock, error, request);

        let interval = self.interval();
        let deadline = self.deadline;
        async move {
            if !keep_polling || deadline.is_some_and(|d| Instant::now() + interval >= d) {
                return false;
            }
            tokio::time::sleep(interval).await;
            true
        }
    }

    fn self_paced(&self, error: &Error) -> bool {
        matches!(
            error.error_code(),
            Some("authorization_pending" | "slow_down")
        )
    }
}

// ── Failure guidance ─────────────────────────────────────────────────

/// Translate an authorisation failure into status with user guidance.
pub(super) fn describe_failure(error: &Error, client_id: &str) -> AuthStatus {
    let code = error.error_code().unwrap_or("unknown").to_owned();
    let (retryable, message, help): (bool, String, Option<String>) = match code.as_str() {
        "invalid_client" | "unauthorized_client" => {
            let help = if is_valid_client_id(client_id) {
                "Check that the client id belongs to an application registered in the \
                 developer portal for this endpoint and grant type."
            } else {
                "The client id is malformed: it must be the 64 hexadecimal character \
                 Client ID shown in the developer portal."
            };
            (false, "The client id was rejected".into(), Some(help.into()))
        }
        "invalid_scope" => (
            false,
            "The requested scopes were rejected".into(),
            Some("Remove scopes the application is not permitted to request.".into()),
        ),
        "invalid_grant" => (
            false,
            "The saved authorisation is no longer valid".into(),
            Some("Authorise again to obtain a new token.".into()),
        ),
        "access_denied" => (
            true,
            "Authorisation was declined".into(),
            Some("Retry to generate a new user code.".into()),
        ),
        "expired_token" | "authorization_pending" => (
            true,
            "The user code expired".into(),
            Some("Retry to generate a new user code, then authorise promptly.".into()),
        ),
        _ if error.is_transient() => (
            true,
            "The authorisation server could not be reached".into(),
            Some("Check network connectivity, then retry.".into()),
        ),
        _ => (true, error.to_string(), None),
    };

    AuthStatus::Failed {
        retryable,
        error: code,
        message,
        help,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn oauth_error(code: &str) -> Error {
        Error::StatusCode {
            status: 400,
            method: "POST".into(),
            path: TOKEN_PATH.into(),
            body: ErrorBody::OAuth {
                error: code.into(),
                description: None,
            },
            retry_after: None,
        }
    }

    #[test]
    fn redirect_code_is_extracted() {
        let url = Url::parse("https://example.test/cb?code=abc%20123&state=x").unwrap();
        assert_eq!(authorisation_code(&url).unwrap(), "abc 123");
    }

    #[test]
    fn redirect_error_becomes_authorisation_error() {
        let url =
            Url::parse("https://example.test/cb?error=access_denied&error_description=nope").unwrap();
        let err = authorisation_code(&url).unwrap_err();
        assert_eq!(err.error_code(), Some("access_denied"));
    }

    #[test]
    fn malformed_client_id_gets_specific_help() {
        let status = describe_failure(&oauth_error("invalid_client"), "not-a-client-id");
        let AuthStatus::Failed {
            retryable, help, ..
        } = status
        else {
            panic!("expected Failed");
        };
        assert!(!retryable);
        assert!(help.unwrap().contains("malformed"));

        let valid = "0123456789abcdef".repeat(4);
        let AuthStatus::Failed { help, .. } = describe_failure(&oauth_error("invalid_client"), &valid)
        else {
            panic!("expected Failed");
        };
        assert!(!help.unwrap().contains("malformed"));
    }

    #[test]
    fn expired_code_is_retryable() {
        let AuthStatus::Failed {
            retryable, error, ..
        } = describe_failure(&oauth_error("expired_token"), "x")
        else {
            panic!("expected Failed");
        };
        assert!(retryable);
        assert_eq!(error, "expired_token");
    }

    #[test]
    fn revoked_refresh_token_is_not_retryable() {
        let AuthStatus::Failed { retryable, .. } =
            describe_failure(&oauth_error("invalid_grant"), "x")
        else {
            panic!("expected Failed");
        };
        assert!(!retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_poll_sleeps_and_retries() {
        let hooks = DevicePollHooks::new(Duration::from_secs(5), None);
        let clock = RateLimitClock::new();
        let request = Request::post(TOKEN_PATH);

        let start = Instant::now();
        assert!(
            hooks
                .can_retry(&clock, &oauth_error("authorization_pending"), &request)
                .await
        );
        assert!(Instant::now() >= start + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_down_widens_interval() {
        let hooks = DevicePollHooks::new(Duration::from_secs(5), None);
        let clock = RateLimitClock::new();
        let request = Request::post(TOKEN_PATH);
        assert!(hooks.can_retry(&clock, &oauth_error("slow_down"), &request).await);
        assert_eq!(hooks.interval(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_at_deadline_and_on_denial() {
        let clock = RateLimitClock::new();
        let request = Request::post(TOKEN_PATH);

        let hooks = DevicePollHooks::new(
            Duration::from_secs(5),
            Some(Instant::now() + Duration::from_secs(3)),
        );
        assert!(
            !hooks
                .can_retry(&clock, &oauth_error("authorization_pending"), &request)
                .await
        );

        let hooks = DevicePollHooks::new(Duration::from_secs(5), None);
        assert!(!hooks.can_retry(&clock, &oauth_error("access_denied"), &request).await);
    }

    #[test]
    fn pending_polls_are_outside_the_retry_limit() {
        let hooks = DevicePollHooks::new(Duration::from_secs(5), None);
        assert!(hooks.self_paced(&oauth_error("authorization_pending")));
        assert!(hooks.self_paced(&oauth_error("slow_down")));
        assert!(!hooks.self_paced(&oauth_error("access_denied")));
    }
}
