// Retry & rate-limit orchestration.
//
// Every outbound call goes through `Requester::execute`, which waits on a
// shared "earliest next request" clock, sends through the transport, and
// asks a `RetryHooks` implementation whether a failure may be repeated.
// The authoriser supplies its own hooks to attach bearer tokens and to
// react to 401s and pending device-flow polls.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Error;
use crate::transport::{Request, Transport};

/// Statuses that repeating can never fix.
const NEVER_RETRY: &[u16] = &[400, 403, 404, 405, 406, 409, 415];

/// Pause after a 429 that carries no `retry-after`.
const MIN_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

// ── RateLimitClock ───────────────────────────────────────────────────

/// Earliest instant a new request may be issued.
///
/// Only ever moves forward. The lock is never held across an await.
#[derive(Debug)]
pub struct RateLimitClock {
    earliest: Mutex<Instant>,
}

impl Default for RateLimitClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitClock {
    pub fn new() -> Self {
        Self {
            earliest: Mutex::new(Instant::now()),
        }
    }

    /// Push the clock to at least `now + delay`.
    pub fn advance(&self, delay: Duration) {
        let proposed = Instant::now() + delay;
        let mut earliest = self
            .earliest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if proposed > *earliest {
            *earliest = proposed;
        }
    }

    pub fn earliest(&self) -> Instant {
        *self
            .earliest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Remaining delay before a request may be issued.
    pub fn remaining(&self) -> Duration {
        self.earliest().saturating_duration_since(Instant::now())
    }

    /// Suspend until the clock allows a request. Re-reads after waking
    /// in case another caller pushed it further meanwhile.
    pub async fn wait(&self) {
        loop {
            let earliest = self.earliest();
            if earliest <= Instant::now() {
                return;
            }
            let delay = earliest.saturating_duration_since(Instant::now());
            debug!(?delay, "rate limited, waiting");
            tokio::time::sleep_until(earliest).await;
        }
    }
}

// ── Retry policy ─────────────────────────────────────────────────────

/// Retry tuning.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Backoff before the first retry. Default: 1s.
    pub initial_backoff: Duration,
    /// Upper bound on backoff. Default: 60s.
    pub max_backoff: Duration,
    /// Give up after this many retries. `None` retries forever.
    /// Default: 5.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_retries: Some(5),
        }
    }
}

/// The standard retry decision.
///
/// In order: only transport and status errors qualify; a 429 pushes the
/// clock first, by its `retry-after` or a one second minimum; the fixed
/// client-error statuses never retry; only idempotent requests retry.
pub fn default_can_retry(clock: &RateLimitClock, error: &Error, request: &Request) -> bool {
    let status = match error {
        Error::StatusCode {
            status,
            retry_after,
            ..
        } => {
            if *status == 429 {
                clock.advance(retry_after.unwrap_or(MIN_RATE_LIMIT_DELAY));
            }
            Some(*status)
        }
        Error::Transport(_) => None,
        _ => return false,
    };

    if status.is_some_and(|s| NEVER_RETRY.contains(&s)) {
        return false;
    }

    request.idempotent
}

/// Per-call customisation of [`Requester::execute`].
pub trait RetryHooks: Send + Sync {
    /// Finalise a fresh copy of the request template before each attempt.
    fn prepare(&self, request: Request) -> impl Future<Output = Result<Request, Error>> + Send {
        std::future::ready(Ok(request))
    }

    /// Decide whether `error` may be retried.
    fn can_retry(
        &self,
        clock: &RateLimitClock,
        error: &Error,
        request: &Request,
    ) -> impl Future<Output = bool> + Send {
        std::future::ready(default_can_retry(clock, error, request))
    }

    /// Whether an approved retry of `error` was already paced by
    /// `can_retry` itself. Such retries skip the backoff and do not count
    /// against `max_retries`.
    fn self_paced(&self, _error: &Error) -> bool {
        false
    }
}

/// Hooks for unauthenticated calls: the standard rule, no preparation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RetryHooks for DefaultHooks {}

// ── Requester ────────────────────────────────────────────────────────

/// Retrying front end to the [`Transport`].
pub struct Requester {
    transport: Transport,
    clock: RateLimitClock,
    config: RetryConfig,
    request_count: AtomicU64,
}

impl Requester {
    pub fn new(transport: Transport, config: RetryConfig) -> Self {
        Self {
            transport,
            clock: RateLimitClock::new(),
            config,
            request_count: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn clock(&self) -> &RateLimitClock {
        &self.clock
    }

    /// Send `template` until it succeeds, `hooks` refuses a retry or the
    /// retry limit is reached.
    ///
    /// Attempts never overlap: each one completes or fails before the
    /// next starts, after the backoff for its attempt number. Returns the
    /// request actually sent with its response.
    pub async fn execute<H: RetryHooks>(
        &self,
        template: &Request,
        hooks: &H,
    ) -> Result<(Request, reqwest::Response), Error> {
        let id = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut attempt: u32 = 0;

        loop {
            self.clock.wait().await;
            let request = hooks.prepare(template.clone()).await?;

            let error = match self.transport.send(&request).await {
                Ok(response) => return Ok((request, response)),
                Err(error) => error,
            };

            // Asked first so rate-limit side effects apply on the last attempt too.
            if !hooks.can_retry(&self.clock, &error, &request).await {
                debug!(id, attempt, error = %error, "not retrying");
                return Err(error);
            }
            if hooks.self_paced(&error) {
                debug!(id, error = %error, "retrying on the caller's schedule");
                continue;
            }
            if self.config.max_retries.is_some_and(|max| attempt >= max) {
                warn!(id, attempt, error = %error, "retry limit reached");
                return Err(error);
            }

            self.clock.advance(calculate_backoff(
                attempt,
                self.config.initial_backoff,
                self.config.max_backoff,
            ));
            attempt += 1;
            warn!(
                id,
                attempt,
                method = %request.method,
                path = %request.path,
                error = %error,
                "request failed, retrying"
            );
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
///
/// The jitter is deterministic, seeded from the attempt number; it only
/// needs to spread clients apart, not be unpredictable.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = initial.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(max.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBody;

    fn status_error(status: u16, retry_after: Option<Duration>) -> Error {
        Error::StatusCode {
            status,
            method: "GET".into(),
            path: "/api/homeappliances".into(),
            body: ErrorBody::Empty,
            retry_after,
        }
    }

    #[test]
    fn fixed_client_errors_never_retry() {
        let clock = RateLimitClock::new();
        let request = Request::get("/api/homeappliances");
        for status in [400, 403, 404, 405, 406, 409, 415] {
            assert!(
                !default_can_retry(&clock, &status_error(status, None), &request),
                "HTTP {status} must not be retried"
            );
        }
    }

    #[test]
    fn non_idempotent_never_retries() {
        let clock = RateLimitClock::new();
        let request = Request::post("/api/homeappliances/x/commands");
        for status in [429, 500, 502, 503] {
            assert!(!default_can_retry(&clock, &status_error(status, None), &request));
        }
    }

    #[test]
    fn idempotent_server_error_retries() {
        let clock = RateLimitClock::new();
        let request = Request::get("/api/homeappliances");
        assert!(default_can_retry(&clock, &status_error(503, None), &request));
    }

    #[test]
    fn non_http_errors_never_retry() {
        let clock = RateLimitClock::new();
        let request = Request::get("/api/homeappliances");
        let err = Error::Validation {
            message: "bad".into(),
            body: String::new(),
        };
        assert!(!default_can_retry(&clock, &err, &request));
        let err = Error::Authorisation {
            message: "no".into(),
            source: None,
        };
        assert!(!default_can_retry(&clock, &err, &request));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_advances_clock_even_when_not_retried() {
        let clock = RateLimitClock::new();
        let request = Request::post("/api/x");
        let before = Instant::now();

        let retry = default_can_retry(
            &clock,
            &status_error(429, Some(Duration::from_secs(30))),
            &request,
        );

        assert!(!retry);
        assert!(clock.earliest() >= before + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn bare_429_still_pushes_the_clock() {
        let clock = RateLimitClock::new();
        let before = Instant::now();

        assert!(default_can_retry(
            &clock,
            &status_error(429, None),
            &Request::get("/api/homeappliances"),
        ));
        assert!(clock.earliest() >= before + MIN_RATE_LIMIT_DELAY);
    }

    #[test]
    fn default_retries_are_bounded() {
        assert!(RetryConfig::default().max_retries.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_only_moves_forward() {
        let clock = RateLimitClock::new();
        clock.advance(Duration::from_secs(60));
        let far = clock.earliest();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.earliest(), far);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_never_returns_before_retry_after() {
        let clock = RateLimitClock::new();
        let request = Request::get("/api/homeappliances");

        for secs in [3, 10, 1] {
            let start = Instant::now();
            assert!(default_can_retry(
                &clock,
                &status_error(429, Some(Duration::from_secs(secs))),
                &request,
            ));
            clock.wait().await;
            assert!(Instant::now() >= start + Duration::from_secs(secs));
        }
    }

    #[test]
    fn backoff_increases_and_caps() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(10);

        let d0 = calculate_backoff(0, initial, max);
        let d1 = calculate_backoff(1, initial, max);
        let d2 = calculate_backoff(2, initial, max);
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");

        let d10 = calculate_backoff(10, initial, max);
        assert!(d10 <= Duration::from_millis(12_500));
    }
}
