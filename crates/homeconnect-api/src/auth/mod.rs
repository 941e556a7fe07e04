//! Authorisation orchestration.
//!
//! [`Authoriser`] owns the token lifecycle:
//!
//! ```text
//! Unauthorised → Obtaining → Authorised → (RefreshDue → Refreshing → Authorised)*
//! ```
//!
//! It loads a persisted token on start, runs the Device Flow or the
//! Authorization Code flow when none is usable, refreshes ahead of expiry,
//! persists every new token and watches the store for tokens written by
//! other processes. Progress is published as [`AuthStatus`] through a
//! `watch` channel.
//!
//! Outbound calls pass the authoriser as their [`RetryHooks`]: it awaits
//! the current [`AuthGate`] and attaches the bearer header, and reacts to
//! a 401 on the token in use by forcing a refresh.

mod flow;
mod gate;
mod store;
mod token;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::gate::AuthGate;
pub use self::store::{JsonFileTokenStore, MemoryTokenStore, TokenMap, TokenStore};
pub use self::token::{AbsoluteToken, DeviceAuthorisation, TokenResponse};

use self::flow::describe_failure;
use self::token::now_millis;
use crate::error::Error;
use crate::retry::{RateLimitClock, Requester, RetryHooks, default_can_retry};
use crate::transport::Request;

/// Paths served by the authorisation server. Never gated.
pub const AUTH_PATH_PREFIX: &str = "/security/oauth/";
pub(crate) const AUTHORIZE_PATH: &str = "/security/oauth/authorize";
pub(crate) const DEVICE_AUTHORIZATION_PATH: &str = "/security/oauth/device_authorization";
pub(crate) const TOKEN_PATH: &str = "/security/oauth/token";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["IdentifyAppliance", "Monitor", "Settings", "Control"];

/// Client ids issued by the developer portal: 64 hexadecimal characters.
pub fn is_valid_client_id(client_id: &str) -> bool {
    client_id.len() == 64 && client_id.bytes().all(|b| b.is_ascii_hexdigit())
}

// ── Configuration ────────────────────────────────────────────────────

/// Which OAuth2 grant obtains the first token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthFlow {
    /// User enters a code on another device. Works everywhere.
    #[default]
    DeviceFlow,
    /// Unattended redirect dance. Simulator only.
    AuthorizationCode,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub flow: AuthFlow,
    pub scopes: Vec<String>,
    /// Refresh this long before expiry. Default: 1h.
    pub refresh_window: Duration,
    /// Delay between failed refresh attempts. Default: 1min.
    pub refresh_retry_delay: Duration,
    /// Minimum Device Flow polling interval. Default: 5s.
    pub poll_interval: Duration,
    /// How often the Device Flow instructions are logged again. Default: 5min.
    pub prompt_interval: Duration,
    /// How often the store is checked for external changes. Default: 5s.
    pub store_poll_interval: Duration,
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            flow: AuthFlow::default(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(),
            refresh_window: Duration::from_secs(60 * 60),
            refresh_retry_delay: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            prompt_interval: Duration::from_secs(5 * 60),
            store_poll_interval: Duration::from_secs(5),
        }
    }

    fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// What the authoriser is doing, for display to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AuthStatus {
    Busy,
    Success,
    #[serde(rename_all = "camelCase")]
    AwaitingUser {
        verification_uri: String,
        user_code: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Failed {
        retryable: bool,
        error: String,
        message: String,
        help: Option<String>,
    },
}

/// Internal lifecycle state, logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthorised,
    Obtaining,
    Authorised,
    RefreshDue,
    Refreshing,
}

/// Result of one authorisation attempt. `Restart` is the user's retry
/// signal, not a failure.
enum AttemptOutcome {
    Token(AbsoluteToken),
    Adopt(AbsoluteToken),
    Restart,
    Failed(Error),
}

// ── Authoriser ───────────────────────────────────────────────────────

/// Handle to the authorisation task. Cheap to clone.
#[derive(Clone)]
pub struct Authoriser {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    requester: Arc<Requester>,
    store: Arc<dyn TokenStore>,
    config: AuthConfig,
    gate: ArcSwap<AuthGate>,
    token: ArcSwapOption<AbsoluteToken>,
    state: Mutex<AuthState>,
    status: watch::Sender<AuthStatus>,
    refresh_now: Notify,
    attempt: Mutex<CancellationToken>,
    last_written: Mutex<Option<AbsoluteToken>>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Authoriser {
    pub fn new(requester: Arc<Requester>, store: Arc<dyn TokenStore>, config: AuthConfig) -> Self {
        let (status, _) = watch::channel(AuthStatus::Busy);
        Self {
            inner: Arc::new(AuthInner {
                requester,
                store,
                config,
                gate: ArcSwap::from_pointee(AuthGate::new()),
                token: ArcSwapOption::empty(),
                state: Mutex::new(AuthState::Unauthorised),
                status,
                refresh_now: Notify::new(),
                attempt: Mutex::new(CancellationToken::new()),
                last_written: Mutex::new(None),
                cancel: CancellationToken::new(),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Load any saved token and spawn the background tasks.
    ///
    /// Calling `start` again while running is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let saved = match self.inner.load_saved().await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "cannot load saved token");
                None
            }
        };

        let (external_tx, external_rx) = mpsc::unbounded_channel();

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(inner.run(saved.clone(), external_rx)));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(inner.watch_store(saved, external_tx)));
    }

    /// Cancel the background tasks and wait for them to stop.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("authoriser stopped");
    }

    /// Subscribe to status transitions.
    pub fn status(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> AuthStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> AuthState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Abandon the in-flight attempt (or leave the failed state) and
    /// start authorisation again, e.g. to issue a new user code.
    pub fn retry(&self) {
        info!("authorisation retry requested");
        self.inner.current_attempt().cancel();
    }

    /// Refresh the token now instead of waiting for the schedule.
    pub fn refresh_now(&self) {
        self.inner.refresh_now.notify_one();
    }

    /// Wait until a token is available.
    pub async fn authorised(&self) -> Result<Arc<AbsoluteToken>, Error> {
        self.inner.gate.load_full().wait().await.map_err(|cause| Error::Authorisation {
            message: "not authorised".into(),
            source: Some(cause),
        })
    }

    /// The token currently in use, if any.
    pub fn token(&self) -> Option<Arc<AbsoluteToken>> {
        self.inner.token.load_full()
    }

    pub fn requester(&self) -> &Requester {
        &self.inner.requester
    }

    /// Send an authenticated request through the retry layer.
    pub async fn execute(&self, request: &Request) -> Result<(Request, reqwest::Response), Error> {
        self.inner.requester.execute(request, &*self.inner).await
    }
}

// ── Request hooks ────────────────────────────────────────────────────

impl RetryHooks for AuthInner {
    fn prepare(&self, request: Request) -> impl Future<Output = Result<Request, Error>> + Send {
        async move {
            if request.path.starts_with(AUTH_PATH_PREFIX) {
                return Ok(request);
            }
            let gate = self.gate.load_full();
            match gate.wait().await {
                Ok(token) => request.with_bearer(&token.access_token),
                Err(cause) => Err(Error::Authorisation {
                    message: format!("cannot {} {}: not authorised", request.method, request.path),
                    source: Some(cause),
                }),
            }
        }
    }

    fn can_retry(
        &self,
        clock: &RateLimitClock,
        error: &Error,
        request: &Request,
    ) -> impl Future<Output = bool> + Send {
        if error.status() == Some(401) {
            let current = self.token.load();
            if let (Some(sent), Some(current)) = (request.bearer(), current.as_deref()) {
                if sent == current.access_token {
                    info!(path = %request.path, "access token rejected, refreshing");
                    self.arm_gate();
                    self.refresh_now.notify_one();
                }
            }
        }
        std::future::ready(default_can_retry(clock, error, request))
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

impl AuthInner {
    fn enter(&self, next: AuthState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state != next {
            debug!(from = ?*state, to = ?next, "authorisation state");
            *state = next;
        }
    }

    fn publish(&self, status: AuthStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Replace a resolved gate with a fresh one. An unresolved gate is
    /// kept so its waiters see the next resolution.
    fn arm_gate(&self) {
        if self.gate.load().is_resolved() {
            self.gate.store(Arc::new(AuthGate::new()));
        }
    }

    fn current_attempt(&self) -> CancellationToken {
        self.attempt
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn new_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .attempt
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = token.clone();
        token
    }

    // Store access runs on the blocking pool; file stores touch the disk.

    async fn load_saved(&self) -> Result<Option<AbsoluteToken>, Error> {
        let store = Arc::clone(&self.store);
        let client_id = self.config.client_id.clone();
        task::spawn_blocking(move || store.get(&client_id))
            .await
            .map_err(|e| Error::TokenStore(format!("token store task failed: {e}")))?
    }

    async fn persist(&self, token: AbsoluteToken) -> Result<(), Error> {
        let store = Arc::clone(&self.store);
        let client_id = self.config.client_id.clone();
        task::spawn_blocking(move || store.put(&client_id, &token))
            .await
            .map_err(|e| Error::TokenStore(format!("token store task failed: {e}")))?
    }

    /// Make `token` current: persist it if it is new, open the gate and
    /// announce success.
    async fn adopt(&self, token: AbsoluteToken, persist: bool) -> Arc<AbsoluteToken> {
        let token = Arc::new(token);
        if persist {
            *self
                .last_written
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some((*token).clone());
            if let Err(e) = self.persist((*token).clone()).await {
                warn!(error = %e, "cannot persist token");
            }
        }

        self.token.store(Some(Arc::clone(&token)));
        self.arm_gate();
        self.gate.load().resolve(Ok(Arc::clone(&token)));
        self.enter(AuthState::Authorised);
        self.publish(AuthStatus::Success);
        info!(expires_at = %token.expires_at(), "authorised");
        token
    }

    async fn run(
        self: Arc<Self>,
        saved: Option<AbsoluteToken>,
        mut external: mpsc::UnboundedReceiver<AbsoluteToken>,
    ) {
        let mut current = self.startup(saved).await;
        loop {
            let token = match current.take() {
                Some(token) => token,
                None => match self.obtain(&mut external).await {
                    Some(token) => token,
                    None => return,
                },
            };
            match self.maintain(token, &mut external).await {
                Some(next) => current = Some(next),
                None => return,
            }
        }
    }

    /// Use a saved token if it has more than the refresh window left,
    /// otherwise try one refresh with it.
    async fn startup(&self, saved: Option<AbsoluteToken>) -> Option<Arc<AbsoluteToken>> {
        let saved = saved?;
        if !saved.needs_refresh(now_millis(), self.config.refresh_window) {
            debug!(expires_at = %saved.expires_at(), "using saved token");
            return Some(self.adopt(saved, false).await);
        }

        info!(expires_at = %saved.expires_at(), "saved token expires soon, refreshing");
        self.enter(AuthState::Refreshing);
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.refresh(&saved) => match result {
                Ok(token) => Some(self.adopt(token, true).await),
                Err(e) => {
                    warn!(error = %e, "cannot refresh saved token, authorising again");
                    None
                }
            },
        }
    }

    /// Run authorisation attempts until one yields a token.
    ///
    /// An external token change and a user retry both abandon the
    /// in-flight attempt; whichever fires first wins. If both are ready
    /// at the same moment the external token is taken, as it needs no
    /// further round trip.
    async fn obtain(
        &self,
        external: &mut mpsc::UnboundedReceiver<AbsoluteToken>,
    ) -> Option<Arc<AbsoluteToken>> {
        loop {
            let attempt = self.new_attempt();
            self.arm_gate();
            self.enter(AuthState::Obtaining);
            self.publish(AuthStatus::Busy);

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                Some(token) = external.recv() => AttemptOutcome::Adopt(token),
                () = attempt.cancelled() => AttemptOutcome::Restart,
                result = self.authorise() => match result {
                    Ok(token) => AttemptOutcome::Token(token),
                    Err(e) => AttemptOutcome::Failed(e),
                },
            };

            let error = match outcome {
                AttemptOutcome::Token(token) => return Some(self.adopt(token, true).await),
                AttemptOutcome::Adopt(token) => {
                    info!("token changed externally");
                    return Some(self.adopt(token, false).await);
                }
                AttemptOutcome::Restart => {
                    info!("restarting authorisation");
                    continue;
                }
                AttemptOutcome::Failed(error) => error,
            };

            let status = describe_failure(&error, &self.config.client_id);
            if let AuthStatus::Failed {
                ref message,
                ref help,
                ..
            } = status
            {
                warn!(error = %error, help = help.as_deref().unwrap_or(""), "{message}");
            }
            self.enter(AuthState::Unauthorised);
            self.gate.load().resolve(Err(Arc::new(error)));
            self.publish(status);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                Some(token) = external.recv() => {
                    info!("token changed externally");
                    return Some(self.adopt(token, false).await);
                }
                () = attempt.cancelled() => info!("retrying authorisation"),
            }
        }
    }

    /// Wait for the refresh window (or a refresh request), then refresh,
    /// retrying on a fixed delay until it succeeds. Each failure is
    /// published so front ends can tell a revoked token from an outage.
    async fn maintain(
        &self,
        token: Arc<AbsoluteToken>,
        external: &mut mpsc::UnboundedReceiver<AbsoluteToken>,
    ) -> Option<Arc<AbsoluteToken>> {
        let delay = token.refresh_delay(now_millis(), self.config.refresh_window);
        debug!(delay_secs = delay.as_secs(), "refresh scheduled");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            Some(next) = external.recv() => {
                info!("token changed externally");
                return Some(self.adopt(next, false).await);
            }
            () = self.refresh_now.notified() => debug!("refresh requested"),
            () = tokio::time::sleep(delay) => debug!("refresh due"),
        }
        self.enter(AuthState::RefreshDue);
        self.arm_gate();

        loop {
            self.enter(AuthState::Refreshing);
            let error = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                Some(next) = external.recv() => {
                    info!("token changed externally");
                    return Some(self.adopt(next, false).await);
                }
                result = self.refresh(&token) => match result {
                    Ok(next) => return Some(self.adopt(next, true).await),
                    Err(error) => error,
                },
            };

            warn!(
                error = %error,
                retry_secs = self.config.refresh_retry_delay.as_secs(),
                "token refresh failed"
            );
            self.publish(describe_failure(&error, &self.config.client_id));
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                Some(next) = external.recv() => {
                    info!("token changed externally");
                    return Some(self.adopt(next, false).await);
                }
                () = tokio::time::sleep(self.config.refresh_retry_delay) => {}
            }
        }
    }

    /// Poll the store for tokens written by another process.
    async fn watch_store(
        self: Arc<Self>,
        initial: Option<AbsoluteToken>,
        tx: mpsc::UnboundedSender<AbsoluteToken>,
    ) {
        let mut last_seen = initial;
        let mut ticker = tokio::time::interval(self.config.store_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let stored = match self.load_saved().await {
                Ok(Some(stored)) => stored,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "cannot poll token store");
                    continue;
                }
            };
            if last_seen.as_ref() == Some(&stored) {
                continue;
            }
            last_seen = Some(stored.clone());

            let ours = self
                .last_written
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .as_ref()
                == Some(&stored);
            if ours {
                continue;
            }

            debug!(expires_at = %stored.expires_at(), "token store changed");
            if tx.send(stored).is_err() {
                return;
            }
        }
    }
}
