// ── HomeConnectClient ──
//
// Typed access to the appliance endpoints plus the long-lived event
// stream. Every call goes through the authoriser (bearer + retry) and
// every decoded body through the validator.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use homeconnect_api::retry::calculate_backoff;
use homeconnect_api::{
    AuthStatus, Authoriser, BodyValidator, EventStreamError, Request, Requester, TokenStore,
    Transport,
};

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::events::{ApplianceEvent, EventKind};
use crate::model::{
    Appliance, ApplianceList, CommandInfo, CommandList, Data, Item, OptionList, Program,
    ProgramDefinition, ProgramList, ProgramSummary, SettingList, StatusList,
};
use crate::registry::KeyRegistry;
use crate::reporter::Reporter;
use crate::validator::Validator;

const EVENT_CHANNEL_SIZE: usize = 256;
const EVENTS_PATH: &str = "/api/homeappliances/events";

/// Error keys meaning "nothing there" rather than failure.
const NO_PROGRAM_ACTIVE: &str = "SDK.Error.NoProgramActive";
const NO_PROGRAM_SELECTED: &str = "SDK.Error.NoProgramSelected";

// ── ConnectionState ──────────────────────────────────────────────

/// Event stream state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── HomeConnectClient ────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`. Construction wires the
/// transport, validator, reporter and authoriser together but starts
/// nothing; call [`start()`](Self::start) to begin authorisation and
/// [`start_events()`](Self::start_events) for the event stream.
#[derive(Clone)]
pub struct HomeConnectClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    authoriser: Authoriser,
    validator: Arc<Validator>,
    reporter: Reporter,
    known_appliances: Mutex<BTreeSet<String>>,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<Arc<ApplianceEvent>>,
    cancel: CancellationToken,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl HomeConnectClient {
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, CoreError> {
        let registry = Arc::new(KeyRegistry::new());
        let reporter = Reporter::new(Arc::clone(&registry), config.reporter.clone());
        let validator = Arc::new(
            Validator::new(registry)
                .with_reporter(reporter.clone())
                .with_log_interval(config.validation_log_interval),
        );

        let transport = Transport::new(config.transport.clone())?
            .with_validator(Arc::clone(&validator) as Arc<dyn BodyValidator>);
        let requester = Arc::new(Requester::new(transport, config.retry.clone()));
        let authoriser = Authoriser::new(requester, store, config.auth.clone());

        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                authoriser,
                validator,
                reporter,
                known_appliances: Mutex::new(BTreeSet::new()),
                connection_state,
                event_tx,
                cancel: CancellationToken::new(),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    /// Load the saved token and begin authorisation in the background.
    pub async fn start(&self) {
        self.inner.authoriser.start().await;
    }

    /// Stop the event stream and the authoriser.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.authoriser.shutdown().await;
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("client shut down");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn authoriser(&self) -> &Authoriser {
        &self.inner.authoriser
    }

    /// Subscribe to authorisation status (user codes, failures).
    pub fn auth_status(&self) -> watch::Receiver<AuthStatus> {
        self.inner.authoriser.status()
    }

    pub fn reporter(&self) -> &Reporter {
        &self.inner.reporter
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        self.inner.validator.registry()
    }

    // ── Appliances ───────────────────────────────────────────────────

    pub async fn list_appliances(&self) -> Result<Vec<Appliance>, CoreError> {
        let list: ApplianceList = self.inner.get("/api/homeappliances".into()).await?;
        for appliance in &list.homeappliances {
            self.inner.remember(appliance);
        }
        Ok(list.homeappliances)
    }

    pub async fn appliance(&self, ha_id: &str) -> Result<Appliance, CoreError> {
        let appliance: Appliance = self.inner.get(appliance_path(ha_id, "")).await?;
        self.inner.remember(&appliance);
        Ok(appliance)
    }

    // ── Status ───────────────────────────────────────────────────────

    pub async fn status(&self, ha_id: &str) -> Result<Vec<Item>, CoreError> {
        let list: StatusList = self.inner.get(appliance_path(ha_id, "/status")).await?;
        Ok(list.status)
    }

    pub async fn status_value(&self, ha_id: &str, key: &str) -> Result<Item, CoreError> {
        Ok(self
            .inner
            .get(appliance_path(ha_id, &format!("/status/{key}")))
            .await?)
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub async fn settings(&self, ha_id: &str) -> Result<Vec<Item>, CoreError> {
        let list: SettingList = self.inner.get(appliance_path(ha_id, "/settings")).await?;
        Ok(list.settings)
    }

    pub async fn setting(&self, ha_id: &str, key: &str) -> Result<Item, CoreError> {
        Ok(self
            .inner
            .get(appliance_path(ha_id, &format!("/settings/{key}")))
            .await?)
    }

    pub async fn set_setting(&self, ha_id: &str, key: &str, value: Value) -> Result<(), CoreError> {
        let body = json!({ "data": { "key": key, "value": value } });
        Ok(self
            .inner
            .put(appliance_path(ha_id, &format!("/settings/{key}")), body)
            .await?)
    }

    // ── Programs ─────────────────────────────────────────────────────

    pub async fn available_programs(&self, ha_id: &str) -> Result<Vec<ProgramSummary>, CoreError> {
        let list: ProgramList = self
            .inner
            .get(appliance_path(ha_id, "/programs/available"))
            .await?;
        Ok(list.programs)
    }

    pub async fn available_program(
        &self,
        ha_id: &str,
        key: &str,
    ) -> Result<ProgramDefinition, CoreError> {
        Ok(self
            .inner
            .get(appliance_path(ha_id, &format!("/programs/available/{key}")))
            .await?)
    }

    /// The running program, or `None` when nothing is running.
    pub async fn active_program(&self, ha_id: &str) -> Result<Option<Program>, CoreError> {
        let result = self.inner.get(appliance_path(ha_id, "/programs/active")).await;
        none_if(result, NO_PROGRAM_ACTIVE)
    }

    /// The selected program, or `None` when nothing is selected.
    pub async fn selected_program(&self, ha_id: &str) -> Result<Option<Program>, CoreError> {
        let result = self
            .inner
            .get(appliance_path(ha_id, "/programs/selected"))
            .await;
        none_if(result, NO_PROGRAM_SELECTED)
    }

    pub async fn start_program(
        &self,
        ha_id: &str,
        key: &str,
        options: &[Item],
    ) -> Result<(), CoreError> {
        Ok(self
            .inner
            .put(appliance_path(ha_id, "/programs/active"), program_body(key, options))
            .await?)
    }

    pub async fn select_program(
        &self,
        ha_id: &str,
        key: &str,
        options: &[Item],
    ) -> Result<(), CoreError> {
        Ok(self
            .inner
            .put(appliance_path(ha_id, "/programs/selected"), program_body(key, options))
            .await?)
    }

    pub async fn stop_program(&self, ha_id: &str) -> Result<(), CoreError> {
        Ok(self
            .inner
            .delete(appliance_path(ha_id, "/programs/active"))
            .await?)
    }

    pub async fn active_options(&self, ha_id: &str) -> Result<Vec<Item>, CoreError> {
        let list: OptionList = self
            .inner
            .get(appliance_path(ha_id, "/programs/active/options"))
            .await?;
        Ok(list.options)
    }

    pub async fn selected_options(&self, ha_id: &str) -> Result<Vec<Item>, CoreError> {
        let list: OptionList = self
            .inner
            .get(appliance_path(ha_id, "/programs/selected/options"))
            .await?;
        Ok(list.options)
    }

    pub async fn set_active_option(
        &self,
        ha_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let body = json!({ "data": { "key": key, "value": value } });
        Ok(self
            .inner
            .put(
                appliance_path(ha_id, &format!("/programs/active/options/{key}")),
                body,
            )
            .await?)
    }

    pub async fn set_selected_option(
        &self,
        ha_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let body = json!({ "data": { "key": key, "value": value } });
        Ok(self
            .inner
            .put(
                appliance_path(ha_id, &format!("/programs/selected/options/{key}")),
                body,
            )
            .await?)
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn commands(&self, ha_id: &str) -> Result<Vec<CommandInfo>, CoreError> {
        let list: CommandList = self.inner.get(appliance_path(ha_id, "/commands")).await?;
        Ok(list.commands)
    }

    pub async fn send_command(&self, ha_id: &str, key: &str) -> Result<(), CoreError> {
        let body = json!({ "data": { "key": key, "value": true } });
        Ok(self
            .inner
            .put(appliance_path(ha_id, &format!("/commands/{key}")), body)
            .await?)
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Spawn the reconnecting event stream task. A second call while it
    /// runs is a no-op.
    pub async fn start_events(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(inner.event_loop()));
    }

    /// Subscribe to event stream state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to appliance events.
    pub fn events(&self) -> broadcast::Receiver<Arc<ApplianceEvent>> {
        self.inner.event_tx.subscribe()
    }

    /// Appliance events as a `Stream`. Events missed by a lagging
    /// consumer are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = Arc<ApplianceEvent>> + Send + Unpin + use<> {
        BroadcastStream::new(self.events()).filter_map(|item| std::future::ready(item.ok()))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn appliance_path(ha_id: &str, rest: &str) -> String {
    format!("/api/homeappliances/{ha_id}{rest}")
}

fn program_body(key: &str, options: &[Item]) -> Value {
    let options: Vec<Value> = options
        .iter()
        .map(|option| match &option.unit {
            Some(unit) => json!({ "key": option.key, "value": option.value, "unit": unit }),
            None => json!({ "key": option.key, "value": option.value }),
        })
        .collect();
    if options.is_empty() {
        json!({ "data": { "key": key } })
    } else {
        json!({ "data": { "key": key, "options": options } })
    }
}

/// Map the API's "nothing there" error to `Ok(None)`.
fn none_if<T>(
    result: Result<T, homeconnect_api::Error>,
    code: &str,
) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if matches!(e.status(), Some(404 | 409)) && e.error_code() == Some(code) => {
            debug!(code, "no program");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

// ── Requests ─────────────────────────────────────────────────────────

impl ClientInner {
    fn transport(&self) -> &Transport {
        self.authoriser.requester().transport()
    }

    async fn get<T: DeserializeOwned>(&self, path: String) -> Result<T, homeconnect_api::Error> {
        let request = Request::get(path);
        let (sent, response) = self.authoriser.execute(&request).await?;
        let data: Data<T> = self.transport().decode_json(&sent, response).await?;
        Ok(data.data)
    }

    async fn put(&self, path: String, body: Value) -> Result<(), homeconnect_api::Error> {
        let request = Request::put(path).json(body);
        let (sent, response) = self.authoriser.execute(&request).await?;
        self.transport().decode_empty(&sent, response).await
    }

    async fn delete(&self, path: String) -> Result<(), homeconnect_api::Error> {
        let request = Request::delete(path);
        let (sent, response) = self.authoriser.execute(&request).await?;
        self.transport().decode_empty(&sent, response).await
    }

    fn remember(&self, appliance: &Appliance) {
        self.known().insert(appliance.ha_id.clone());
        self.reporter.add_appliance(appliance);
    }

    fn known(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.known_appliances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ── Event loop ───────────────────────────────────────────────────────

impl ClientInner {
    /// Reconnect loop. A clean end reconnects at once; failures back
    /// off exponentially.
    async fn event_loop(self: Arc<Self>) {
        let reconnect = &self.config.events;
        let mut attempt: u32 = 0;
        let mut grace: Option<CancellationToken> = None;

        loop {
            let state = if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            };
            let _ = self.connection_state.send(state);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.read_events(&mut grace) => {
                    self.arm_grace(&mut grace);
                    match result {
                        Ok(()) => {
                            info!("event stream ended, reconnecting");
                            attempt = 0;
                        }
                        Err(e) => {
                            warn!(error = %e, attempt, "event stream error");

                            if let Some(max) = reconnect.max_reconnects {
                                if attempt >= max {
                                    error!(
                                        max_reconnects = max,
                                        "event stream reconnection limit reached, giving up"
                                    );
                                    let _ = self.connection_state.send(ConnectionState::Failed);
                                    break;
                                }
                            }

                            let delay = calculate_backoff(
                                attempt,
                                reconnect.reconnect_initial,
                                reconnect.reconnect_max,
                            );
                            debug!(?delay, attempt, "waiting before reconnect");

                            tokio::select! {
                                biased;
                                () = self.cancel.cancelled() => break,
                                () = tokio::time::sleep(delay) => {}
                            }

                            attempt = attempt.saturating_add(1);
                        }
                    }
                }
            }
        }

        if let Some(timer) = grace.take() {
            timer.cancel();
        }
        debug!("event loop exiting");
    }

    /// One connection: open the stream and dispatch records until it
    /// ends. `Ok` means the server closed it cleanly.
    async fn read_events(
        &self,
        grace: &mut Option<CancellationToken>,
    ) -> Result<(), homeconnect_api::Error> {
        let request = Request::get(EVENTS_PATH).event_stream();
        let (sent, response) = self.authoriser.execute(&request).await?;

        if let Some(timer) = grace.take() {
            debug!("event stream resumed within grace window");
            timer.cancel();
        }
        let _ = self.connection_state.send(ConnectionState::Connected);
        info!("event stream connected");

        let mut stream = self.transport().open_event_stream(&sent, response);
        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => match ApplianceEvent::from_record(&record) {
                    Ok(Some(event)) => self.dispatch(event),
                    Ok(None) => trace!("keep-alive"),
                    Err(e) => warn!(error = %e, "skipping malformed event"),
                },
                Err(EventStreamError::Ended) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn dispatch(&self, event: ApplianceEvent) {
        self.validator.check_event(&event);

        match event.kind {
            EventKind::Depaired => {
                self.known().remove(&event.ha_id);
            }
            _ if !event.ha_id.is_empty() => {
                self.known().insert(event.ha_id.clone());
            }
            _ => {}
        }

        debug!(kind = %event.kind, ha_id = %event.ha_id, items = event.items.len(), "event");
        // No receivers is fine.
        let _ = self.event_tx.send(Arc::new(event));
    }

    /// Start the grace timer after a stream drops. If no new stream
    /// opens before it expires, every known appliance is reported as
    /// disconnected.
    fn arm_grace(self: &Arc<Self>, grace: &mut Option<CancellationToken>) {
        if grace.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let timer = self.cancel.child_token();
        *grace = Some(timer.clone());

        let inner = Arc::clone(self);
        let window = self.config.events.grace_window;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(window) => {
                    let appliances: Vec<String> = inner.known().iter().cloned().collect();
                    info!(
                        count = appliances.len(),
                        "event stream down, reporting appliances disconnected"
                    );
                    let _ = inner.connection_state.send(ConnectionState::Disconnected);
                    for ha_id in appliances {
                        let event = ApplianceEvent::disconnected(ha_id);
                        let _ = inner.event_tx.send(Arc::new(event));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn program_body_shapes() {
        assert_eq!(
            program_body("Dishcare.Dishwasher.Program.Eco50", &[]),
            json!({ "data": { "key": "Dishcare.Dishwasher.Program.Eco50" } })
        );

        let mut option = Item::new("BSH.Common.Option.StartInRelative", json!(1800));
        option.unit = Some("seconds".into());
        assert_eq!(
            program_body("Dishcare.Dishwasher.Program.Eco50", &[option]),
            json!({ "data": {
                "key": "Dishcare.Dishwasher.Program.Eco50",
                "options": [
                    { "key": "BSH.Common.Option.StartInRelative", "value": 1800, "unit": "seconds" }
                ]
            }})
        );
    }

    #[test]
    fn appliance_paths() {
        assert_eq!(
            appliance_path("BOSCH-X", "/programs/active"),
            "/api/homeappliances/BOSCH-X/programs/active"
        );
    }
}
