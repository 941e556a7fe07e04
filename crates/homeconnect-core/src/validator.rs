// ── Key/value schema validator ──
//
// Checks every inbound key/value against the static catalogue. Nothing
// here ever fails a request: drift is recorded in the registry, logged
// (rate-limited per key) and handed to the reporter, and the caller
// still receives the raw value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use homeconnect_api::{BodyValidator, Request};

use crate::catalogue::{Catalogue, Group, ValueCheck};
use crate::events::{ApplianceEvent, EventKind};
use crate::registry::{InferredType, KeyRegistry, Observation};
use crate::reporter::{Reporter, Signature};

/// Default interval between repeated warnings for the same key.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// What was wrong with one key/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftKind {
    UnknownKey,
    TypeMismatch { expected: String },
    UnknownLiteral { literal: String },
}

/// One flagged occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    pub kind: DriftKind,
    pub group: Group,
    pub key: String,
    pub value: Option<Value>,
}

impl Drift {
    pub fn signature(&self) -> Signature {
        Signature {
            group: self.group,
            key: self.key.clone(),
            literal: match &self.kind {
                DriftKind::UnknownLiteral { literal } => Some(literal.clone()),
                DriftKind::UnknownKey | DriftKind::TypeMismatch { .. } => None,
            },
        }
    }
}

pub struct Validator {
    catalogue: &'static Catalogue,
    registry: Arc<KeyRegistry>,
    reporter: Option<Reporter>,
    log_interval: Duration,
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl Validator {
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self {
            catalogue: Catalogue::builtin(),
            registry,
            reporter: None,
            log_interval: DEFAULT_LOG_INTERVAL,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_catalogue(mut self, catalogue: &'static Catalogue) -> Self {
        self.catalogue = catalogue;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    #[must_use]
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Classify one key/value. `None` means it matched the catalogue.
    pub fn check(&self, group: Group, key: &str, value: Option<&Value>) -> Option<Drift> {
        let spec = self.catalogue.lookup(group, key);
        let kind = match spec {
            None => Some(DriftKind::UnknownKey),
            Some(spec) => match value.map(|v| self.catalogue.check_value(spec, v)) {
                None | Some(ValueCheck::Ok) => None,
                Some(ValueCheck::WrongType { expected }) => {
                    Some(DriftKind::TypeMismatch { expected })
                }
                Some(ValueCheck::UnknownLiteral { literal }) => {
                    Some(DriftKind::UnknownLiteral { literal })
                }
            },
        };

        self.registry.observe(Observation {
            group,
            key,
            value,
            spec,
            literal_recognised: !matches!(kind, Some(DriftKind::UnknownLiteral { .. })),
        });

        let drift = Drift {
            kind: kind?,
            group,
            key: key.to_owned(),
            value: value.cloned(),
        };
        self.flag(&drift);
        Some(drift)
    }

    /// Validate the items of one stream event.
    pub fn check_event(&self, event: &ApplianceEvent) -> Vec<Drift> {
        if !event.kind.carries_items() {
            return Vec::new();
        }
        event
            .items
            .iter()
            .filter_map(|item| {
                let group = match event.kind {
                    EventKind::Status => Group::Status,
                    EventKind::Event => Group::Event,
                    _ => Group::from_key(&item.key).unwrap_or(Group::Status),
                };
                self.check(group, &item.key, item.value.as_ref())
            })
            .collect()
    }

    fn flag(&self, drift: &Drift) {
        if self.should_log(&drift.key) {
            match &drift.kind {
                DriftKind::UnknownKey => warn!(
                    group = %drift.group,
                    key = %drift.key,
                    value = ?drift.value,
                    "unrecognised key"
                ),
                DriftKind::TypeMismatch { expected } => warn!(
                    group = %drift.group,
                    key = %drift.key,
                    value = ?drift.value,
                    expected = %expected,
                    "unexpected value type"
                ),
                DriftKind::UnknownLiteral { literal } => warn!(
                    group = %drift.group,
                    key = %drift.key,
                    literal = %literal,
                    "unrecognised value"
                ),
            }
        }
        if let Some(reporter) = &self.reporter {
            reporter.flag(drift.signature());
        }
    }

    fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut logged = self
            .last_logged
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match logged.get(key) {
            Some(at) if now.duration_since(*at) < self.log_interval => false,
            _ => {
                logged.insert(key.to_owned(), now);
                true
            }
        }
    }

    // ── Response shapes ──────────────────────────────────────────────

    fn check_item(&self, group: Group, item: &Value) {
        let Some(key) = item.get("key").and_then(Value::as_str) else {
            return;
        };
        let value = item.get("value");
        self.check(group, key, value);

        if value.is_none() {
            if let Some(declared) = item.get("type").and_then(Value::as_str) {
                self.registry
                    .declare(group, key, InferredType::from_declared(declared));
            }
        }
    }

    fn check_items(&self, group: Group, items: Option<&Value>) {
        for item in items.and_then(Value::as_array).into_iter().flatten() {
            self.check_item(group, item);
        }
    }

    fn check_program(&self, program: &Value) {
        if let Some(key) = program.get("key").and_then(Value::as_str) {
            self.check(Group::Program, key, None);
        }
        self.check_items(Group::Option, program.get("options"));
    }
}

/// Group implied by the resource a single `{key, value}` came from.
fn group_for_path(path: &str, key: &str) -> Option<Group> {
    let segments: Vec<&str> = path.split('/').collect();
    let has = |name: &str| segments.contains(&name);

    if has("options") {
        Some(Group::Option)
    } else if has("programs") {
        Some(Group::Program)
    } else if has("status") {
        Some(Group::Status)
    } else if has("settings") {
        Some(Group::Setting)
    } else if has("commands") {
        Some(Group::Command)
    } else {
        Group::from_key(key)
    }
}

impl BodyValidator for Validator {
    fn validate(&self, request: &Request, body: &Value) {
        let path = request.path.split('?').next().unwrap_or_default();
        if path.starts_with("/security/") {
            return;
        }
        let Some(data) = body.get("data") else {
            debug!(path, "response without data envelope");
            return;
        };

        self.check_items(Group::Status, data.get("status"));
        self.check_items(Group::Setting, data.get("settings"));
        self.check_items(Group::Command, data.get("commands"));
        for program in data
            .get("programs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            self.check_program(program);
        }

        match data.get("key").and_then(Value::as_str) {
            Some(key) => match group_for_path(path, key) {
                Some(Group::Program) => self.check_program(data),
                Some(group) => self.check_item(group, data),
                None => debug!(path, key, "cannot tell which group a key belongs to"),
            },
            None => self.check_items(Group::Option, data.get("options")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Item;

    fn validator() -> Validator {
        Validator::new(Arc::new(KeyRegistry::new()))
    }

    #[test]
    fn known_key_and_value_pass() {
        let v = validator();
        let value = json!("BSH.Common.EnumType.DoorState.Open");
        assert_eq!(v.check(Group::Status, "BSH.Common.Status.DoorState", Some(&value)), None);
    }

    #[test]
    fn classifies_drift() {
        let v = validator();

        let drift = v.check(Group::Status, "Vendor.Status.Mystery", Some(&json!(1))).unwrap();
        assert_eq!(drift.kind, DriftKind::UnknownKey);

        let drift = v
            .check(Group::Status, "BSH.Common.Status.DoorState", Some(&json!(true)))
            .unwrap();
        assert_eq!(
            drift.kind,
            DriftKind::TypeMismatch {
                expected: "DoorState".into()
            }
        );

        let literal = "BSH.Common.EnumType.DoorState.Ajar";
        let drift = v
            .check(Group::Status, "BSH.Common.Status.DoorState", Some(&json!(literal)))
            .unwrap();
        assert_eq!(drift.signature().literal.as_deref(), Some(literal));
    }

    #[test]
    fn walks_status_lists() {
        let v = validator();
        let request = Request::get("/api/homeappliances/X/status");
        v.validate(
            &request,
            &json!({ "data": { "status": [
                { "key": "BSH.Common.Status.DoorState", "value": "BSH.Common.EnumType.DoorState.Open" },
                { "key": "Vendor.Status.Extra", "value": 4 }
            ]}}),
        );

        let record = v.registry().get("Vendor.Status.Extra").unwrap();
        assert!(!record.recognised);
        assert_eq!(record.value_type(), InferredType::Number);
        assert!(v.registry().get("BSH.Common.Status.DoorState").unwrap().recognised);
    }

    #[test]
    fn single_item_group_comes_from_path() {
        let v = validator();
        let request = Request::get("/api/homeappliances/X/settings/Vendor.Thing");
        v.validate(&request, &json!({ "data": { "key": "Vendor.Thing", "value": "x" } }));

        let record = v.registry().get("Vendor.Thing").unwrap();
        assert!(record.groups.contains(&Group::Setting));
    }

    #[test]
    fn program_definition_declares_option_types() {
        let v = validator();
        let request = Request::get("/api/homeappliances/X/programs/available/Vendor.Program.New");
        v.validate(
            &request,
            &json!({ "data": {
                "key": "Vendor.Program.New",
                "options": [ { "key": "Vendor.Option.Speed", "type": "Int" } ]
            }}),
        );

        assert!(v.registry().get("Vendor.Program.New").unwrap().groups.contains(&Group::Program));
        assert!(v.registry().type_known("Vendor.Option.Speed"));
    }

    #[test]
    fn oauth_bodies_are_ignored() {
        let v = validator();
        v.validate(
            &Request::post("/security/oauth/token"),
            &json!({ "data": { "key": "Vendor.Thing", "value": 1 } }),
        );
        assert!(v.registry().is_empty());
    }

    #[test]
    fn notify_items_take_group_from_key() {
        let v = validator();
        let event = ApplianceEvent {
            kind: EventKind::Notify,
            ha_id: "X".into(),
            items: vec![Item::new("Vendor.Setting.Brightness", json!(3))],
        };
        let drifts = v.check_event(&event);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].group, Group::Setting);
    }

    #[test]
    fn warnings_are_rate_limited_per_key() {
        let v = validator();
        assert!(v.should_log("Vendor.A"));
        assert!(!v.should_log("Vendor.A"));
        assert!(v.should_log("Vendor.B"));
    }
}
