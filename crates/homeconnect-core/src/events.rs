// ── Appliance events ──
//
// Typed view of the records the event stream delivers. Parsing the
// SSE framing is `homeconnect_api::sse`'s job; this module only names
// the record kinds and decodes their `items` payload.

use std::fmt;

use serde::Deserialize;
use strum::EnumString;

use homeconnect_api::{EventStreamError, SseRecord};

use crate::model::Item;

/// The `event:` field of a stream record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
pub enum EventKind {
    #[strum(serialize = "KEEP-ALIVE")]
    KeepAlive,
    #[strum(serialize = "STATUS")]
    Status,
    #[strum(serialize = "EVENT")]
    Event,
    #[strum(serialize = "NOTIFY")]
    Notify,
    #[strum(serialize = "CONNECTED")]
    Connected,
    #[strum(serialize = "DISCONNECTED")]
    Disconnected,
    #[strum(serialize = "PAIRED")]
    Paired,
    #[strum(serialize = "DEPAIRED")]
    Depaired,
    #[strum(default)]
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::KeepAlive => "KEEP-ALIVE",
            Self::Status => "STATUS",
            Self::Event => "EVENT",
            Self::Notify => "NOTIFY",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Paired => "PAIRED",
            Self::Depaired => "DEPAIRED",
            Self::Other(name) => name,
        }
    }

    /// Kinds whose `items` carry key/value records worth validating.
    pub fn carries_items(&self) -> bool {
        matches!(self, Self::Status | Self::Event | Self::Notify)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded event for one appliance.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceEvent {
    pub kind: EventKind,
    /// Appliance the event concerns; empty only for malformed records.
    pub ha_id: String,
    pub items: Vec<Item>,
}

#[derive(Deserialize)]
struct EventPayload {
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default, rename = "haId")]
    ha_id: Option<String>,
}

impl ApplianceEvent {
    /// Decode a stream record. Keep-alives and records without an
    /// `event:` field yield `Ok(None)`.
    pub fn from_record(record: &SseRecord) -> Result<Option<Self>, EventStreamError> {
        let Some(name) = record.event() else {
            return Ok(None);
        };
        let kind: EventKind = name
            .parse()
            .unwrap_or_else(|_| EventKind::Other(name.to_owned()));
        if kind == EventKind::KeepAlive {
            return Ok(None);
        }

        let payload = match record.data().map(str::trim) {
            None | Some("") => None,
            Some(data) => Some(serde_json::from_str::<EventPayload>(data).map_err(|e| {
                EventStreamError::Malformed(format!("{kind} event data: {e}"))
            })?),
        };

        let ha_id = record
            .id()
            .map(str::to_owned)
            .or_else(|| payload.as_ref().and_then(|p| p.ha_id.clone()))
            .unwrap_or_default();
        let items = payload.map(|p| p.items).unwrap_or_default();

        Ok(Some(Self { kind, ha_id, items }))
    }

    /// A synthetic disconnection notice for `ha_id`.
    pub fn disconnected(ha_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Disconnected,
            ha_id: ha_id.into(),
            items: Vec::new(),
        }
    }
}
