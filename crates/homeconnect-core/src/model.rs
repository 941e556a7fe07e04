// ── Wire data types ──
//
// Thin typed views over the `/api/homeappliances` JSON. Values stay as
// `serde_json::Value` so unrecognised data reaches callers unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"data": ...}` envelope used by every data endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Data<T> {
    pub data: T,
}

/// A paired appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appliance {
    pub ha_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub vib: String,
    #[serde(default)]
    pub enumber: String,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApplianceList {
    pub homeappliances: Vec<Appliance>,
}

/// Value constraints attached to settings and program options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,
}

/// One key/value record: a status, setting, option, command or event item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handling: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            unit: None,
            display_value: None,
            name: None,
            uri: None,
            timestamp: None,
            level: None,
            handling: None,
            value_type: None,
            constraints: None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref()?.as_bool()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref()?.as_f64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref()?.as_str()
    }

    /// Event timestamp, when present.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp?, 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatusList {
    pub status: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SettingList {
    pub settings: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OptionList {
    pub options: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommandList {
    pub commands: Vec<CommandInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProgramList {
    pub programs: Vec<ProgramSummary>,
}

/// Entry of `/programs/available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSummary {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

/// An active or selected program with its current option values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Vec<Item>,
}

/// `/programs/available/{key}`: a program with its option definitions.
pub type ProgramDefinition = Program;

/// Entry of `/commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn appliance_from_wire() {
        let appliance: Appliance = serde_json::from_value(json!({
            "haId": "SIEMENS-HCS02DWH1-6F2FC400C1EA4A",
            "name": "Dishwasher",
            "type": "Dishwasher",
            "brand": "Siemens",
            "vib": "HCS02DWH1",
            "enumber": "HCS02DWH1/03",
            "connected": true
        }))
        .unwrap();

        assert_eq!(appliance.kind, "Dishwasher");
        assert_eq!(appliance.enumber, "HCS02DWH1/03");
        assert!(appliance.connected);
    }

    #[test]
    fn item_accessors() {
        let item: Item = serde_json::from_value(json!({
            "key": "BSH.Common.Option.RemainingProgramTime",
            "value": 3600,
            "unit": "seconds",
            "timestamp": 1_700_000_000
        }))
        .unwrap();

        assert_eq!(item.as_f64(), Some(3600.0));
        assert_eq!(item.as_str(), None);
        assert_eq!(item.timestamp().unwrap().timestamp(), 1_700_000_000);
    }
}
