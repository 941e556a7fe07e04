//! Shared helpers for command handlers.

use serde_json::Value;

use homeconnect_core::Item;

/// Parse a value typed on the command line.
///
/// JSON literals (`true`, `42`, `"x"`, `{...}`) are taken as-is; anything
/// else is sent as a plain string so enum literals need no quoting.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Turn `KEY=VALUE` pairs into program option items.
pub fn option_items(options: &[(String, String)]) -> Vec<Item> {
    options
        .iter()
        .map(|(key, raw)| Item::new(key.clone(), parse_value(raw)))
        .collect()
}
