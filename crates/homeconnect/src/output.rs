//! Terminal rendering for appliances, item lists and programs.
//!
//! Handlers build a [`Printer`] from the global flags. Status values,
//! settings and program options are all `Item` lists and share one value
//! formatter, so units and enum literals read the same in every command.

use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{Table, Tabled, settings::Style};

use homeconnect_core::{Item, Program};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Values ───────────────────────────────────────────────────────────

/// Compact form of an API value: enum literals lose their namespace,
/// strings lose their quotes.
pub fn short_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".into(),
        Some(Value::String(s)) => s.rsplit('.').next().unwrap_or(s).to_owned(),
        Some(other) => other.to_string(),
    }
}

/// Value column of an item: the server's display text when it sent one,
/// otherwise the short value with its unit.
pub fn value_text(item: &Item) -> String {
    if let Some(ref shown) = item.display_value {
        return shown.clone();
    }
    let value = short_value(item.value.as_ref());
    match item.unit.as_deref() {
        Some(unit) if item.value.is_some() => format!("{value} {unit}"),
        _ => value,
    }
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&Item> for ItemRow {
    fn from(item: &Item) -> Self {
        Self {
            key: item.key.clone(),
            value: value_text(item),
            name: item.name.clone().unwrap_or_default(),
        }
    }
}

fn items_table(items: &[Item]) -> String {
    let rows: Vec<ItemRow> = items.iter().map(ItemRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

// ── Printer ──────────────────────────────────────────────────────────

/// Output settings resolved from `--output`, `--color` and `--quiet`.
pub struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    pub fn new(global: &GlobalOpts) -> Self {
        let color = match global.color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
        };
        Self {
            format: global.output.clone(),
            color,
            quiet: global.quiet,
        }
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// Status values, settings or program options.
    ///
    /// Plain output is one `key=value` line per item so it can be grepped
    /// or sourced.
    pub fn items(&self, items: &[Item]) -> Result<String, CliError> {
        match self.format {
            OutputFormat::Table => Ok(items_table(items)),
            OutputFormat::Plain => Ok(items
                .iter()
                .map(|i| format!("{}={}", i.key, short_value(i.value.as_ref())))
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Json | OutputFormat::JsonCompact => self.json(items),
        }
    }

    /// One item with its constraints. Plain output is the bare value.
    pub fn item(&self, item: &Item) -> Result<String, CliError> {
        match self.format {
            OutputFormat::Table => Ok(self.item_detail(item)),
            OutputFormat::Plain => Ok(short_value(item.value.as_ref())),
            OutputFormat::Json | OutputFormat::JsonCompact => self.json(item),
        }
    }

    fn item_detail(&self, item: &Item) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Key:       {}", item.key);
        let _ = writeln!(out, "Value:     {}", self.highlight(&value_text(item)));
        if let Some(ref raw) = item.value {
            let _ = writeln!(out, "Raw:       {}", self.dim(&raw.to_string()));
        }
        if let Some(ref name) = item.name {
            let _ = writeln!(out, "Name:      {name}");
        }
        if let Some(ref kind) = item.value_type {
            let _ = writeln!(out, "Type:      {kind}");
        }
        if let Some(ref c) = item.constraints {
            if let Some(ref access) = c.access {
                let _ = writeln!(out, "Access:    {access}");
            }
            if let (Some(min), Some(max)) = (c.min, c.max) {
                let step = c.step_size.map(|s| format!(" step {s}")).unwrap_or_default();
                let _ = writeln!(out, "Range:     {min} .. {max}{step}");
            }
            if let Some(ref allowed) = c.allowed_values {
                let short: Vec<String> = allowed
                    .iter()
                    .map(|v| v.rsplit('.').next().unwrap_or(v).to_owned())
                    .collect();
                let _ = writeln!(out, "Allowed:   {}", short.join(", "));
            }
        }
        if let Some(at) = item.timestamp() {
            let _ = writeln!(out, "Updated:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        out.trim_end().to_owned()
    }

    /// A program with its options as an item table.
    pub fn program(&self, program: &Program) -> Result<String, CliError> {
        match self.format {
            OutputFormat::Plain => Ok(program.key.clone()),
            OutputFormat::Json | OutputFormat::JsonCompact => self.json(program),
            OutputFormat::Table => {
                let mut out = format!("Program:   {}", self.highlight(&program.key));
                if let Some(ref name) = program.name {
                    let _ = write!(out, "\nName:      {name}");
                }
                if !program.options.is_empty() {
                    let _ = write!(out, "\n{}", items_table(&program.options));
                }
                Ok(out)
            }
        }
    }

    /// Records with their own row type: appliances, program lists and
    /// commands. Plain output is one key per line.
    pub fn records<T, R>(
        &self,
        data: &[T],
        row: impl Fn(&T) -> R,
        key: impl Fn(&T) -> &str,
    ) -> Result<String, CliError>
    where
        T: Serialize,
        R: Tabled,
    {
        match self.format {
            OutputFormat::Table => {
                let rows: Vec<R> = data.iter().map(row).collect();
                Ok(Table::new(rows).with(Style::rounded()).to_string())
            }
            OutputFormat::Plain => Ok(data.iter().map(key).collect::<Vec<_>>().join("\n")),
            OutputFormat::Json | OutputFormat::JsonCompact => self.json(data),
        }
    }

    /// One record with a hand-written detail view.
    pub fn record<T: Serialize>(
        &self,
        data: &T,
        detail: impl Fn(&T) -> String,
        key: impl Fn(&T) -> &str,
    ) -> Result<String, CliError> {
        match self.format {
            OutputFormat::Table => Ok(detail(data)),
            OutputFormat::Plain => Ok(key(data).to_owned()),
            OutputFormat::Json | OutputFormat::JsonCompact => self.json(data),
        }
    }

    /// JSON in the requested density; table and plain callers get it
    /// pretty-printed.
    pub fn json<T: Serialize + ?Sized>(&self, data: &T) -> Result<String, CliError> {
        let text = match self.format {
            OutputFormat::JsonCompact => serde_json::to_string(data)?,
            _ => serde_json::to_string_pretty(data)?,
        };
        Ok(text)
    }

    // ── Emitting ─────────────────────────────────────────────────────

    /// Write rendered output to stdout unless quiet.
    pub fn emit(&self, text: &str) {
        if self.quiet || text.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }

    /// Confirmation of a change, on stderr so stdout stays parseable.
    pub fn done(&self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    // ── Color ────────────────────────────────────────────────────────

    /// Emphasise something the user has to read or act on.
    pub fn highlight(&self, text: &str) -> String {
        if self.color {
            text.bold().yellow().to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_owned()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn printer(format: OutputFormat) -> Printer {
        Printer {
            format,
            color: false,
            quiet: false,
        }
    }

    fn temperature() -> Item {
        let mut item = Item::new("Cooking.Oven.Status.CurrentCavityTemperature", json!(180));
        item.unit = Some("°C".into());
        item
    }

    #[test]
    fn short_value_strips_enum_namespace() {
        assert_eq!(
            short_value(Some(&json!("BSH.Common.EnumType.DoorState.Open"))),
            "Open"
        );
        assert_eq!(short_value(Some(&json!(42))), "42");
        assert_eq!(short_value(Some(&json!(true))), "true");
        assert_eq!(short_value(None), "-");
    }

    #[test]
    fn value_text_prefers_display_value_then_unit() {
        assert_eq!(value_text(&temperature()), "180 °C");

        let mut door = Item::new(
            "BSH.Common.Status.DoorState",
            json!("BSH.Common.EnumType.DoorState.Closed"),
        );
        assert_eq!(value_text(&door), "Closed");
        door.display_value = Some("Geschlossen".into());
        assert_eq!(value_text(&door), "Geschlossen");
    }

    #[test]
    fn plain_items_are_key_value_lines() {
        let items = vec![
            temperature(),
            Item::new("BSH.Common.Status.RemoteControlActive", json!(false)),
        ];
        let out = printer(OutputFormat::Plain).items(&items).unwrap();
        assert_eq!(
            out,
            "Cooking.Oven.Status.CurrentCavityTemperature=180\n\
             BSH.Common.Status.RemoteControlActive=false"
        );
    }

    #[test]
    fn table_items_show_units() {
        let out = printer(OutputFormat::Table).items(&[temperature()]).unwrap();
        assert!(out.contains("180 °C"));
        assert!(out.contains("CurrentCavityTemperature"));
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = printer(OutputFormat::JsonCompact).items(&[temperature()]).unwrap();
        assert!(!out.contains('\n'));
        assert_eq!(
            serde_json::from_str::<Value>(&out).unwrap()[0]["unit"],
            "°C"
        );
    }

    #[test]
    fn program_table_lists_options() {
        let program = Program {
            key: "Dishcare.Dishwasher.Program.Eco50".into(),
            name: None,
            options: vec![Item::new(
                "BSH.Common.Option.StartInRelative",
                json!(600),
            )],
        };
        let out = printer(OutputFormat::Table).program(&program).unwrap();
        assert!(out.starts_with("Program:   Dishcare.Dishwasher.Program.Eco50"));
        assert!(out.contains("StartInRelative"));
        assert_eq!(
            printer(OutputFormat::Plain).program(&program).unwrap(),
            "Dishcare.Dishwasher.Program.Eco50"
        );
    }
}
