//! Event stream command handler.
//!
//! Subscribes before the stream task starts so no early events are lost,
//! then prints one line (or one JSON object) per event until Ctrl-C or
//! `--count` is reached.

use futures_util::StreamExt;
use serde_json::json;

use homeconnect_core::{ApplianceEvent, HomeConnectClient};

use crate::cli::{EventsArgs, EventsCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::{self, Printer};

fn event_json(event: &ApplianceEvent) -> serde_json::Value {
    json!({
        "event": event.kind.as_str(),
        "haId": event.ha_id,
        "items": event.items,
    })
}

fn event_line(event: &ApplianceEvent, printer: &Printer) -> String {
    let head = format!("{:<12} {}", event.kind.as_str(), event.ha_id);
    if event.items.is_empty() {
        return head;
    }
    let values: Vec<String> = event
        .items
        .iter()
        .map(|i| {
            format!("{}={}", printer.dim(&i.key), output::value_text(i))
        })
        .collect();
    format!("{head}  {}", values.join(" "))
}

pub async fn handle(
    client: &HomeConnectClient,
    args: EventsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let EventsCommand::Watch {
        appliance,
        count,
        values_only,
    } = args.command;

    let printer = Printer::new(global);
    let mut events = client.event_stream();
    client.start_events().await;

    let mut seen = 0usize;
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => break,
            },
        };

        if appliance.as_deref().is_some_and(|id| id != event.ha_id) {
            continue;
        }
        if values_only && !event.kind.carries_items() {
            continue;
        }

        // One event per line, whatever the JSON density asked for.
        let line = match printer.format() {
            OutputFormat::Json | OutputFormat::JsonCompact => {
                serde_json::to_string(&event_json(&event))?
            }
            OutputFormat::Table | OutputFormat::Plain => event_line(&event, &printer),
        };
        printer.emit(&line);

        seen += 1;
        if count.is_some_and(|n| seen >= n) {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use homeconnect_core::{EventKind, Item};
    use serde_json::json;

    use super::*;
    use crate::cli::{ColorMode, GlobalOpts};

    fn plain_printer() -> Printer {
        Printer::new(&GlobalOpts {
            profile: None,
            output: OutputFormat::Plain,
            color: ColorMode::Never,
            verbose: 0,
            quiet: false,
        })
    }

    #[test]
    fn event_line_lists_short_values() {
        let mut remaining = Item::new("BSH.Common.Option.RemainingProgramTime", json!(540));
        remaining.unit = Some("seconds".into());
        let event = ApplianceEvent {
            kind: EventKind::Status,
            ha_id: "BOSCH-WAT28400-68A40E251CB7".into(),
            items: vec![
                Item::new(
                    "BSH.Common.Status.DoorState",
                    json!("BSH.Common.EnumType.DoorState.Open"),
                ),
                remaining,
            ],
        };
        assert_eq!(
            event_line(&event, &plain_printer()),
            "STATUS       BOSCH-WAT28400-68A40E251CB7  BSH.Common.Status.DoorState=Open \
             BSH.Common.Option.RemainingProgramTime=540 seconds"
        );
    }

    #[test]
    fn event_json_uses_wire_names() {
        let event = ApplianceEvent::disconnected("X");
        let value = event_json(&event);
        assert_eq!(value["event"], "DISCONNECTED");
        assert_eq!(value["haId"], "X");
    }
}
