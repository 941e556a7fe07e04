//! Unknown-value report: read everything an appliance exposes, then print
//! what the validator did not recognise.

use serde_json::json;

use homeconnect_core::{DriftReport, HomeConnectClient};

use crate::cli::{GlobalOpts, OutputFormat, ReportArgs};
use crate::error::CliError;
use crate::output::Printer;

fn report_json(report: &DriftReport) -> serde_json::Value {
    let signatures: Vec<_> = report
        .signatures
        .iter()
        .map(|s| json!({ "group": s.group.as_ref(), "key": s.key, "literal": s.literal }))
        .collect();
    json!({
        "title": report.title,
        "issueUrl": report.issue_url.as_str(),
        "signatures": signatures,
        "body": report.body,
    })
}

fn report_text(report: &DriftReport, printer: &Printer) -> String {
    format!(
        "{}\n\n{}\n\n{}\n{}",
        printer.highlight(&report.title),
        report.body.trim_end(),
        printer.dim("Report it at:"),
        report.issue_url
    )
}

pub async fn handle(
    client: &HomeConnectClient,
    args: ReportArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    let appliances = match args.ha_id {
        Some(ref ha_id) => vec![client.appliance(ha_id).await?],
        None => client.list_appliances().await?,
    };

    // Disconnected appliances answer 409; skip them rather than abort.
    for appliance in appliances.iter().filter(|a| a.connected) {
        let ha_id = appliance.ha_id.as_str();
        if let Err(e) = client.status(ha_id).await {
            tracing::warn!(ha_id, error = %e, "cannot read status");
        }
        if !args.deep {
            continue;
        }
        if let Err(e) = client.settings(ha_id).await {
            tracing::warn!(ha_id, error = %e, "cannot read settings");
        }
        match client.available_programs(ha_id).await {
            Ok(programs) => {
                for program in programs {
                    if let Err(e) = client.available_program(ha_id, &program.key).await {
                        tracing::debug!(
                            ha_id,
                            program = %program.key,
                            error = %e,
                            "cannot read program"
                        );
                    }
                }
            }
            Err(e) => tracing::warn!(ha_id, error = %e, "cannot read programs"),
        }
    }

    let reporter = client.reporter();
    let Some(report) = reporter.flush().or_else(|| reporter.last_report()) else {
        printer.done("No unknown values found");
        return Ok(());
    };

    let out = match printer.format() {
        OutputFormat::Json | OutputFormat::JsonCompact => printer.json(&report_json(&report))?,
        OutputFormat::Plain => report.issue_url.to_string(),
        OutputFormat::Table => report_text(&report, &printer),
    };
    printer.emit(&out);
    Ok(())
}
