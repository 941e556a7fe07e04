//! Program command handlers.

use tabled::Tabled;

use homeconnect_core::{HomeConnectClient, Program, ProgramSummary};

use crate::cli::{GlobalOpts, ProgramsArgs, ProgramsCommand};
use crate::commands::util;
use crate::error::CliError;
use crate::output::Printer;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ProgramRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Execution")]
    execution: String,
}

impl From<&ProgramSummary> for ProgramRow {
    fn from(p: &ProgramSummary) -> Self {
        Self {
            key: p.key.clone(),
            name: p.name.clone().unwrap_or_default(),
            execution: p
                .constraints
                .as_ref()
                .and_then(|c| c.execution.clone())
                .unwrap_or_default(),
        }
    }
}

fn print_program(
    printer: &Printer,
    program: Option<&Program>,
    what: &str,
) -> Result<(), CliError> {
    match program {
        Some(p) => printer.emit(&printer.program(p)?),
        None => printer.done(&format!("No program {what}")),
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &HomeConnectClient,
    args: ProgramsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        ProgramsCommand::Available {
            ha_id,
            program: None,
        } => {
            let programs = client.available_programs(&ha_id).await?;
            let out = printer.records(&programs, |p| ProgramRow::from(p), |p| p.key.as_str())?;
            printer.emit(&out);
            Ok(())
        }

        ProgramsCommand::Available {
            ha_id,
            program: Some(key),
        } => {
            let definition = client.available_program(&ha_id, &key).await?;
            print_program(&printer, Some(&definition), "available")
        }

        ProgramsCommand::Active { ha_id } => {
            let program = client.active_program(&ha_id).await?;
            print_program(&printer, program.as_ref(), "active")
        }

        ProgramsCommand::Selected { ha_id } => {
            let program = client.selected_program(&ha_id).await?;
            print_program(&printer, program.as_ref(), "selected")
        }

        ProgramsCommand::Start {
            ha_id,
            program,
            options,
        } => {
            client
                .start_program(&ha_id, &program, &util::option_items(&options))
                .await?;
            printer.done(&format!("Started {program}"));
            Ok(())
        }

        ProgramsCommand::Select {
            ha_id,
            program,
            options,
        } => {
            client
                .select_program(&ha_id, &program, &util::option_items(&options))
                .await?;
            printer.done(&format!("Selected {program}"));
            Ok(())
        }

        ProgramsCommand::Stop { ha_id } => {
            client.stop_program(&ha_id).await?;
            printer.done("Program stopped");
            Ok(())
        }

        ProgramsCommand::SetOption {
            ha_id,
            key,
            value,
            selected,
        } => {
            let value = util::parse_value(&value);
            if selected {
                client.set_selected_option(&ha_id, &key, value).await?;
            } else {
                client.set_active_option(&ha_id, &key, value).await?;
            }
            printer.done(&format!("{key} updated"));
            Ok(())
        }
    }
}
