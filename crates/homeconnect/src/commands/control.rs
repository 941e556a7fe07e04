//! Appliance command handlers (pause, resume, open door, ...).

use tabled::Tabled;

use homeconnect_core::{CommandInfo, HomeConnectClient};

use crate::cli::{ControlArgs, ControlCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

#[derive(Tabled)]
struct CommandRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&CommandInfo> for CommandRow {
    fn from(c: &CommandInfo) -> Self {
        Self {
            key: c.key.clone(),
            name: c.name.clone().unwrap_or_default(),
        }
    }
}

pub async fn handle(
    client: &HomeConnectClient,
    args: ControlArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        ControlCommand::List { ha_id } => {
            let commands = client.commands(&ha_id).await?;
            let out = printer.records(&commands, |c| CommandRow::from(c), |c| c.key.as_str())?;
            printer.emit(&out);
            Ok(())
        }

        ControlCommand::Send { ha_id, key } => {
            client.send_command(&ha_id, &key).await?;
            printer.done(&format!("Sent {key}"));
            Ok(())
        }
    }
}
