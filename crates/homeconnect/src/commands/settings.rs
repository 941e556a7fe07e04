//! Settings command handlers.

use homeconnect_core::HomeConnectClient;

use crate::cli::{GlobalOpts, SettingsArgs, SettingsCommand};
use crate::commands::util;
use crate::error::CliError;
use crate::output::Printer;

pub async fn handle(
    client: &HomeConnectClient,
    args: SettingsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        SettingsCommand::List { ha_id } => {
            printer.emit(&printer.items(&client.settings(&ha_id).await?)?);
            Ok(())
        }

        SettingsCommand::Get { ha_id, key } => {
            printer.emit(&printer.item(&client.setting(&ha_id, &key).await?)?);
            Ok(())
        }

        SettingsCommand::Set { ha_id, key, value } => {
            let value = util::parse_value(&value);
            client.set_setting(&ha_id, &key, value).await?;
            printer.done(&format!("{key} updated"));
            Ok(())
        }
    }
}
