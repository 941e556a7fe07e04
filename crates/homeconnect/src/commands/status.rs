//! Status command handler.

use homeconnect_core::HomeConnectClient;

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output::Printer;

pub async fn handle(
    client: &HomeConnectClient,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    let out = match args.key {
        Some(key) => printer.item(&client.status_value(&args.ha_id, &key).await?)?,
        None => printer.items(&client.status(&args.ha_id).await?)?,
    };
    printer.emit(&out);
    Ok(())
}
