//! Command dispatch: bridges CLI args -> client calls -> output formatting.

pub mod appliances;
pub mod auth;
pub mod config_cmd;
pub mod control;
pub mod events;
pub mod programs;
pub mod report;
pub mod settings;
pub mod status;
pub mod util;

use homeconnect_core::HomeConnectClient;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an account-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    client: &HomeConnectClient,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Appliances(args) => appliances::handle(client, args, global).await,
        Command::Status(args) => status::handle(client, args, global).await,
        Command::Settings(args) => settings::handle(client, args, global).await,
        Command::Programs(args) => programs::handle(client, args, global).await,
        Command::Control(args) => control::handle(client, args, global).await,
        Command::Events(args) => events::handle(client, args, global).await,
        Command::Report(args) => report::handle(client, args, global).await,
        // Handled before a client exists
        Command::Auth(_) | Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
