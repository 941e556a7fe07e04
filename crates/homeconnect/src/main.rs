mod cli;
mod commands;
mod error;
mod output;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use homeconnect_core::{AuthStatus, CoreError, HomeConnectClient, JsonFileTokenStore, TokenStore};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need an account
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "homeconnect", &mut std::io::stdout());
            Ok(())
        }

        // Auth manages its own client lifecycle
        Command::Auth(args) => {
            let session = Session::open(&cli.global)?;
            commands::auth::handle(session, args, &cli.global).await
        }

        cmd => {
            let session = Session::open(&cli.global)?;
            let profile = session.profile_name.clone();
            let client = session.connect().await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = tokio::select! {
                err = lost_authorisation(client.auth_status(), &profile) => Err(err),
                result = commands::dispatch(cmd, &client, &cli.global) => result,
            };
            client.shutdown().await;
            result
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// How long a saved token may take to become usable, refresh included.
const AUTHORISE_TIMEOUT: Duration = Duration::from_secs(30);

/// A resolved profile with its token store, ready to build a client.
pub struct Session {
    pub profile_name: String,
    pub client_id: String,
    pub store: Arc<JsonFileTokenStore>,
    pub config: homeconnect_core::ClientConfig,
}

impl Session {
    fn open(global: &GlobalOpts) -> Result<Self, CliError> {
        let cfg = homeconnect_config::load_config()?;
        let (name, profile) = homeconnect_config::resolve_profile(&cfg, global.profile.as_deref())?;
        let config = homeconnect_config::profile_to_client_config(profile, &name, &cfg.defaults)?;
        let store = Arc::new(JsonFileTokenStore::new(homeconnect_config::token_store_path(
            profile,
        )));

        Ok(Self {
            client_id: config.auth.client_id.clone(),
            profile_name: name,
            store,
            config,
        })
    }

    /// Build and start a client, failing fast when no token was saved.
    /// Interactive authorisation only happens through `auth login`.
    async fn connect(self) -> Result<HomeConnectClient, CliError> {
        let saved = self
            .store
            .get(&self.client_id)
            .map_err(|e| CliError::Config {
                message: format!("cannot read token store: {e}"),
            })?;
        if saved.is_none() {
            return Err(CliError::NotAuthorised {
                message: format!("no token stored for profile '{}'", self.profile_name),
                help: format!(
                    "Run: homeconnect auth login --profile {}",
                    self.profile_name
                ),
            });
        }

        let profile = self.profile_name.clone();
        let client = self.start().await?;
        let ready = tokio::select! {
            biased;
            err = lost_authorisation(client.auth_status(), &profile) => Err(err),
            result = tokio::time::timeout(AUTHORISE_TIMEOUT, client.authoriser().authorised()) => {
                match result {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(CliError::from(CoreError::from(e))),
                    Err(_) => Err(CliError::Timeout {
                        context: format!(" refreshing the saved token of profile '{profile}'"),
                    }),
                }
            }
        };

        if let Err(err) = ready {
            client.shutdown().await;
            return Err(err);
        }
        Ok(client)
    }

    async fn start(self) -> Result<HomeConnectClient, CliError> {
        let client = HomeConnectClient::new(self.config, self.store)?;
        client.start().await;
        Ok(client)
    }
}

/// Resolves once the authoriser needs the user again: it started a new
/// Device Flow or hit a failure retrying cannot fix. Outside `auth login`
/// nobody would see the prompt, so commands stop instead of waiting.
async fn lost_authorisation(mut status: watch::Receiver<AuthStatus>, profile: &str) -> CliError {
    let login_hint = format!("Run: homeconnect auth login --profile {profile}");
    loop {
        match status.borrow_and_update().clone() {
            AuthStatus::AwaitingUser { .. } => {
                return CliError::NotAuthorised {
                    message: "the saved token is no longer valid".into(),
                    help: login_hint,
                };
            }
            AuthStatus::Failed {
                retryable: false,
                message,
                help,
                ..
            } => {
                return CliError::NotAuthorised {
                    message,
                    help: help.map_or(login_hint.clone(), |h| format!("{h}\n{login_hint}")),
                };
            }
            _ => {}
        }
        if status.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
