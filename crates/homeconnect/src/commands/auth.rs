//! Auth subcommand handlers.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use homeconnect_core::{AuthStatus, HomeConnectClient, TokenStore};

use crate::Session;
use crate::cli::{AuthArgs, AuthCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::Printer;

/// "in 23h 59m" style, rounded to minutes.
fn format_remaining(remaining: Duration) -> String {
    let rounded = Duration::from_secs(remaining.as_secs() / 60 * 60);
    if rounded.is_zero() {
        return "expired".into();
    }
    format!("in {}", humantime::format_duration(rounded))
}

pub async fn handle(
    session: Session,
    args: AuthArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        AuthCommand::Login { timeout } => {
            let profile = session.profile_name.clone();
            let client = session.start().await?;
            let result = tokio::time::timeout(timeout, login(&client, &printer)).await;
            client.shutdown().await;
            match result {
                Ok(outcome) => outcome,
                Err(_) => Err(CliError::Timeout {
                    context: format!(" waiting for authorisation of profile '{profile}'"),
                }),
            }
        }

        AuthCommand::Status => status(&session, &printer),

        AuthCommand::SetSecret { secret } => {
            homeconnect_config::store_client_secret(&session.profile_name, &secret)?;
            printer.done(&format!(
                "Client secret stored for profile '{}'",
                session.profile_name
            ));
            Ok(())
        }
    }
}

// ── Login ───────────────────────────────────────────────────────────

async fn login(client: &HomeConnectClient, printer: &Printer) -> Result<(), CliError> {
    let mut status = client.auth_status();
    let mut shown_code: Option<String> = None;

    loop {
        let current = status.borrow_and_update().clone();
        match current {
            AuthStatus::Success => break,
            AuthStatus::Busy => {}
            AuthStatus::AwaitingUser {
                verification_uri,
                user_code,
                expires_at,
            } => {
                if shown_code.as_deref() != Some(user_code.as_str()) {
                    eprintln!("Open {verification_uri}");
                    eprintln!("and enter the code {}", printer.highlight(&user_code));
                    if let Some(at) = expires_at {
                        let left = (at - Utc::now()).to_std().unwrap_or_default();
                        let note = format!("The code expires {}", format_remaining(left));
                        eprintln!("{}", printer.dim(&note));
                    }
                    shown_code = Some(user_code);
                }
            }
            AuthStatus::Failed {
                retryable: true,
                message,
                ..
            } => {
                eprintln!("{message}; requesting a new code");
                client.authoriser().retry();
            }
            AuthStatus::Failed {
                retryable: false,
                message,
                help,
                ..
            } => {
                return Err(CliError::NotAuthorised {
                    message,
                    help: help
                        .unwrap_or_else(|| "Check the profile's client id and secret".into()),
                });
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                return Err(CliError::NotAuthorised {
                    message: "login cancelled".into(),
                    help: "Run: homeconnect auth login".into(),
                });
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Err(CliError::NotAuthorised {
                        message: "authorisation stopped unexpectedly".into(),
                        help: "Re-run with -vv for details".into(),
                    });
                }
            }
        }
    }

    let remaining = client
        .authoriser()
        .token()
        .map(|t| t.remaining(Utc::now().timestamp_millis()))
        .unwrap_or_default();
    printer.done(&format!(
        "Authorised; access token expires {}",
        format_remaining(remaining)
    ));
    Ok(())
}

// ── Status ──────────────────────────────────────────────────────────

fn status(session: &Session, printer: &Printer) -> Result<(), CliError> {
    let token = session
        .store
        .get(&session.client_id)
        .map_err(|e| CliError::Config {
            message: format!("cannot read token store: {e}"),
        })?;

    let Some(token) = token else {
        return Err(CliError::NotAuthorised {
            message: format!("no token stored for profile '{}'", session.profile_name),
            help: format!("Run: homeconnect auth login --profile {}", session.profile_name),
        });
    };

    let remaining = token.remaining(Utc::now().timestamp_millis());
    let summary = json!({
        "profile": session.profile_name,
        "tokenStore": session.store.path().display().to_string(),
        "expiresAt": token.expires_at(),
        "scopes": token.scopes,
    });

    let out = match printer.format() {
        OutputFormat::Json | OutputFormat::JsonCompact => printer.json(&summary)?,
        OutputFormat::Plain => token.expires_at().to_rfc3339(),
        OutputFormat::Table => [
            format!("Profile:   {}", session.profile_name),
            format!("Store:     {}", session.store.path().display()),
            format!(
                "Expires:   {} ({})",
                token.expires_at().format("%Y-%m-%d %H:%M:%S UTC"),
                format_remaining(remaining)
            ),
            format!("Scopes:    {}", token.scopes.join(" ")),
        ]
        .join("\n"),
    };
    printer.emit(&out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_rounded_to_minutes() {
        assert_eq!(format_remaining(Duration::from_secs(3 * 3600 + 125)), "in 3h 2m");
        assert_eq!(format_remaining(Duration::from_secs(59)), "expired");
    }
}
