//! Config subcommand handlers.

use std::fmt::Write as _;

use homeconnect_config::{self as config, Config, Profile};
use homeconnect_core::{AuthFlow, Endpoint};

use crate::cli::{ConfigArgs, ConfigCommand, EndpointArg, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

// ── Helpers ─────────────────────────────────────────────────────────

impl From<EndpointArg> for Endpoint {
    fn from(arg: EndpointArg) -> Self {
        match arg {
            EndpointArg::Production => Endpoint::Production,
            EndpointArg::Simulator => Endpoint::Simulator,
            EndpointArg::China => Endpoint::China,
        }
    }
}

/// Format config for display, masking the client secret.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    if let Some(ref language) = cfg.defaults.language {
        let _ = writeln!(out, "language = \"{language}\"");
    }

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "endpoint = \"{}\"", endpoint_name(p.endpoint));
        let _ = writeln!(out, "flow = \"{}\"", flow_name(p.flow));
        let _ = writeln!(out, "client_id = \"{}\"", p.client_id);
        if p.client_secret.is_some() {
            let _ = writeln!(out, "client_secret = \"****\"");
        }
        if let Some(ref env) = p.client_secret_env {
            let _ = writeln!(out, "client_secret_env = \"{env}\"");
        }
        if let Some(ref scopes) = p.scopes {
            let _ = writeln!(out, "scopes = {scopes:?}");
        }
        if let Some(ref store) = p.token_store {
            let _ = writeln!(out, "token_store = \"{}\"", store.display());
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(window) = p.refresh_window {
            let _ = writeln!(out, "refresh_window = {window}");
        }
    }

    out
}

fn endpoint_name(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::Production => "production",
        Endpoint::Simulator => "simulator",
        Endpoint::China => "china",
    }
}

fn flow_name(flow: AuthFlow) -> &'static str {
    match flow {
        AuthFlow::DeviceFlow => "device-flow",
        AuthFlow::AuthorizationCode => "authorization-code",
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        ConfigCommand::Init {
            client_id,
            endpoint,
            authorization_code,
            default,
        } => {
            let mut cfg = config::load_config()?;
            let name = global.profile.clone().unwrap_or_else(|| "default".into());

            let profile = Profile {
                endpoint: endpoint.into(),
                flow: if authorization_code {
                    AuthFlow::AuthorizationCode
                } else {
                    AuthFlow::DeviceFlow
                },
                client_id,
                ..cfg.profiles.get(&name).cloned().unwrap_or_default()
            };
            config::validate_profile(&profile)?;

            cfg.profiles.insert(name.clone(), profile);
            if default || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }
            config::save_config(&cfg)?;

            printer.done(&format!(
                "Profile '{name}' saved to {}\nNext: homeconnect auth login --profile {name}",
                config::config_path().display()
            ));
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            printer.emit(format_config_redacted(&cfg).trim_end());
            Ok(())
        }

        ConfigCommand::Path => {
            printer.emit(&config::config_path().display().to_string());
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            let default = cfg.default_profile.as_deref();
            let lines: Vec<String> = names
                .iter()
                .map(|n| {
                    if Some(n.as_str()) == default {
                        format!("{n} (default)")
                    } else {
                        n.clone()
                    }
                })
                .collect();
            printer.emit(&lines.join("\n"));
            Ok(())
        }
    }
}
