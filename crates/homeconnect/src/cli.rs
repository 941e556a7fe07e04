//! Clap derive structures for the `homeconnect` CLI.
//!
//! Top-level command tree plus the global flags every subcommand shares.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homeconnect: query and control Home Connect appliances
#[derive(Debug, Parser)]
#[command(
    name = "homeconnect",
    version,
    about = "Query and control Home Connect appliances from the command line",
    long_about = "A command-line client for the Home Connect cloud API.\n\n\
        Authorise once with the device flow, then list appliances, read status \
        and settings, start programs and follow the live event stream.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "HOMECONNECT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HOMECONNECT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// One key or identifier per line
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Command Tree ─────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorise this client with a Home Connect account
    Auth(AuthArgs),

    /// List and inspect paired appliances
    #[command(alias = "ha")]
    Appliances(AppliancesArgs),

    /// Read appliance status values
    Status(StatusArgs),

    /// Read and change appliance settings
    Settings(SettingsArgs),

    /// Inspect, select, start and stop programs
    #[command(alias = "prog")]
    Programs(ProgramsArgs),

    /// List and send appliance commands
    #[command(name = "commands", alias = "cmd")]
    Control(ControlArgs),

    /// Follow the live appliance event stream
    Events(EventsArgs),

    /// Scan appliances and print the unknown-value report
    Report(ReportArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Run the authorisation flow and store the resulting token
    Login {
        /// Give up after this long (e.g. "10m")
        #[arg(long, default_value = "15m", value_parser = humantime::parse_duration)]
        timeout: std::time::Duration,
    },

    /// Show whether a stored token exists and when it expires
    Status,

    /// Store the client secret in the system keyring
    SetSecret {
        /// Secret value (read from HOMECONNECT_CLIENT_SECRET if omitted)
        #[arg(env = "HOMECONNECT_CLIENT_SECRET", hide_env_values = true)]
        secret: String,
    },
}

// ── Appliances ───────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AppliancesArgs {
    #[command(subcommand)]
    pub command: AppliancesCommand,
}

#[derive(Debug, Subcommand)]
pub enum AppliancesCommand {
    /// List paired appliances
    #[command(alias = "ls")]
    List,

    /// Show one appliance
    Get {
        /// Home appliance id (haId)
        ha_id: String,
    },
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Home appliance id (haId)
    pub ha_id: String,

    /// Only show this status key
    pub key: Option<String>,
}

// ── Settings ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// List all settings of an appliance
    #[command(alias = "ls")]
    List { ha_id: String },

    /// Show one setting
    Get { ha_id: String, key: String },

    /// Change a setting
    Set {
        ha_id: String,
        key: String,
        /// New value as JSON (`true`, `42`, `"Foo.EnumType.Bar.Baz"`); bare
        /// words are sent as strings
        value: String,
    },
}

// ── Programs ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProgramsArgs {
    #[command(subcommand)]
    pub command: ProgramsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProgramsCommand {
    /// List the programs an appliance offers right now
    Available {
        ha_id: String,
        /// Show the options of one program instead
        #[arg(long)]
        program: Option<String>,
    },

    /// Show the running program
    Active { ha_id: String },

    /// Show the selected program
    Selected { ha_id: String },

    /// Start a program
    Start {
        ha_id: String,
        program: String,
        /// Program option as KEY=VALUE (repeatable)
        #[arg(long = "option", short = 'O', value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// Select a program without starting it
    Select {
        ha_id: String,
        program: String,
        #[arg(long = "option", short = 'O', value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// Stop the running program
    Stop { ha_id: String },

    /// Change an option of the active or selected program
    SetOption {
        ha_id: String,
        key: String,
        value: String,
        /// Change the selected program instead of the active one
        #[arg(long)]
        selected: bool,
    },
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ControlArgs {
    #[command(subcommand)]
    pub command: ControlCommand,
}

#[derive(Debug, Subcommand)]
pub enum ControlCommand {
    /// List the commands an appliance accepts
    #[command(alias = "ls")]
    List { ha_id: String },

    /// Send a command (e.g. BSH.Common.Command.PauseProgram)
    Send { ha_id: String, key: String },
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct EventsArgs {
    #[command(subcommand)]
    pub command: EventsCommand,
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    /// Print events as they arrive
    Watch {
        /// Only show events for this appliance
        #[arg(long, short = 'a')]
        appliance: Option<String>,

        /// Exit after this many events
        #[arg(long, short = 'n')]
        count: Option<usize>,

        /// Hide CONNECTED/DISCONNECTED/PAIRED/DEPAIRED events
        #[arg(long)]
        values_only: bool,
    },
}

// ── Report ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Only scan this appliance
    pub ha_id: Option<String>,

    /// Also read settings and available programs
    #[arg(long)]
    pub deep: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile
    Init {
        /// Client id of the registered application
        #[arg(long)]
        client_id: String,

        /// API endpoint
        #[arg(long, default_value = "production")]
        endpoint: EndpointArg,

        /// Use the authorization-code flow (simulator only)
        #[arg(long)]
        authorization_code: bool,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Show the current configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// List profile names
    Profiles,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EndpointArg {
    Production,
    Simulator,
    China,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_program_options() {
        assert_eq!(
            parse_option("BSH.Common.Option.StartInRelative=600").unwrap(),
            ("BSH.Common.Option.StartInRelative".into(), "600".into())
        );
        assert!(parse_option("no-equals").is_err());
        assert!(parse_option("=600").is_err());
    }
}
