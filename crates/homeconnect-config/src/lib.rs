//! Shared configuration for the Home Connect tools.
//!
//! TOML profiles, client secret resolution (env + keyring + plaintext),
//! token store location, and translation to
//! `homeconnect_core::ClientConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use homeconnect_core::{AuthConfig, AuthFlow, ClientConfig, Endpoint};

const KEYRING_SERVICE: &str = "homeconnect";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{name}'")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// `Accept-Language` for translated names.
    pub language: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            language: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named account profile: one registered application on one endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// `production`, `simulator` or `china`.
    #[serde(default)]
    pub endpoint: Endpoint,

    /// `device-flow` or `authorization-code` (simulator only).
    #[serde(default)]
    pub flow: AuthFlow,

    /// Client id of the registered application.
    pub client_id: String,

    /// Client secret (plaintext; prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable name containing the client secret.
    pub client_secret_env: Option<String>,

    /// Scopes to request; defaults to the full control set.
    pub scopes: Option<Vec<String>>,

    /// Override the default language.
    pub language: Option<String>,

    /// Token store file; defaults to the platform data directory.
    pub token_store: Option<PathBuf>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Refresh the access token this many seconds before it expires.
    pub refresh_window: Option<u64>,

    /// Issue tracker page drift reports link to.
    pub issue_url: Option<String>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "homeconnect", "homeconnect")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("homeconnect");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the profile's tokens are persisted.
pub fn token_store_path(profile: &Profile) -> PathBuf {
    if let Some(ref path) = profile.token_store {
        return path.clone();
    }
    project_dirs().map_or_else(
        || dirs_fallback().join("tokens.json"),
        |dirs| dirs.data_dir().join("tokens.json"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, layered over defaults and under
/// `HOMECONNECT_*` environment overrides (`__` separates levels).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOMECONNECT_").split("__"));

    Ok(figment.extract()?)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Pick a profile by name, falling back to the configured default.
pub fn resolve_profile<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> Result<(String, &'a Profile), ConfigError> {
    let name = name
        .map(str::to_owned)
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into());
    config
        .profiles
        .get(&name)
        .map(|profile| (name.clone(), profile))
        .ok_or(ConfigError::ProfileNotFound { name })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Client secret ───────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/client-secret"))
}

/// Resolve the client secret: env var, then keyring, then plaintext.
/// Public clients have none.
pub fn resolve_client_secret(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's client_secret_env → env var lookup
    if let Some(ref env_name) = profile.client_secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile
        .client_secret
        .as_ref()
        .map(|secret| SecretString::from(secret.clone()))
}

/// Store the client secret in the system keyring.
pub fn store_client_secret(profile_name: &str, secret: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(secret)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Reject profiles that cannot work before any request is made.
pub fn validate_profile(profile: &Profile) -> Result<(), ConfigError> {
    if profile.client_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "client_id".into(),
            reason: "must be set to the client id of a registered application".into(),
        });
    }
    if profile.flow == AuthFlow::AuthorizationCode && !profile.endpoint.is_simulator() {
        return Err(ConfigError::Validation {
            field: "flow".into(),
            reason: "authorization-code is only supported by the simulator; use device-flow"
                .into(),
        });
    }
    if let Some(ref scopes) = profile.scopes {
        if scopes.is_empty() {
            return Err(ConfigError::Validation {
                field: "scopes".into(),
                reason: "must not be empty".into(),
            });
        }
    }
    Ok(())
}

/// Build a `ClientConfig` from a profile and the global defaults.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    validate_profile(profile)?;

    let mut auth = AuthConfig::new(profile.client_id.trim());
    auth.client_secret = resolve_client_secret(profile, profile_name);
    auth.flow = profile.flow;
    if let Some(ref scopes) = profile.scopes {
        auth.scopes.clone_from(scopes);
    }
    if let Some(secs) = profile.refresh_window {
        auth.refresh_window = Duration::from_secs(secs);
    }

    let mut config =
        ClientConfig::new(profile.endpoint, auth).map_err(|e| ConfigError::Validation {
            field: "endpoint".into(),
            reason: e.to_string(),
        })?;
    config.transport.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.transport.language = profile
        .language
        .clone()
        .or_else(|| defaults.language.clone());

    if let Some(ref raw) = profile.issue_url {
        config.reporter.issue_url = raw.parse().map_err(|_| ConfigError::Validation {
            field: "issue_url".into(),
            reason: format!("invalid URL: {raw}"),
        })?;
    }

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CLIENT_ID: &str = "0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF";

    fn profile() -> Profile {
        Profile {
            client_id: CLIENT_ID.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[defaults]
language = "de-DE"

[profiles.home]
endpoint = "simulator"
flow = "authorization-code"
client_id = "abc"
scopes = ["IdentifyAppliance", "Monitor"]
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let (name, home) = resolve_profile(&config, None).unwrap();

        assert_eq!(name, "home");
        assert_eq!(home.endpoint, Endpoint::Simulator);
        assert_eq!(home.flow, AuthFlow::AuthorizationCode);
        assert_eq!(config.defaults.language.as_deref(), Some("de-DE"));
        assert_eq!(config.defaults.timeout, 30);
        assert!(matches!(
            resolve_profile(&config, Some("work")),
            Err(ConfigError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert("default".into(), profile());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.profiles["default"].client_id, CLIENT_ID);
        assert_eq!(loaded.profiles["default"].endpoint, Endpoint::Production);
    }

    #[test]
    fn code_flow_requires_simulator() {
        let mut p = profile();
        p.flow = AuthFlow::AuthorizationCode;
        assert!(matches!(
            validate_profile(&p),
            Err(ConfigError::Validation { ref field, .. }) if field == "flow"
        ));

        p.endpoint = Endpoint::Simulator;
        assert!(validate_profile(&p).is_ok());
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let p = Profile::default();
        assert!(validate_profile(&p).is_err());
    }

    #[test]
    fn translates_profile_to_client_config() {
        let mut p = profile();
        p.endpoint = Endpoint::Simulator;
        p.client_secret = Some("plain".into());
        p.scopes = Some(vec!["Monitor".into()]);
        p.timeout = Some(5);
        p.refresh_window = Some(600);
        p.issue_url = Some("https://example.test/issues/new".into());

        let config = profile_to_client_config(&p, "test-profile-without-keyring", &Defaults::default())
            .unwrap();

        assert_eq!(config.auth.client_id, CLIENT_ID);
        assert!(config.auth.client_secret.is_some());
        assert_eq!(config.auth.scopes, vec!["Monitor".to_owned()]);
        assert_eq!(config.auth.refresh_window, Duration::from_secs(600));
        assert_eq!(config.transport.timeout, Duration::from_secs(5));
        assert_eq!(
            config.transport.base_url.as_str(),
            "https://simulator.home-connect.com/"
        );
        assert_eq!(
            config.reporter.issue_url.as_str(),
            "https://example.test/issues/new"
        );
    }

    #[test]
    fn env_secret_wins_over_plaintext() {
        let mut p = profile();
        p.client_secret_env = Some("PATH".into());
        p.client_secret = Some("plain".into());
        let secret = resolve_client_secret(&p, "test-profile-without-keyring").unwrap();
        assert_eq!(
            secrecy::ExposeSecret::expose_secret(&secret),
            std::env::var("PATH").unwrap()
        );
    }
}
