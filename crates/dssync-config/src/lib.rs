//! Profile configuration for the dssync daemon.
//!
//! TOML profiles merged with `DSSYNC_*` environment variables, credential
//! resolution (env + keyring + plaintext), persistence of freshly minted
//! application tokens, and translation to `dssync_core::EngineConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dssync_core::{AuthCredentials, EngineConfig, RefreshPriority, SensorPriorities, TlsVerification};

const KEYRING_SERVICE: &str = "dssync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
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

impl Config {
    /// Look up a profile, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name.to_owned(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Settings shared by every profile. Durations use humantime syntax
/// (`"30s"`, `"5m"`).
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default = "default_polling_interval")]
    pub polling_interval: String,

    #[serde(default = "default_sensor_refresh")]
    pub sensor_refresh_interval: String,

    #[serde(default = "default_trash_days")]
    pub trash_grace_days: u32,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_true")]
    pub event_feed: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            polling_interval: default_polling_interval(),
            sensor_refresh_interval: default_sensor_refresh(),
            trash_grace_days: default_trash_days(),
            insecure: false,
            event_feed: true,
        }
    }
}

fn default_timeout() -> String {
    "30s".into()
}
fn default_polling_interval() -> String {
    "10s".into()
}
fn default_sensor_refresh() -> String {
    "5m".into()
}
fn default_trash_days() -> u32 {
    7
}
fn default_true() -> bool {
    true
}

/// A named server profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g. "https://dss.local:8080").
    pub url: String,

    /// Application token (plaintext, prefer keyring or env var).
    pub app_token: Option<String>,

    /// Environment variable name containing the application token.
    pub token_env: Option<String>,

    /// Username used once to mint an application token.
    pub username: Option<String>,

    /// Password (plaintext, prefer keyring).
    pub password: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the default `insecure` setting.
    pub insecure: Option<bool>,

    pub timeout: Option<String>,
    pub polling_interval: Option<String>,
    pub sensor_refresh_interval: Option<String>,
    pub trash_grace_days: Option<u32>,
    pub event_feed: Option<bool>,

    #[serde(default)]
    pub priorities: Priorities,
}

/// Background refresh priorities: `never`, `low`, `medium`, `high` or a
/// number (lower runs first).
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Priorities {
    pub active_power: Option<String>,
    pub output_current: Option<String>,
    pub electric_meter: Option<String>,
    /// Every other sensor type.
    pub other_sensors: Option<String>,
    pub metering: Option<String>,
    pub scene_config: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "dssync", "dssync").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("dssync");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load the config from the canonical path merged with the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` merged with `DSSYNC_*` environment
/// variables. Nested keys use a double underscore
/// (`DSSYNC_DEFAULTS__POLLING_INTERVAL=30s`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DSSYNC_").split("__"))
        .extract()?;
    Ok(config)
}

/// Serialize the config to TOML at `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str, key: &str) -> Option<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{key}")).ok()
}

/// Application token: `token_env` variable, then keyring, then plaintext.
pub fn resolve_app_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Some(val) = profile
        .token_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Some(SecretString::from(val));
    }
    if let Some(secret) = keyring_entry(profile_name, "app-token").and_then(|e| e.get_password().ok()) {
        return Some(SecretString::from(secret));
    }
    profile.app_token.clone().map(SecretString::from)
}

/// Username and password: `DSSYNC_USERNAME`/`DSSYNC_PASSWORD`, then keyring,
/// then plaintext. `None` unless both halves resolve.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Option<(String, SecretString)> {
    let username = std::env::var("DSSYNC_USERNAME")
        .ok()
        .or_else(|| profile.username.clone())?;

    let password = std::env::var("DSSYNC_PASSWORD")
        .ok()
        .or_else(|| keyring_entry(profile_name, "password").and_then(|e| e.get_password().ok()))
        .or_else(|| profile.password.clone())?;

    Some((username, SecretString::from(password)))
}

/// Combine the resolved token and credentials into `AuthCredentials`.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<AuthCredentials, ConfigError> {
    match (
        resolve_app_token(profile, profile_name),
        resolve_credentials(profile, profile_name),
    ) {
        (Some(token), Some((username, password))) => Ok(AuthCredentials::TokenWithFallback {
            token,
            username,
            password,
        }),
        (Some(token), None) => Ok(AuthCredentials::ApplicationToken(token)),
        (None, Some((username, password))) => {
            Ok(AuthCredentials::Credentials { username, password })
        }
        (None, None) => Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
        }),
    }
}

/// Where a minted application token ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStorage {
    Keyring,
    /// Written into the profile; username and password were removed.
    ConfigFile,
}

/// Persist a newly minted application token for `profile_name`.
///
/// Prefers the OS keyring. Without one, the token is written into the
/// profile at `path` and the plaintext credentials are dropped from it.
pub fn store_application_token(
    cfg: &mut Config,
    path: &Path,
    profile_name: &str,
    token: &SecretString,
) -> Result<TokenStorage, ConfigError> {
    if let Some(entry) = keyring_entry(profile_name, "app-token") {
        if entry.set_password(token.expose_secret()).is_ok() {
            return Ok(TokenStorage::Keyring);
        }
    }

    let profile = cfg
        .profiles
        .get_mut(profile_name)
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: profile_name.into(),
        })?;
    profile.app_token = Some(token.expose_secret().to_owned());
    profile.username = None;
    profile.password = None;
    save_config_to(cfg, path)?;
    Ok(TokenStorage::ConfigFile)
}

// ── Translation to EngineConfig ─────────────────────────────────────

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| invalid(field, format!("'{raw}': {e}")))
}

fn parse_priority(
    field: &str,
    raw: Option<&str>,
    fallback: RefreshPriority,
) -> Result<RefreshPriority, ConfigError> {
    raw.map_or(Ok(fallback), |raw| {
        raw.parse()
            .map_err(|reason: String| invalid(field, reason))
    })
}

fn sensor_priorities(p: &Priorities) -> Result<SensorPriorities, ConfigError> {
    let base = SensorPriorities::default();
    Ok(SensorPriorities {
        active_power: parse_priority(
            "priorities.active_power",
            p.active_power.as_deref(),
            base.active_power,
        )?,
        output_current: parse_priority(
            "priorities.output_current",
            p.output_current.as_deref(),
            base.output_current,
        )?,
        electric_meter: parse_priority(
            "priorities.electric_meter",
            p.electric_meter.as_deref(),
            base.electric_meter,
        )?,
        other: parse_priority("priorities.other_sensors", p.other_sensors.as_deref(), base.other)?,
    })
}

/// Build an `EngineConfig` from a profile and the shared defaults.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let url: url::Url = profile
        .url
        .parse()
        .map_err(|e| invalid("url", format!("'{}': {e}", profile.url)))?;

    let auth = resolve_auth(profile, profile_name)?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ca_path) = &profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let base = EngineConfig::new(url, auth);

    Ok(EngineConfig {
        tls,
        timeout: parse_duration(
            "timeout",
            profile.timeout.as_deref().unwrap_or(&defaults.timeout),
        )?,
        polling_interval: parse_duration(
            "polling_interval",
            profile
                .polling_interval
                .as_deref()
                .unwrap_or(&defaults.polling_interval),
        )?,
        sensor_refresh_interval: parse_duration(
            "sensor_refresh_interval",
            profile
                .sensor_refresh_interval
                .as_deref()
                .unwrap_or(&defaults.sensor_refresh_interval),
        )?,
        trash_grace_days: profile.trash_grace_days.unwrap_or(defaults.trash_grace_days),
        sensor_priorities: sensor_priorities(&profile.priorities)?,
        metering_priority: parse_priority(
            "priorities.metering",
            profile.priorities.metering.as_deref(),
            base.metering_priority,
        )?,
        scene_config_priority: parse_priority(
            "priorities.scene_config",
            profile.priorities.scene_config.as_deref(),
            base.scene_config_priority,
        )?,
        event_feed_enabled: profile.event_feed.unwrap_or(defaults.event_feed),
        ..base
    })
}
