//! Daemon error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use dssync_config::ConfigError;
use dssync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    #[error("No profile named '{profile}' in {path}")]
    #[diagnostic(
        code(dssync::unknown_profile),
        help("Add a [profiles.{profile}] table with at least `url` and a token or credentials.")
    )]
    UnknownProfile { profile: String, path: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(dssync::no_credentials),
        help(
            "Set `app_token` (or `token_env`) in the profile, store one in the keyring under\n\
             dssync/{profile}/app-token, or provide `username` and `password` once so a\n\
             token can be generated."
        )
    )]
    NoCredentials { profile: String },

    #[error("Invalid configuration")]
    #[diagnostic(code(dssync::config))]
    Config(#[source] ConfigError),

    #[error("Engine error")]
    #[diagnostic(code(dssync::engine))]
    Engine(#[from] CoreError),

    #[error("Could not access state file {path}")]
    #[diagnostic(code(dssync::state_file))]
    StateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    pub fn from_config(err: ConfigError, path: &str) -> Self {
        match err {
            ConfigError::UnknownProfile { profile } => Self::UnknownProfile {
                profile,
                path: path.to_owned(),
            },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            other => Self::Config(other),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownProfile { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Engine(_) | Self::StateFile { .. } => exit_code::GENERAL,
        }
    }
}
