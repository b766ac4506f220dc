// ── Core error types ──
//
// User-facing errors from dssync-core. Consumers never see raw HTTP
// statuses or JSON failures; the `From<dssync_api::Error>` impl folds
// transport errors into connectivity variants that the connection
// manager can classify into a `LostReason`.

use std::fmt;

use strum::Display;
use thiserror::Error;

/// Why authentication could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AuthFailure {
    /// The application token was unknown, disabled, or revoked.
    WrongToken,
    /// Username/password were refused.
    WrongCredentials,
    /// No token and no credentials are available.
    NoCredentials,
}

/// Why the connection to the server is considered lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LostReason {
    Timeout,
    HostUnreachable,
    MalformedAddress,
    /// The server dropped the session and a renewed one was refused too.
    /// Retried by the next connection check.
    SessionLost,
    /// Login itself failed. Stays until the credentials change.
    Unauthenticated(AuthFailure),
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::HostUnreachable => f.write_str("host-unreachable"),
            Self::MalformedAddress => f.write_str("malformed-address"),
            Self::SessionLost => f.write_str("session-lost"),
            Self::Unauthenticated(why) => write!(f, "unauthenticated ({why})"),
        }
    }
}

impl LostReason {
    /// Classify an API error as a connectivity failure, if it is one.
    ///
    /// Remote rejections and decode failures are not connectivity
    /// problems and yield `None`.
    pub fn classify(err: &dssync_api::Error) -> Option<Self> {
        use dssync_api::Error as ApiError;
        match err {
            ApiError::Timeout { .. } => Some(Self::Timeout),
            ApiError::Transport(e) if e.is_timeout() => Some(Self::Timeout),
            ApiError::Transport(e) if e.is_builder() => Some(Self::MalformedAddress),
            ApiError::Transport(_) => Some(Self::HostUnreachable),
            ApiError::InvalidUrl(_) => Some(Self::MalformedAddress),
            ApiError::Http { status, .. } if *status >= 500 => Some(Self::HostUnreachable),
            ApiError::SessionExpired | ApiError::NotLoggedIn => Some(Self::SessionLost),
            ApiError::Authentication { .. }
            | ApiError::Tls(_)
            | ApiError::Http { .. }
            | ApiError::Rejected { .. }
            | ApiError::Deserialization { .. } => None,
        }
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: LostReason },

    #[error("Not connected to the server")]
    NotConnected,

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Server request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {dsid}")]
    DeviceNotFound { dsid: String },

    #[error("Scene not found: {scene}")]
    SceneNotFound { scene: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Command rejected by server: {message}")]
    Rejected { message: String },

    #[error("Unsupported command for {dsid}: {message}")]
    Unsupported { dsid: String, message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Connectivity classification of this error, if it is one.
    pub fn connection_lost_reason(&self) -> Option<LostReason> {
        match self {
            Self::ConnectionLost { reason } => Some(*reason),
            Self::Timeout { .. } => Some(LostReason::Timeout),
            Self::ConnectionFailed { .. } => Some(LostReason::HostUnreachable),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<dssync_api::Error> for CoreError {
    fn from(err: dssync_api::Error) -> Self {
        use dssync_api::Error as ApiError;
        if let Some(reason) = LostReason::classify(&err) {
            return match (reason, err) {
                (LostReason::Timeout, ApiError::Timeout { timeout_secs }) => {
                    CoreError::Timeout { timeout_secs }
                }
                (LostReason::HostUnreachable, ApiError::Transport(e)) => {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                }
                (reason, _) => CoreError::ConnectionLost { reason },
            };
        }
        match err {
            ApiError::Authentication { message } => CoreError::AuthenticationFailed { message },
            ApiError::Rejected { message } => CoreError::Rejected { message },
            ApiError::Tls(message) => CoreError::Config {
                message: format!("TLS: {message}"),
            },
            ApiError::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            other => CoreError::Api {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_timeout_reason() {
        let err = CoreError::from(dssync_api::Error::Timeout { timeout_secs: 30 });
        assert!(matches!(err, CoreError::Timeout { timeout_secs: 30 }));
        assert_eq!(err.connection_lost_reason(), Some(LostReason::Timeout));
    }

    #[test]
    fn rejection_is_not_connectivity() {
        let api = dssync_api::Error::Rejected {
            message: "no such device".into(),
        };
        assert_eq!(LostReason::classify(&api), None);
        let err = CoreError::from(api);
        assert!(matches!(err, CoreError::Rejected { .. }));
        assert_eq!(err.connection_lost_reason(), None);
    }

    #[test]
    fn server_error_counts_as_unreachable() {
        let api = dssync_api::Error::Http {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(LostReason::classify(&api), Some(LostReason::HostUnreachable));
    }

    #[test]
    fn dropped_session_is_retryable() {
        for api in [dssync_api::Error::SessionExpired, dssync_api::Error::NotLoggedIn] {
            assert_eq!(LostReason::classify(&api), Some(LostReason::SessionLost));
        }
    }

    #[test]
    fn lost_reason_display() {
        assert_eq!(LostReason::HostUnreachable.to_string(), "host-unreachable");
        assert_eq!(
            LostReason::Unauthenticated(AuthFailure::NoCredentials).to_string(),
            "unauthenticated (no-credentials)"
        );
    }
}
