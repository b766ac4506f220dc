use thiserror::Error;

/// Top-level error type for the `dssync-api` crate.
///
/// Covers every failure mode of the server JSON API: authentication,
/// transport, command rejection, and payload decoding.
/// `dssync-core` maps these into connection-state transitions and
/// user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed (wrong credentials, unknown or disabled application token).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The session token was rejected (HTTP 401/403 on an authenticated call).
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// An authenticated call was attempted without any session token.
    #[error("Not logged in")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status that is neither an auth rejection nor a timeout.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Remote ──────────────────────────────────────────────────────
    /// The server answered `{"ok": false}` -- the command itself was refused.
    #[error("Rejected by server: {message}")]
    Rejected { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::NotLoggedIn)
    }

    /// Returns `true` if the server refused the credentials or token outright.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the server refused the command (distinct from
    /// a connectivity failure).
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expired_is_auth_expired() {
        assert!(Error::SessionExpired.is_auth_expired());
        assert!(Error::NotLoggedIn.is_auth_expired());
        assert!(!Error::Rejected { message: "x".into() }.is_auth_expired());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Http {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        let err = Error::Http {
            status: 404,
            message: "missing".into(),
        };
        assert!(!err.is_transient());
    }
}
