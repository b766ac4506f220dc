// Server JSON API HTTP client
//
// Wraps `reqwest::Client` with URL construction, session-token injection,
// and `{ ok, result, message }` envelope unwrapping. Endpoint groups
// (auth, apartment, device, zone, metering, events) are implemented as
// inherent methods in separate files to keep this module focused on
// transport mechanics.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Query parameter list passed to the request helpers.
pub(crate) type Query<'a> = &'a [(&'a str, String)];

/// Every response is wrapped as `{"ok": bool, "result": ..., "message": ...}`.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Raw HTTP client for the server JSON API.
///
/// Holds the current session token and appends it to every authenticated
/// request. All methods return the unwrapped `result` payload -- the
/// envelope is stripped before the caller sees it.
pub struct DssClient {
    http: reqwest::Client,
    base_url: Url,
    /// Session token minted by one of the login calls. Swapped atomically
    /// so the event feed and the reconciliation tick can share one client.
    session: ArcSwapOption<SecretString>,
    timeout: Duration,
    long_poll_grace: Duration,
}

impl DssClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the server root (e.g. `https://dss.local:8080`);
    /// `/json/` is appended per request.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            session: ArcSwapOption::empty(),
            timeout: transport.timeout,
            long_poll_grace: transport.long_poll_grace,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        let defaults = TransportConfig::default();
        Self {
            http,
            base_url,
            session: ArcSwapOption::empty(),
            timeout: defaults.timeout,
            long_poll_grace: defaults.long_poll_grace,
        }
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Session token management ──────────────────────────────────────

    /// Whether a session token is currently held.
    pub fn has_session(&self) -> bool {
        self.session.load().is_some()
    }

    /// Replace the session token (captured from a login response).
    pub fn set_session(&self, token: SecretString) {
        debug!("storing session token");
        self.session.store(Some(Arc::new(token)));
    }

    /// Drop the session token so the next call fails with `NotLoggedIn`.
    pub fn clear_session(&self) {
        self.session.store(None);
    }

    /// The session token currently held, for a later
    /// [`clear_session_if`](Self::clear_session_if).
    pub fn session(&self) -> Option<Arc<SecretString>> {
        self.session.load_full()
    }

    /// Drop the session only if it is still `stale`. Returns `false` when
    /// another login replaced it in the meantime.
    pub fn clear_session_if(&self, stale: Option<&Arc<SecretString>>) -> bool {
        let expected = stale.map_or(std::ptr::null(), Arc::as_ptr);
        let previous = self.session.compare_and_swap(expected, None);
        previous.as_ref().map_or(std::ptr::null(), Arc::as_ptr) == expected
    }

    pub(crate) fn session_token(&self) -> Result<String, Error> {
        self.session
            .load()
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
            .ok_or(Error::NotLoggedIn)
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for a JSON API path: `{base}/json/{path}`.
    pub(crate) fn json_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/json/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send an authenticated GET and return the unwrapped `result`.
    pub(crate) async fn call(
        &self,
        path: &str,
        query: Query<'_>,
    ) -> Result<serde_json::Value, Error> {
        let token = self.session_token()?;
        self.send(path, query, Some(token), None).await
    }

    /// Authenticated GET with an explicit per-request timeout (long polls).
    pub(crate) async fn call_with_timeout(
        &self,
        path: &str,
        query: Query<'_>,
        poll_timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        let token = self.session_token()?;
        let timeout = poll_timeout + self.long_poll_grace;
        self.send(path, query, Some(token), Some(timeout)).await
    }

    /// Authenticated GET whose `result` is decoded into `T`.
    pub(crate) async fn call_typed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Query<'_>,
    ) -> Result<T, Error> {
        let value = self.call(path, query).await?;
        decode(value)
    }

    /// Authenticated GET whose payload is irrelevant (imperative commands).
    pub(crate) async fn command(&self, path: &str, query: Query<'_>) -> Result<(), Error> {
        self.call(path, query).await.map(|_| ())
    }

    /// Unauthenticated GET (login endpoints).
    pub(crate) async fn call_anonymous(
        &self,
        path: &str,
        query: Query<'_>,
    ) -> Result<serde_json::Value, Error> {
        self.send(path, query, None, None).await
    }

    async fn send(
        &self,
        path: &str,
        query: Query<'_>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, Error> {
        let url = self.json_url(path)?;
        debug!("GET {}", url);

        let authenticated = token.is_some();
        let mut builder = self.http.get(url).query(query);
        if let Some(token) = token {
            builder = builder.query(&[("token", token)]);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: timeout.unwrap_or(self.timeout).as_secs(),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        parse_envelope(resp, authenticated).await
    }
}

/// Parse the `{ ok, result, message }` envelope, returning `result` on
/// success.
///
/// HTTP 401/403 on an authenticated call means the session token was
/// rejected; on a login call it means the credentials were.
async fn parse_envelope(
    resp: reqwest::Response,
    authenticated: bool,
) -> Result<serde_json::Value, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(if authenticated {
            Error::SessionExpired
        } else {
            Error::Authentication {
                message: format!("login rejected (HTTP {status})"),
            }
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            message: preview(&body).to_owned(),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;
    trace!(body = preview(&body), "response body");

    let envelope: Envelope = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body: body.clone(),
    })?;

    if envelope.ok {
        return Ok(envelope.result.unwrap_or(serde_json::Value::Null));
    }

    let message = envelope.message.unwrap_or_default();
    if authenticated && message.to_ascii_lowercase().contains("not logged in") {
        return Err(Error::SessionExpired);
    }
    if authenticated {
        Err(Error::Rejected { message })
    } else {
        Err(Error::Authentication { message })
    }
}

/// Decode an unwrapped `result` payload into a typed value.
pub(crate) fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: value.to_string(),
    })
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
