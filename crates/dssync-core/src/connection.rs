// ── Connection/session manager ──
//
// Owns the session lifecycle and the connectivity gate. Every remote
// call of the engine goes through `call`, which refuses to run while
// disconnected, re-authenticates once when the session is rejected, and
// turns connectivity failures into `Lost` state transitions. Only the
// time check in `check_connection` talks to the server while disconnected.

use std::future::Future;
use std::sync::{Arc, Mutex};

use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use dssync_api::transport::{TlsMode, TransportConfig};
use dssync_api::{DssClient, Error as ApiError};

use crate::config::{AuthCredentials, EngineConfig, TlsVerification};
use crate::error::{AuthFailure, CoreError, LostReason};
use crate::listener::EngineListener;

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session yet (or after a clean stop).
    Disconnected,
    Connected,
    Lost(LostReason),
}

/// Connection notifications delivered to the host.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Lost(LostReason),
    Resumed,
    /// A new application token was minted from credentials. The host
    /// should persist it; the credentials have been discarded.
    TokenGenerated(SecretString),
}

#[derive(Default)]
struct AuthState {
    app_token: Option<SecretString>,
    credentials: Option<(String, SecretString)>,
}

impl From<AuthCredentials> for AuthState {
    fn from(auth: AuthCredentials) -> Self {
        match auth {
            AuthCredentials::ApplicationToken(token) => Self {
                app_token: Some(token),
                credentials: None,
            },
            AuthCredentials::Credentials { username, password } => Self {
                app_token: None,
                credentials: Some((username, password)),
            },
            AuthCredentials::TokenWithFallback {
                token,
                username,
                password,
            } => Self {
                app_token: Some(token),
                credentials: Some((username, password)),
            },
            AuthCredentials::None => Self::default(),
        }
    }
}

pub struct ConnectionManager {
    client: DssClient,
    auth: Mutex<AuthState>,
    state: watch::Sender<ConnectionState>,
    application_name: String,
    listener: Arc<dyn EngineListener>,
    /// Serializes login attempts from the tick and the event feed.
    auth_lock: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    /// Build the manager and its HTTP client. Fails only on bad static
    /// configuration (e.g. an unreadable CA file).
    pub fn new(config: &EngineConfig, listener: Arc<dyn EngineListener>) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_mode(&config.tls),
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let client = DssClient::new(config.url.clone(), &transport).map_err(|e| {
            CoreError::Config {
                message: format!("cannot build HTTP client: {e}"),
            }
        })?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            client,
            auth: Mutex::new(AuthState::from(config.auth.clone())),
            state,
            application_name: config.application_name.clone(),
            listener,
            auth_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn client(&self) -> &DssClient {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The application token currently in use, if any.
    pub fn application_token(&self) -> Option<SecretString> {
        self.auth.lock().expect("auth lock poisoned").app_token.clone()
    }

    /// Replace the credentials, e.g. after the operator fixed a rejected
    /// token. Clears an authentication failure so the next check retries.
    pub fn update_credentials(&self, auth: AuthCredentials) {
        *self.auth.lock().expect("auth lock poisoned") = AuthState::from(auth);
        self.client.clear_session();
        if matches!(
            self.state(),
            ConnectionState::Lost(LostReason::Unauthenticated(_))
        ) {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }

    // ── Connectivity gate ────────────────────────────────────────────

    /// Check the server is reachable, logging in first if there is no session.
    ///
    /// Returns `true` when remote calls may proceed. After an
    /// authentication failure this stays `false` without contacting the
    /// server until [`update_credentials`](Self::update_credentials).
    pub async fn check_connection(&self) -> bool {
        if self.needs_operator() {
            debug!("authentication failed earlier, waiting for new credentials");
            return false;
        }
        if !self.client.has_session() {
            return self.authenticate().await.is_ok();
        }
        let session = self.client.session();
        match self.client.server_time().await {
            Ok(_) => {
                self.mark_connected();
                true
            }
            Err(e) if e.is_auth_expired() => {
                debug!("session rejected by time check, re-authenticating");
                self.renew_session(session.as_ref()).await.is_ok()
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    /// Run one remote operation through the gate.
    ///
    /// A rejected session triggers one re-authentication and one retry.
    /// Connectivity failures mark the connection lost; remote rejections
    /// leave the state untouched.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        let session = self.client.session();
        match op().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_auth_expired() => {
                debug!("session expired, re-authenticating");
                self.renew_session(session.as_ref())
                    .await
                    .map_err(|reason| CoreError::ConnectionLost { reason })?;
                op().await.map_err(|e| self.fail(e))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Log in with the application token, minting one from credentials
    /// when the token is missing or rejected.
    pub async fn authenticate(&self) -> Result<(), LostReason> {
        let _guard = self.auth_lock.lock().await;
        // Another task may have logged in while we waited.
        if self.client.has_session() && self.is_connected() {
            return Ok(());
        }
        self.login_and_mark().await
    }

    /// Replace the session `stale` the server refused. When another task
    /// already replaced it, the fresh session is kept and no login runs.
    async fn renew_session(&self, stale: Option<&Arc<SecretString>>) -> Result<(), LostReason> {
        let _guard = self.auth_lock.lock().await;
        if !self.client.clear_session_if(stale) {
            if let ConnectionState::Lost(reason) = self.state() {
                return Err(reason);
            }
            debug!("session already renewed by another task");
            return Ok(());
        }
        self.login_and_mark().await
    }

    /// Log in and publish the outcome. Callers hold `auth_lock`.
    async fn login_and_mark(&self) -> Result<(), LostReason> {
        let (token, credentials) = {
            let auth = self.auth.lock().expect("auth lock poisoned");
            (auth.app_token.clone(), auth.credentials.clone())
        };

        match self.login(token, credentials).await {
            Ok(()) => {
                self.mark_connected();
                Ok(())
            }
            Err(reason) => {
                self.mark_lost(reason);
                Err(reason)
            }
        }
    }

    /// End the session. The connection state returns to `Disconnected`.
    pub async fn logout(&self) {
        if let Err(e) = self.client.logout().await {
            debug!(error = %e, "logout failed (non-fatal)");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn login(
        &self,
        token: Option<SecretString>,
        credentials: Option<(String, SecretString)>,
    ) -> Result<(), LostReason> {
        if let Some(token) = &token {
            match self.client.login_application(token).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_auth_rejected() => {
                    warn!("application token rejected");
                }
                Err(e) => return Err(auth_failure(&e, AuthFailure::WrongToken)),
            }
        }

        let Some((username, password)) = credentials else {
            let failure = if token.is_some() {
                AuthFailure::WrongToken
            } else {
                AuthFailure::NoCredentials
            };
            return Err(LostReason::Unauthenticated(failure));
        };

        let new_token = self.mint_token(&username, &password).await?;
        {
            let mut auth = self.auth.lock().expect("auth lock poisoned");
            auth.app_token = Some(new_token.clone());
            auth.credentials = None;
        }
        info!(application = %self.application_name, "generated application token");
        self.emit(&ConnectionEvent::TokenGenerated(new_token));
        Ok(())
    }

    /// Request, enable and log in with a fresh application token.
    async fn mint_token(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<SecretString, LostReason> {
        let token = self
            .client
            .request_application_token(&self.application_name)
            .await
            .map_err(|e| auth_failure(&e, AuthFailure::WrongCredentials))?;
        self.client
            .login(username, password)
            .await
            .map_err(|e| auth_failure(&e, AuthFailure::WrongCredentials))?;
        self.client
            .enable_token(&token)
            .await
            .map_err(|e| auth_failure(&e, AuthFailure::WrongCredentials))?;
        // Switch from the user session to the application session.
        if let Err(e) = self.client.logout().await {
            debug!(error = %e, "user session logout failed");
        }
        self.client
            .login_application(&token)
            .await
            .map_err(|e| auth_failure(&e, AuthFailure::WrongToken))?;
        Ok(token)
    }

    fn needs_operator(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Lost(LostReason::Unauthenticated(_))
        )
    }

    /// Record a failed call. An authentication failure is kept until the
    /// credentials change.
    fn fail(&self, err: ApiError) -> CoreError {
        if let Some(reason) = LostReason::classify(&err) {
            if !self.needs_operator() {
                self.mark_lost(reason);
            }
        }
        CoreError::from(err)
    }

    fn mark_connected(&self) {
        match self.state.send_replace(ConnectionState::Connected) {
            ConnectionState::Lost(reason) => {
                info!(previous = %reason, "connection resumed");
                self.emit(&ConnectionEvent::Resumed);
            }
            ConnectionState::Disconnected => info!("connected to server"),
            ConnectionState::Connected => {}
        }
    }

    pub(crate) fn mark_lost(&self, reason: LostReason) {
        let previous = self.state.send_replace(ConnectionState::Lost(reason));
        if previous != ConnectionState::Lost(reason) {
            warn!(%reason, "connection lost");
            self.emit(&ConnectionEvent::Lost(reason));
        }
    }

    fn emit(&self, event: &ConnectionEvent) {
        self.listener.on_connection_event(event);
    }
}

/// Map a failure during login to a lost reason, attributing outright
/// rejections to `failure`.
fn auth_failure(err: &ApiError, failure: AuthFailure) -> LostReason {
    match LostReason::classify(err) {
        Some(reason @ (LostReason::Timeout
        | LostReason::HostUnreachable
        | LostReason::MalformedAddress)) => reason,
        _ => LostReason::Unauthenticated(failure),
    }
}

fn tls_mode(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::listener::NoopListener;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager(server: &MockServer) -> ConnectionManager {
        let config = EngineConfig::new(
            server.uri().parse().unwrap(),
            AuthCredentials::ApplicationToken(SecretString::from("app-token".to_owned())),
        );
        ConnectionManager::new(&config, Arc::new(NoopListener)).unwrap()
    }

    fn session_granted() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": { "token": "s" } }))
    }

    #[tokio::test]
    async fn concurrent_renewal_keeps_the_fresh_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/system/loginApplication"))
            .respond_with(session_granted())
            .expect(2)
            .mount(&server)
            .await;
        let manager = manager(&server).await;
        manager.authenticate().await.unwrap();
        let stale = manager.client().session();

        // First task renews; the second one saw the same stale session.
        manager.renew_session(stale.as_ref()).await.unwrap();
        let fresh = manager.client().session();
        manager.renew_session(stale.as_ref()).await.unwrap();

        assert!(manager.is_connected());
        assert!(Arc::ptr_eq(
            manager.client().session().as_ref().unwrap(),
            fresh.as_ref().unwrap()
        ));
    }

    #[tokio::test]
    async fn refused_retry_is_not_an_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/system/loginApplication"))
            .respond_with(session_granted())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/json/apartment/getDevices"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        let manager = manager(&server).await;
        manager.authenticate().await.unwrap();

        let client = manager.client();
        let result = manager.call(|| client.get_devices()).await;

        assert!(matches!(
            result,
            Err(CoreError::ConnectionLost {
                reason: LostReason::SessionLost
            })
        ));
        assert_eq!(manager.state(), ConnectionState::Lost(LostReason::SessionLost));
        assert!(!manager.needs_operator());
    }

    #[test]
    fn login_rejection_maps_to_given_failure() {
        let err = ApiError::Authentication {
            message: "bad".into(),
        };
        assert_eq!(
            auth_failure(&err, AuthFailure::WrongCredentials),
            LostReason::Unauthenticated(AuthFailure::WrongCredentials)
        );
    }

    #[test]
    fn login_timeout_stays_connectivity() {
        let err = ApiError::Timeout { timeout_secs: 5 };
        assert_eq!(
            auth_failure(&err, AuthFailure::WrongToken),
            LostReason::Timeout
        );
    }
}
