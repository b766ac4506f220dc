// Session authentication
//
// Token-based login: either an application token (preferred, long-lived,
// must have been enabled once by a user session) or username/password.
// Both flows yield a short-lived session token that the client stores and
// appends to every subsequent request.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::client::{DssClient, decode};
use crate::error::Error;

#[derive(Deserialize)]
struct TokenResult {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationTokenResult {
    application_token: String,
}

#[derive(Deserialize)]
struct TimeResult {
    #[serde(default)]
    time: Option<i64>,
}

impl DssClient {
    /// Exchange an application token for a session token.
    ///
    /// On success the session token is stored and used for all
    /// subsequent requests.
    pub async fn login_application(&self, app_token: &SecretString) -> Result<(), Error> {
        debug!("logging in with application token");
        let value = self
            .call_anonymous(
                "system/loginApplication",
                &[("loginToken", app_token.expose_secret().to_owned())],
            )
            .await?;
        let result: TokenResult = decode(value)?;
        self.set_session(SecretString::from(result.token));
        debug!("application login successful");
        Ok(())
    }

    /// Authenticate with username and password.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), Error> {
        debug!(user = username, "logging in with credentials");
        let value = self
            .call_anonymous(
                "system/login",
                &[
                    ("user", username.to_owned()),
                    ("password", password.expose_secret().to_owned()),
                ],
            )
            .await?;
        let result: TokenResult = decode(value)?;
        self.set_session(SecretString::from(result.token));
        debug!("credential login successful");
        Ok(())
    }

    /// Request a new application token for `application_name`.
    ///
    /// The returned token is inert until [`enable_token`](Self::enable_token)
    /// is called from a user-authenticated session.
    pub async fn request_application_token(
        &self,
        application_name: &str,
    ) -> Result<SecretString, Error> {
        let value = self
            .call_anonymous(
                "system/requestApplicationToken",
                &[("applicationName", application_name.to_owned())],
            )
            .await?;
        let result: ApplicationTokenResult = decode(value)?;
        Ok(SecretString::from(result.application_token))
    }

    /// Enable an application token using the current (credential) session.
    pub async fn enable_token(&self, app_token: &SecretString) -> Result<(), Error> {
        self.command(
            "system/enableToken",
            &[("applicationToken", app_token.expose_secret().to_owned())],
        )
        .await
    }

    /// End the current session and forget the token.
    pub async fn logout(&self) -> Result<(), Error> {
        if !self.has_session() {
            return Ok(());
        }
        let result = self.command("system/logout", &[]).await;
        self.clear_session();
        debug!("logout complete");
        result
    }

    /// Cheap authenticated call used as the connectivity gate.
    ///
    /// Returns the server time (seconds since epoch) when the server
    /// reports one.
    pub async fn server_time(&self) -> Result<Option<i64>, Error> {
        let result: TimeResult = self.call_typed("system/time", &[]).await?;
        Ok(result.time)
    }
}
