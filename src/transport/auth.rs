//! Auth Gate
//!
//! Acquires the session token and wraps every client call so that an
//! expired session is refreshed and the call retried exactly once.

use crate::error::{Error, Result};
use crate::transport::http::{Accept, RestResponse, RestTransport, TOKEN_HEADER};
use reqwest::header::SET_COOKIE;
use reqwest::Method;
use std::future::Future;
use tracing::{debug, info, warn};

/// Credentials plus the transport they authenticate
#[derive(Clone)]
pub struct AuthGate {
    transport: RestTransport,
    username: String,
    password: String,
}

impl AuthGate {
    pub fn new(transport: RestTransport, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            transport,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn transport(&self) -> &RestTransport {
        &self.transport
    }

    /// Log in with basic authentication and persist the returned token
    pub async fn authenticate(&self) -> Result<String> {
        self.transport.metrics().logins.inc();
        info!("Authenticating to {} as {}", self.transport.base_url(), self.username);

        let response = self.transport.login(&self.username, &self.password).await?;
        let token = extract_token(&response)
            .ok_or_else(|| Error::Unauthenticated("login response carried no token".into()))?;

        self.transport.session().store(token.clone()).await?;
        debug!("Session token acquired");
        Ok(token)
    }

    /// Log in unless the session already holds a token believed valid
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if !self.transport.session().is_authenticated() {
            self.authenticate().await?;
        }
        Ok(())
    }

    /// Run `op` with a valid session, re-authenticating and retrying once
    /// when the controller rejects the token.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_authenticated().await?;

        match op().await {
            Err(e) if e.triggers_reauth() => {
                warn!("Controller rejected the session, re-authenticating: {}", e);
                self.transport.session().invalidate();
                self.authenticate().await?;
                self.transport.metrics().reauth_retries.inc();
                op().await
            }
            other => other,
        }
    }

    /// `GET /logout`, then forget the token and remove the cookie file
    pub async fn logout(&self) -> Result<()> {
        if self.transport.session().token().is_some() {
            match self
                .transport
                .request(Method::GET, "/logout", None, Accept::Json)
                .await
            {
                Ok(_) => info!("Logged out of {}", self.transport.base_url()),
                Err(e) if e.triggers_reauth() => debug!("Session already expired at logout"),
                Err(e) => return Err(e),
            }
        }
        self.transport.session().clear().await
    }
}

/// Token from the response header, falling back to a cookie of the same name
fn extract_token(response: &RestResponse) -> Option<String> {
    if let Some(token) = response.header(TOKEN_HEADER) {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    response
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookie| cookie.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| name.eq_ignore_ascii_case(TOKEN_HEADER) && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
