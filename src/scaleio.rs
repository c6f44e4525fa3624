//! ScaleIO REST gateway client
//!
//! Used by the ScaleIO transport to look up the SDC id of the connecting
//! host. Gateways from 2.0 on hand out a login token that replaces the
//! password in basic authentication; older gateways take the password on
//! every request.

use crate::config::ScaleIoGatewayConfig;
use crate::error::{Error, Result};
use crate::transport::http::{build_http_client, check_status};
use parking_lot::RwLock;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway authentication scheme, chosen from the reported version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAuth {
    /// basic auth with `(user, token)`, token from `/api/login`
    Token,
    /// basic auth with `(user, password)`
    Password,
}

impl GatewayAuth {
    pub fn for_version(version: &str) -> Self {
        let major = version
            .trim()
            .trim_matches('"')
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok())
            .unwrap_or(0);
        if major >= 2 {
            GatewayAuth::Token
        } else {
            GatewayAuth::Password
        }
    }
}

#[derive(Debug, Default)]
struct GatewayState {
    auth: Option<GatewayAuth>,
    token: Option<String>,
}

/// Client for the ScaleIO REST gateway
pub struct ScaleIoGateway {
    http: reqwest::Client,
    config: ScaleIoGatewayConfig,
    state: RwLock<GatewayState>,
}

impl ScaleIoGateway {
    pub fn new(config: ScaleIoGatewayConfig) -> Result<Self> {
        let http = build_http_client(
            config.verify_certificate,
            config.certificate_path.as_deref(),
            GATEWAY_TIMEOUT,
        )?;
        Ok(Self {
            http,
            config,
            state: RwLock::new(GatewayState::default()),
        })
    }

    pub fn config(&self) -> &ScaleIoGatewayConfig {
        &self.config
    }

    /// Token of the current gateway session, if token auth is in use
    pub fn token(&self) -> Option<String> {
        self.state.read().token.clone()
    }

    /// `GET /api/version`
    pub async fn version(&self) -> Result<String> {
        let body = self.get_raw("/api/version", &self.config.password).await?;
        Ok(unquote(&body))
    }

    async fn auth(&self) -> Result<GatewayAuth> {
        if let Some(auth) = self.state.read().auth {
            return Ok(auth);
        }
        let version = self.version().await?;
        let auth = GatewayAuth::for_version(&version);
        debug!("ScaleIO gateway version {} uses {:?} auth", version, auth);
        self.state.write().auth = Some(auth);
        Ok(auth)
    }

    /// `GET /api/login`; the token becomes the basic-auth password
    pub async fn login(&self) -> Result<String> {
        info!("Logging in to ScaleIO gateway {}", self.config.host);
        let body = self.get_raw("/api/login", &self.config.password).await?;
        let token = unquote(&body);
        if token.is_empty() {
            return Err(Error::Unauthenticated("ScaleIO gateway returned an empty token".into()));
        }
        self.state.write().token = Some(token.clone());
        Ok(token)
    }

    /// SDC id of the client with the given IP
    pub async fn sdc_id(&self, ip: &str) -> Result<String> {
        let path = format!("/api/types/Client/instances/getByIp::{}", ip);
        let body = self.get(&path).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found("ScaleIO SDC", ip),
            other => other,
        })?;
        let id = unquote(&body);
        if id.is_empty() {
            return Err(Error::not_found("ScaleIO SDC", ip));
        }
        Ok(id)
    }

    /// Authenticated GET following the gateway's auth scheme
    async fn get(&self, path: &str) -> Result<String> {
        match self.auth().await? {
            GatewayAuth::Password => self.get_raw(path, &self.config.password).await,
            GatewayAuth::Token => {
                let token = match self.token() {
                    Some(token) => token,
                    None => self.login().await?,
                };
                match self.get_raw(path, &token).await {
                    Err(Error::Unauthenticated(_)) | Err(Error::Forbidden(_)) => {
                        warn!("ScaleIO gateway token rejected, logging in again");
                        let token = self.login().await?;
                        self.get_raw(path, &token).await
                    }
                    other => other,
                }
            }
        }
    }

    async fn get_raw(&self, path: &str, secret: &str) -> Result<String> {
        let url = format!("{}{}", self.config.base_url(), path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.username, Some(secret))
            .send()
            .await?;
        let status: StatusCode = response.status();
        let body = response.text().await?;
        debug!("ScaleIO GET {} -> {}", path, status.as_u16());
        check_status(status, path, &body)?;
        Ok(body)
    }
}

/// Gateway answers scalar values as JSON strings
fn unquote(body: &str) -> String {
    body.trim().trim_matches('"').to_string()
}
