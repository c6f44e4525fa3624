//! HTTPS transport
//!
//! Issues requests against the controller, injects the vendor and session
//! headers, and maps HTTP status codes onto [`Error`] kinds.

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use crate::transport::session::SessionRef;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Header carrying the session token
pub const TOKEN_HEADER: &str = "X-SDS-AUTH-TOKEN";

/// Fixed vendor client marker header
pub const CLIENT_MARKER_HEADER: &str = "X-EMC-REST-CLIENT";

/// Requested response encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Json,
    Xml,
    OctetStream,
}

impl Accept {
    pub fn mime(&self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Xml => "application/xml",
            Accept::OctetStream => "application/octet-stream",
        }
    }
}

/// Decoded controller response
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RestResponse {
    /// Decode the payload as JSON; an empty body decodes as `null`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Build an HTTP client with the configured certificate policy
pub fn build_http_client(
    verify_certificate: bool,
    certificate_path: Option<&Path>,
    timeout: Duration,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_certificate);

    if let Some(path) = certificate_path {
        let pem = std::fs::read(path)?;
        let certificate = reqwest::Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(certificate);
    }

    Ok(builder.build()?)
}

/// Map a non-success status onto an error kind
pub fn check_status(status: StatusCode, path: &str, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.to_string()
    };
    Err(match status.as_u16() {
        401 => Error::Unauthenticated(detail),
        403 => Error::Forbidden(detail),
        404 => Error::not_found("path", path),
        405 => Error::MethodNotAllowed(format!("{}: {}", path, detail)),
        500 => Error::ControllerInternal(detail),
        503 => Error::Unavailable(detail),
        other => Error::Protocol {
            status: other,
            body: body.to_string(),
        },
    })
}

// =============================================================================
// Transport
// =============================================================================

/// HTTPS transport bound to one controller and one session
#[derive(Clone)]
pub struct RestTransport {
    http: reqwest::Client,
    base_url: String,
    session: SessionRef,
    metrics: DriverMetrics,
}

impl RestTransport {
    pub fn new(config: &DriverConfig, session: SessionRef, metrics: DriverMetrics) -> Result<Self> {
        let http = build_http_client(
            config.verify_certificate,
            config.certificate_path.as_deref(),
            config.request_timeout(),
        )?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            session,
            metrics,
        })
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.metrics
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self, accept: Accept, with_token: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(accept.mime()));
        headers.insert(ACCEPT, HeaderValue::from_static(accept.mime()));
        headers.insert(CLIENT_MARKER_HEADER, HeaderValue::from_static("TRUE"));
        if with_token {
            if let Some(token) = self.session.token() {
                let value = HeaderValue::from_str(&token)
                    .map_err(|e| Error::Internal(format!("invalid session token: {}", e)))?;
                headers.insert(TOKEN_HEADER, value);
            }
        }
        Ok(headers)
    }

    /// Issue one request and map its status
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        accept: Accept,
    ) -> Result<RestResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .headers(self.headers(accept, true)?);
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        self.finish(method, path, response).await
    }

    /// `POST /login` with basic authentication
    pub async fn login(&self, username: &str, password: &str) -> Result<RestResponse> {
        let url = format!("{}/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers(Accept::Json, false)?)
            .basic_auth(username, Some(password))
            .send()
            .await?;
        self.finish(Method::POST, "/login", response).await
    }

    async fn finish(&self, method: Method, path: &str, response: reqwest::Response) -> Result<RestResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        self.metrics.observe_request(method.as_str(), status.as_u16());
        debug!("{} {} -> {}", method, path, status.as_u16());

        check_status(status, path, &body)?;
        Ok(RestResponse {
            status,
            headers,
            body,
        })
    }
}
