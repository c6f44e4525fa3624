//! Driver Configuration
//!
//! Structured configuration record for the controller endpoint, credentials,
//! tenancy and the optional ScaleIO gateway. Loaded from YAML and validated
//! before any controller traffic.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default controller REST port
pub const DEFAULT_PORT: u16 = 4443;

/// Default ScaleIO REST gateway port
pub const DEFAULT_SCALEIO_PORT: u16 = 443;

/// URL scheme used to reach the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Https,
    Http,
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Https => write!(f, "https"),
            Scheme::Http => write!(f, "http"),
        }
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Https
    }
}

// =============================================================================
// ScaleIO Gateway
// =============================================================================

/// Configuration of the ScaleIO REST gateway used to look up SDC ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleIoGatewayConfig {
    /// Gateway host or IP
    pub host: String,
    /// Gateway port
    #[serde(default = "default_scaleio_port")]
    pub port: u16,
    /// Gateway username
    pub username: String,
    /// Gateway password
    pub password: String,
    /// Verify the gateway certificate
    #[serde(default)]
    pub verify_certificate: bool,
    /// PEM root used for verification
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
    /// URL scheme
    #[serde(default)]
    pub scheme: Scheme,
}

impl ScaleIoGatewayConfig {
    /// Base URL of the gateway
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// Configuration for the controller client and the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Controller host name or IP
    pub hostname: String,
    /// Controller REST port
    pub port: u16,
    /// URL scheme
    pub scheme: Scheme,
    /// Controller user
    pub username: String,
    /// Controller password
    pub password: String,
    /// Tenant name; empty means the user's own tenant
    pub tenant: String,
    /// Project name
    pub project: String,
    /// Virtual array name
    pub varray: String,
    /// Verify the controller certificate
    pub verify_certificate: bool,
    /// PEM root used for verification
    pub certificate_path: Option<PathBuf>,
    /// Install directory holding the cookie file (no persistence when unset)
    pub cookie_dir: Option<PathBuf>,
    /// Backend name reported in capacity stats
    pub volume_backend_name: String,
    /// Optional ScaleIO gateway
    pub scaleio: Option<ScaleIoGatewayConfig>,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Task waiter deadline
    pub task_timeout_secs: u64,
    /// Task poll interval
    pub task_poll_interval_ms: u64,
    /// Interval between LUN readiness checks during attach
    pub lun_poll_interval_secs: u64,
    /// Upper bound on LUN readiness during one attach
    pub attach_timeout_secs: u64,
    /// Lifetime of cached name lookups
    pub resolver_cache_ttl_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: DEFAULT_PORT,
            scheme: Scheme::Https,
            username: String::new(),
            password: String::new(),
            tenant: String::new(),
            project: String::new(),
            varray: String::new(),
            verify_certificate: true,
            certificate_path: None,
            cookie_dir: None,
            volume_backend_name: "EMCCoprHDDriver".to_string(),
            scaleio: None,
            request_timeout_secs: 60,
            task_timeout_secs: 300,
            task_poll_interval_ms: 1000,
            lun_poll_interval_secs: 10,
            attach_timeout_secs: 600,
            resolver_cache_ttl_secs: 30,
        }
    }
}

fn default_scaleio_port() -> u16 {
    DEFAULT_SCALEIO_PORT
}

impl DriverConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Fail fast on missing required options
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("coprhd_hostname", &self.hostname),
            ("coprhd_username", &self.username),
            ("coprhd_password", &self.password),
            ("coprhd_project", &self.project),
            ("coprhd_varray", &self.varray),
        ];
        for (option, value) in required {
            if value.trim().is_empty() {
                return Err(missing(option));
            }
        }
        if self.port == 0 {
            return Err(Error::Configuration("coprhd_port must be non-zero".into()));
        }
        if let Some(cert) = &self.certificate_path {
            if !cert.exists() {
                return Err(Error::Configuration(format!(
                    "certificate file not found: {}",
                    cert.display()
                )));
            }
        }
        Ok(())
    }

    /// Additional checks for the ScaleIO transport
    pub fn validate_scaleio(&self) -> Result<&ScaleIoGatewayConfig> {
        let sio = self
            .scaleio
            .as_ref()
            .ok_or_else(|| missing("coprhd_scaleio_rest_gateway_host"))?;
        if sio.host.trim().is_empty() {
            return Err(missing("coprhd_scaleio_rest_gateway_host"));
        }
        if sio.username.trim().is_empty() {
            return Err(missing("coprhd_scaleio_rest_server_username"));
        }
        if sio.password.is_empty() {
            return Err(missing("coprhd_scaleio_rest_server_password"));
        }
        Ok(sio)
    }

    /// Base URL of the controller
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.hostname, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    pub fn lun_poll_interval(&self) -> Duration {
        Duration::from_secs(self.lun_poll_interval_secs)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    pub fn resolver_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolver_cache_ttl_secs)
    }

    /// Path of the cookie file shared by invocations from the same shell
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.cookie_dir.as_ref().map(|dir| cookie_file_in(dir))
    }
}

/// Cookie file location inside an install directory.
///
/// On POSIX the parent process id keys the file so that sibling invocations
/// from one shell share a session.
pub fn cookie_file_in(dir: &Path) -> PathBuf {
    #[cfg(unix)]
    {
        dir.join("cookie").join(std::os::unix::process::parent_id().to_string())
    }
    #[cfg(not(unix))]
    {
        dir.join("cookie").join("cookiefile")
    }
}

fn missing(option: &str) -> Error {
    Error::Configuration(format!("missing required option: {}", option))
}
