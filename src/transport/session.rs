//! Session token cache
//!
//! Process-wide authentication state: the current token, when it was
//! acquired, and whether it is believed valid. The token is mirrored to a
//! cookie file so sibling CLI invocations share one login.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    acquired_at: Option<DateTime<Utc>>,
    authenticated: bool,
}

/// Shared session handle passed to every client call
#[derive(Debug)]
pub struct Session {
    state: RwLock<SessionState>,
    cookie_file: Option<PathBuf>,
}

pub type SessionRef = Arc<Session>;

impl Session {
    /// Create an empty, unauthenticated session
    pub fn new(cookie_file: Option<PathBuf>) -> SessionRef {
        Arc::new(Self {
            state: RwLock::new(SessionState::default()),
            cookie_file,
        })
    }

    /// Create a session, adopting the token of an existing cookie file.
    ///
    /// A token read from disk is assumed valid until the controller says
    /// otherwise.
    pub async fn load(cookie_file: Option<PathBuf>) -> Result<SessionRef> {
        let session = Self::new(cookie_file);
        if let Some(path) = session.cookie_file.as_deref() {
            match fs::read_to_string(path).await {
                Ok(contents) => {
                    let token = contents.trim();
                    if !token.is_empty() {
                        debug!("Loaded session token from {}", path.display());
                        let mut state = session.state.write();
                        state.token = Some(token.to_string());
                        state.authenticated = true;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(session)
    }

    /// Current token, if any
    pub fn token(&self) -> Option<String> {
        self.state.read().token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    /// When the current token was acquired by this process
    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().acquired_at
    }

    pub fn cookie_file(&self) -> Option<&Path> {
        self.cookie_file.as_deref()
    }

    /// Adopt a freshly issued token and persist it
    pub async fn store(&self, token: String) -> Result<()> {
        {
            let mut state = self.state.write();
            state.token = Some(token.clone());
            state.acquired_at = Some(Utc::now());
            state.authenticated = true;
        }
        if let Some(path) = self.cookie_file.as_deref() {
            write_cookie_file(path, &token).await?;
        }
        Ok(())
    }

    /// Mark the token as no longer valid; the next call re-authenticates
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.authenticated = false;
        state.token = None;
    }

    /// Forget the token and remove the cookie file
    pub async fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            *state = SessionState::default();
        }
        if let Some(path) = self.cookie_file.as_deref() {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Write the token as a single line, readable by the owner only
async fn write_cookie_file(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(token.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    debug!("Persisted session token to {}", path.display());
    Ok(())
}
