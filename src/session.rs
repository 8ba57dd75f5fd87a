use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::sync::Mutex;
use tracing::{debug, info};

/// Credential for one catalog account. Treated as opaque by the core; the
/// only inspection is the expiry check in `SessionStore::current`.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub account_id: String,
    pub session_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Holds the one session credential shared by every operation. Reads are
/// frequent, writes happen once at startup (account resolution), so a plain
/// mutex around a clone-out is enough.
pub struct SessionStore {
    inner: Mutex<SessionToken>,
}

impl SessionStore {
    pub fn new(token: SessionToken) -> Self {
        Self {
            inner: Mutex::new(token),
        }
    }

    pub fn from_env() -> Result<Self> {
        let session_id = env::var("TMDB_SESSION_ID").context("TMDB_SESSION_ID not set")?;
        let account_id = env::var("TMDB_ACCOUNT_ID").unwrap_or_default();
        let expires_at = match env::var("TMDB_SESSION_EXPIRES_AT") {
            Ok(raw) => Some(
                raw.parse::<DateTime<Utc>>()
                    .context("TMDB_SESSION_EXPIRES_AT is not an RFC 3339 timestamp")?,
            ),
            Err(_) => None,
        };
        Ok(Self::new(SessionToken {
            account_id,
            session_id,
            expires_at,
        }))
    }

    /// The active credential, or `None` once it has expired or while the
    /// account id is still unresolved. Callers treat `None` as "logged out".
    pub fn current(&self) -> Option<SessionToken> {
        let token = self.inner.lock().expect("session lock poisoned").clone();
        if token.account_id.is_empty() {
            return None;
        }
        if let Some(expiry) = token.expires_at {
            if expiry <= Utc::now() {
                debug!("Session credential expired at {}", expiry);
                return None;
            }
        }
        Some(token)
    }

    /// The raw credential regardless of account resolution, for the startup
    /// account lookup itself.
    pub fn unresolved(&self) -> SessionToken {
        self.inner.lock().expect("session lock poisoned").clone()
    }

    pub fn set_account_id(&self, account_id: String) {
        info!("Resolved catalog account id {}", account_id);
        self.inner.lock().expect("session lock poisoned").account_id = account_id;
    }
}
