use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::{KeyValueStore, TOKEN_KEY, USER_KEY};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to persist session: {0:#}")]
    Store(anyhow::Error),

    #[error("Stored user record is not valid JSON: {0}")]
    User(#[from] serde_json::Error),

    #[error("Token contains characters that cannot be sent in a header")]
    InvalidToken,
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    user: Option<Value>,
}

/// The client's authentication state: a token plus the cached user record.
///
/// The in-memory copy and the backing store are only ever updated together,
/// under one lock, so a reader never sees one without the other.
pub struct Session {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Start with no session, regardless of what the store holds.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Restore a previously persisted session from the store.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, SessionError> {
        let token = store
            .get(TOKEN_KEY)
            .map_err(SessionError::Store)?
            .filter(|t| !t.is_empty());
        let user = match store.get(USER_KEY).map_err(SessionError::Store)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable cached user record");
                    None
                }
            },
            None => None,
        };

        debug!(authenticated = token.is_some(), "Loaded session");
        Ok(Self {
            store,
            state: Mutex::new(SessionState { token, user }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current token.
    pub fn token(&self) -> Option<String> {
        self.state().token.clone()
    }

    /// Snapshot of the cached user record, if login returned one.
    pub fn user(&self) -> Option<Value> {
        self.state().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Replace the token. An empty token ends the session instead.
    ///
    /// If the store write fails, the in-memory token is left as it was.
    pub fn set_token(&self, token: &str) -> Result<(), SessionError> {
        if token.is_empty() {
            debug!("Empty token supplied, clearing session");
            self.clear();
            return Ok(());
        }
        if !token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(SessionError::InvalidToken);
        }

        let mut state = self.state();
        self.store
            .set(TOKEN_KEY, token)
            .map_err(SessionError::Store)?;
        state.token = Some(token.to_string());
        info!("Session token stored");
        Ok(())
    }

    pub fn set_user(&self, user: &Value) -> Result<(), SessionError> {
        let raw = serde_json::to_string(user)?;
        let mut state = self.state();
        self.store.set(USER_KEY, &raw).map_err(SessionError::Store)?;
        state.user = Some(user.clone());
        Ok(())
    }

    /// Drop the token and user record. Idempotent.
    ///
    /// Memory is always cleared; a store that refuses the removal is logged.
    pub fn clear(&self) {
        let mut state = self.state();
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %format!("{:#}", e), "Failed to remove session key from store");
            }
        }
        if state.token.take().is_some() {
            info!("Session cleared");
        }
        state.user = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
