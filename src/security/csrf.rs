//! CSRF token lifecycle
//!
//! One live token per session. Tokens expire after 30 minutes and are
//! rotated proactively after 25 minutes when read through [`CsrfTokenManager::get`].
//! Validating an expired token fails and rotates it as a side effect.

use crate::security::clock::{Clock, duration_millis};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Hard expiry for a token
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Age after which `get` rotates the token
pub const TOKEN_REFRESH_AGE: Duration = Duration::from_secs(25 * 60);

/// Random bytes per token (hex-encoded to twice this length)
const TOKEN_BYTES: usize = 32;

/// A stored token and its issue time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: u64,
}

impl CsrfToken {
    fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.issued_at)
    }
}

/// Token manager for a single session
pub struct CsrfTokenManager {
    current: RwLock<Option<CsrfToken>>,
    clock: Arc<dyn Clock>,
}

impl CsrfTokenManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            current: RwLock::new(None),
            clock,
        }
    }

    /// Create and store a fresh token, replacing any existing one
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);

        let token = CsrfToken {
            value: hex::encode(bytes),
            issued_at: self.clock.now_millis(),
        };
        let value = token.value.clone();

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);

        value
    }

    /// Rotate the token
    pub fn refresh(&self) -> String {
        tracing::debug!("🔄 CSRF token refreshed");
        self.generate()
    }

    /// Check `token` against the stored one. An expired stored token is
    /// rotated and the check fails.
    pub fn validate(&self, token: &str) -> bool {
        let now = self.clock.now_millis();
        let stored = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let Some(stored) = stored else {
            return false;
        };

        if stored.age_millis(now) > duration_millis(TOKEN_LIFETIME) {
            tracing::debug!("⌛ CSRF token expired during validation");
            self.refresh();
            return false;
        }

        use subtle::ConstantTimeEq;
        let provided = token.as_bytes();
        let expected = stored.value.as_bytes();
        provided.len() == expected.len() && bool::from(provided.ct_eq(expected))
    }

    /// Current token, generating or rotating it when missing or older than
    /// the refresh age
    pub fn get(&self) -> String {
        let now = self.clock.now_millis();
        let stored = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match stored {
            Some(token) if token.age_millis(now) <= duration_millis(TOKEN_REFRESH_AGE) => {
                token.value
            }
            Some(_) => self.refresh(),
            None => self.generate(),
        }
    }

    /// Drop the stored token
    pub fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn current(&self) -> Option<CsrfToken> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Per-session token managers sharing one clock
pub struct CsrfSessions {
    sessions: RwLock<HashMap<String, Arc<CsrfTokenManager>>>,
    clock: Arc<dyn Clock>,
}

impl CsrfSessions {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Manager for `session_id`, created on first use
    pub fn session(&self, session_id: &str) -> Arc<CsrfTokenManager> {
        if let Some(manager) = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
        {
            return manager.clone();
        }

        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(CsrfTokenManager::new(self.clock.clone())))
            .clone()
    }

    /// Validate without creating a session for unknown ids
    pub fn validate(&self, session_id: &str, token: &str) -> bool {
        let manager = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned();

        manager.is_some_and(|manager| manager.validate(token))
    }

    /// Forget sessions whose token has passed its hard expiry
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let lifetime = duration_millis(TOKEN_LIFETIME);

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = sessions.len();
        sessions.retain(|_, manager| {
            manager
                .current()
                .is_some_and(|token| token.age_millis(now) <= lifetime)
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
