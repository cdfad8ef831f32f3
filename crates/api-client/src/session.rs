//! The authenticated session and its secure persistence.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use cairn_core::secrets::SecretStore;
use cairn_core::sync::SessionTrait;
use log::{info, warn};

use crate::error::{ApiError, Result};
use crate::types::TokenPair;

pub const ACCESS_TOKEN_KEY: &str = "auth_access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";

/// Current token pair. Both fields are `None` when signed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Owns the [`AuthSession`] and mirrors every change into a [`SecretStore`].
pub struct SessionManager {
    secret_store: Arc<dyn SecretStore>,
    session: RwLock<AuthSession>,
}

impl SessionManager {
    /// Load any previously persisted tokens.
    pub fn restore(secret_store: Arc<dyn SecretStore>) -> Result<Self> {
        let access_token = secret_store.get_secret(ACCESS_TOKEN_KEY)?;
        let refresh_token = secret_store.get_secret(REFRESH_TOKEN_KEY)?;
        if access_token.is_some() {
            info!("[Auth] Restored persisted session");
        }
        Ok(Self {
            secret_store,
            session: RwLock::new(AuthSession {
                access_token,
                refresh_token,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, AuthSession> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AuthSession> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> AuthSession {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    /// Install a new pair (sign-in or refresh) and persist it.
    ///
    /// The in-memory session is updated even if persisting fails.
    pub fn install(&self, pair: TokenPair) -> Result<()> {
        let refresh_token = {
            let mut session = self.write();
            session.access_token = Some(pair.access_token.clone());
            if let Some(refresh) = pair.refresh_token {
                session.refresh_token = Some(refresh);
            }
            session.refresh_token.clone()
        };

        self.secret_store
            .set_secret(ACCESS_TOKEN_KEY, &pair.access_token)
            .map_err(|e| ApiError::Secret(format!("Failed to store access token: {}", e)))?;
        if let Some(refresh) = refresh_token {
            self.secret_store
                .set_secret(REFRESH_TOKEN_KEY, &refresh)
                .map_err(|e| ApiError::Secret(format!("Failed to store refresh token: {}", e)))?;
        }
        Ok(())
    }

    /// Drop both tokens.
    pub fn clear(&self) -> Result<()> {
        *self.write() = AuthSession::default();
        let access = self.secret_store.delete_secret(ACCESS_TOKEN_KEY);
        let refresh = self.secret_store.delete_secret(REFRESH_TOKEN_KEY);
        info!("[Auth] Session cleared");
        access.and(refresh).map_err(ApiError::from)
    }

    /// Clear after the server rejected the session; persistence errors are
    /// logged only.
    pub(crate) fn invalidate(&self) {
        if let Err(e) = self.clear() {
            warn!("[Auth] Failed to remove persisted tokens: {}", e);
        }
    }
}

#[async_trait]
impl SessionTrait for SessionManager {
    fn is_authenticated(&self) -> bool {
        self.read().access_token.is_some()
    }

    async fn clear_session(&self) -> cairn_core::Result<()> {
        self.clear().map_err(Into::into)
    }
}
