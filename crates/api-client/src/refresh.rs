//! Single-flight access token refresh.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};

use crate::error::{ApiError, Result};
use crate::session::SessionManager;
use crate::types::{RefreshTokenRequest, TokenPair};

/// Outcome shared by every caller waiting on one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshFailure {
    /// The server refused the refresh token; the session is gone.
    Rejected(String),
    /// The refresh endpoint could not be reached; the session is kept.
    Unreachable(String),
}

impl From<RefreshFailure> for ApiError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected(message) => ApiError::Unauthorized(message),
            RefreshFailure::Unreachable(message) => ApiError::NetworkUnreachable(message),
        }
    }
}

type RefreshOutcome = std::result::Result<String, RefreshFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Coordinates token refreshes so that at most one refresh request is in
/// flight per session.
///
/// Callers that hit a 401 while a refresh is running attach to the same
/// shared future and observe the same outcome. The memoized future is dropped
/// once it resolves so the next 401 starts a fresh refresh.
pub struct TokenRefreshCoordinator {
    http: reqwest::Client,
    refresh_url: String,
    session: Arc<SessionManager>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl TokenRefreshCoordinator {
    pub fn new(http: reqwest::Client, refresh_url: String, session: Arc<SessionManager>) -> Self {
        Self {
            http,
            refresh_url,
            session,
            in_flight: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<SharedRefresh>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a refresh request is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.slot().is_some()
    }

    /// Return a usable access token after `rejected_token` got a 401.
    ///
    /// If the session already holds a different token (another caller
    /// refreshed first) it is returned without a network call.
    pub async fn refresh_after_unauthorized(&self, rejected_token: Option<&str>) -> Result<String> {
        let refresh = {
            let mut slot = self.slot();
            if let Some(current) = self.session.access_token() {
                if rejected_token != Some(current.as_str()) && slot.is_none() {
                    debug!("[Auth] Token already rotated by another caller");
                    return Ok(current);
                }
            }

            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("[Auth] Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let Some(refresh_token) = self.session.refresh_token() else {
                        warn!("[Auth] 401 without a refresh token; ending session");
                        self.session.invalidate();
                        return Err(ApiError::unauthorized(
                            "Session expired. Please sign in again.",
                        ));
                    };
                    let refresh = Self::run_refresh(
                        self.http.clone(),
                        self.refresh_url.clone(),
                        Arc::clone(&self.session),
                        refresh_token,
                    )
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        let outcome = refresh.clone().await;

        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&refresh))
        {
            slot.take();
        }
        drop(slot);

        outcome.map_err(ApiError::from)
    }

    async fn run_refresh(
        http: reqwest::Client,
        refresh_url: String,
        session: Arc<SessionManager>,
        refresh_token: String,
    ) -> RefreshOutcome {
        debug!("[Auth] Refreshing access token");

        let response = match http
            .post(&refresh_url)
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("[Auth] Token refresh could not reach the server: {}", e);
                return Err(RefreshFailure::Unreachable(format!(
                    "Failed to refresh token: {}",
                    e
                )));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Err(RefreshFailure::Unreachable(format!(
                    "Failed to read refresh response: {}",
                    e
                )));
            }
        };

        if !status.is_success() {
            error!("[Auth] Token refresh rejected with status {}", status);
            session.invalidate();
            return Err(RefreshFailure::Rejected(
                "Session expired. Please sign in again.".to_string(),
            ));
        }

        let pair: TokenPair = match serde_json::from_str(&body) {
            Ok(pair) => pair,
            Err(e) => {
                error!("[Auth] Malformed token refresh response: {}", e);
                session.invalidate();
                return Err(RefreshFailure::Rejected(
                    "Session expired. Please sign in again.".to_string(),
                ));
            }
        };

        let access_token = pair.access_token.clone();
        if let Err(e) = session.install(pair) {
            warn!("[Auth] Refreshed tokens could not be persisted: {}", e);
        }
        info!("[Auth] Access token refreshed");
        Ok(access_token)
    }
}
