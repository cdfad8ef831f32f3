//! HTTP collaborator for the cairn sync core.
//!
//! [`ApiClient`] attaches the session's bearer token to every authenticated
//! request and, on a 401, joins the single in-flight token refresh before
//! replaying the request once. [`StoneApi`] maps the stone endpoints onto
//! [`cairn_core::sync::StoneRemoteTrait`].

mod client;
mod error;
mod refresh;
mod remote;
mod session;
mod types;

pub use client::{ApiClient, RequestBody, REFRESH_PATH};
pub use error::{ApiError, ApiRetryClass, Result};
pub use refresh::TokenRefreshCoordinator;
pub use remote::StoneApi;
pub use session::{AuthSession, SessionManager, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use types::*;
