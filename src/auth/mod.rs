/// Authentication against the external auth provider
///
/// Identity and credential storage live with the provider; this module only
/// carries the provider interface, the HTTP adapter, and the session cache
/// that memoizes verified tokens.
pub mod provider;
pub mod session_cache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use provider::{AuthProvider, HttpAuthProvider, SessionTokens};
pub use session_cache::SessionCache;

/// Read-only copy of the provider's user record, cached per bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    /// Expiry embedded in the current access token
    pub token_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}
