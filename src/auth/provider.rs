/// External auth provider interface and HTTP adapter
use crate::{
    auth::Identity,
    error::{AppError, AppResult},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Tokens returned by sign-in, sign-up and refresh
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub identity: Identity,
}

/// The external auth provider owns identities and credentials; the backend
/// only verifies tokens and delegates account operations.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Verify a bearer token, returning the identity it belongs to
    async fn verify(&self, token: &str) -> AppResult<Identity>;

    /// Exchange a refresh token for a fresh session
    async fn refresh(&self, refresh_token: &str) -> AppResult<SessionTokens>;

    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SessionTokens>;

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionTokens>;

    async fn sign_out(&self, token: &str) -> AppResult<()>;

    async fn reset_password(&self, email: &str) -> AppResult<()>;
}

/// Wire shape of the provider's user endpoint
#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    email: String,
}

/// Wire shape of the provider's token grant responses
#[derive(Debug, Deserialize)]
struct ProviderSession {
    access_token: String,
    refresh_token: Option<String>,
    /// Unix seconds when the access token expires
    expires_at: i64,
    user: ProviderUser,
}

/// HTTP adapter for the external auth provider
pub struct HttpAuthProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    verify_attempts: u32,
}

impl HttpAuthProvider {
    pub fn new(base_url: String, api_key: String, verify_attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            verify_attempts: verify_attempts.max(1),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn session_from_wire(&self, session: ProviderSession) -> SessionTokens {
        let expires_at = Utc
            .timestamp_opt(session.expires_at, 0)
            .single()
            .unwrap_or_else(Utc::now);
        SessionTokens {
            identity: Identity {
                id: session.user.id,
                email: session.user.email,
                token_expires_at: expires_at,
                refresh_token: session.refresh_token.clone(),
            },
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        }
    }

    /// One verification round-trip; 401/403 means the token is bad, anything
    /// else is a transient provider failure worth retrying
    async fn verify_once(&self, token: &str) -> Result<Identity, VerifyFailure> {
        let response = self
            .client
            .get(self.url("/auth/v1/user"))
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| VerifyFailure::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user: ProviderUser = response
                    .json()
                    .await
                    .map_err(|e| VerifyFailure::Transient(e.to_string()))?;
                // The user endpoint does not echo token expiry; treat the
                // token as valid for the session TTL window and let refresh
                // decisions come from session-grant responses instead.
                Ok(Identity {
                    id: user.id,
                    email: user.email,
                    token_expires_at: Utc::now() + chrono::Duration::hours(1),
                    refresh_token: None,
                })
            }
            status if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN =>
            {
                Err(VerifyFailure::Rejected)
            }
            status => Err(VerifyFailure::Transient(format!(
                "provider returned {}",
                status
            ))),
        }
    }

    async fn token_grant(&self, grant: &str, body: serde_json::Value) -> AppResult<SessionTokens> {
        let response = self
            .client
            .post(self.url(&format!("/auth/v1/token?grant_type={}", grant)))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Auth provider unreachable: {}", e)))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(AppError::Unauthenticated(
                "Credentials rejected by provider".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Auth provider returned {}",
                response.status()
            )));
        }

        let session: ProviderSession = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Malformed provider response: {}", e)))?;
        Ok(self.session_from_wire(session))
    }
}

enum VerifyFailure {
    /// The provider rejected the token; no point retrying
    Rejected,
    /// Network error or provider hiccup
    Transient(String),
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn verify(&self, token: &str) -> AppResult<Identity> {
        let mut delay = Duration::from_millis(100);
        let mut last_transient = String::new();

        for attempt in 1..=self.verify_attempts {
            match self.verify_once(token).await {
                Ok(identity) => return Ok(identity),
                Err(VerifyFailure::Rejected) => {
                    return Err(AppError::Unauthenticated(
                        "Token rejected by provider".to_string(),
                    ));
                }
                Err(VerifyFailure::Transient(msg)) => {
                    warn!(
                        "Token verification attempt {}/{} failed: {}",
                        attempt, self.verify_attempts, msg
                    );
                    last_transient = msg;
                    if attempt < self.verify_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(AppError::Unauthenticated(format!(
            "Token verification failed after {} attempts: {}",
            self.verify_attempts, last_transient
        )))
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<SessionTokens> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SessionTokens> {
        let response = self
            .client
            .post(self.url("/auth/v1/signup"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Auth provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Validation(format!(
                "Sign-up rejected ({})",
                response.status()
            )));
        }

        let session: ProviderSession = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Malformed provider response: {}", e)))?;
        Ok(self.session_from_wire(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionTokens> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn sign_out(&self, token: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/auth/v1/logout"))
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Auth provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            // Sign-out is advisory; a failed revoke leaves the token to expire
            warn!("Provider sign-out returned {}", response.status());
        }
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/auth/v1/recover"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Auth provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Password reset failed ({})",
                response.status()
            )));
        }
        Ok(())
    }
}
