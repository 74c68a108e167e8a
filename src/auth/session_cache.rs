/// Session cache - time-bounded memoization of verified bearer tokens
///
/// Keyed by the token string itself. Correctness is enforced by the TTL check
/// on read; the periodic sweep exists only to bound memory.
use crate::auth::{AuthProvider, Identity};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

struct CachedIdentity {
    identity: Identity,
    cached_at: DateTime<Utc>,
}

pub struct SessionCache {
    entries: Mutex<HashMap<String, CachedIdentity>>,
    ttl: Duration,
    /// Attempt a silent refresh when token expiry is within this window
    refresh_threshold: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration, refresh_threshold: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            refresh_threshold,
        }
    }

    /// Resolve a token to its cached identity; entries past TTL are a miss
    pub fn resolve(&self, token: &str) -> Option<Identity> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(token) {
            Some(entry) if Utc::now() - entry.cached_at < self.ttl => {
                crate::metrics::record_cache_hit("session");
                Some(entry.identity.clone())
            }
            Some(_) => {
                entries.remove(token);
                crate::metrics::record_cache_miss("session");
                None
            }
            None => {
                crate::metrics::record_cache_miss("session");
                None
            }
        }
    }

    /// Store a verified identity under its token
    pub fn store(&self, token: &str, identity: &Identity) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            token.to_string(),
            CachedIdentity {
                identity: identity.clone(),
                cached_at: Utc::now(),
            },
        );
    }

    /// Drop a token from the cache (sign-out, provider rejection)
    pub fn flush(&self, token: &str) {
        self.entries.lock().unwrap().remove(token);
    }

    /// Silently refresh a session whose token is close to expiry
    ///
    /// On success the identity is re-stored under the new token and the new
    /// token is returned so the caller can propagate it (response header,
    /// rewritten Authorization for the rest of the request). Refresh failures
    /// are non-fatal: the old token stays honored until the provider itself
    /// rejects it.
    pub async fn refresh_if_expiring(
        &self,
        token: &str,
        identity: &Identity,
        provider: &dyn AuthProvider,
    ) -> Option<String> {
        let now = Utc::now();
        let until_expiry = identity.token_expires_at - now;
        if until_expiry <= Duration::zero() || until_expiry > self.refresh_threshold {
            return None;
        }

        let refresh_token = identity.refresh_token.as_deref()?;
        match provider.refresh(refresh_token).await {
            Ok(session) => {
                debug!("Refreshed session for {}", identity.email);
                self.flush(token);
                self.store(&session.access_token, &session.identity);
                Some(session.access_token)
            }
            Err(e) => {
                warn!("Silent token refresh failed for {}: {}", identity.email, e);
                None
            }
        }
    }

    /// Remove entries past TTL; returns the number removed
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionTokens;
    use crate::error::{AppError, AppResult};
    use async_trait::async_trait;

    fn identity(expires_in: Duration) -> Identity {
        Identity {
            id: "user-1".to_string(),
            email: "dj@example.com".to_string(),
            token_expires_at: Utc::now() + expires_in,
            refresh_token: Some("refresh-1".to_string()),
        }
    }

    struct FakeProvider {
        refresh_ok: bool,
    }

    #[async_trait]
    impl crate::auth::AuthProvider for FakeProvider {
        async fn verify(&self, _token: &str) -> AppResult<Identity> {
            Ok(identity(Duration::hours(1)))
        }

        async fn refresh(&self, _refresh_token: &str) -> AppResult<SessionTokens> {
            if self.refresh_ok {
                Ok(SessionTokens {
                    access_token: "new-token".to_string(),
                    refresh_token: Some("new-refresh".to_string()),
                    identity: identity(Duration::hours(1)),
                })
            } else {
                Err(AppError::Unauthenticated("refresh rejected".to_string()))
            }
        }

        async fn sign_up(&self, _: &str, _: &str) -> AppResult<SessionTokens> {
            unimplemented!()
        }
        async fn sign_in(&self, _: &str, _: &str) -> AppResult<SessionTokens> {
            unimplemented!()
        }
        async fn sign_out(&self, _: &str) -> AppResult<()> {
            Ok(())
        }
        async fn reset_password(&self, _: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_store_and_resolve_within_ttl() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        let id = identity(Duration::hours(1));

        cache.store("token-1", &id);
        let resolved = cache.resolve("token-1").unwrap();
        assert_eq!(resolved.id, id.id);
        assert_eq!(resolved.email, id.email);
    }

    #[test]
    fn test_resolve_after_ttl_is_a_miss() {
        let cache = SessionCache::new(Duration::seconds(-1), Duration::minutes(10));
        cache.store("token-1", &identity(Duration::hours(1)));

        assert!(cache.resolve("token-1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        // Expires inside the refresh window
        let id = identity(Duration::minutes(5));
        cache.store("old-token", &id);

        let provider = FakeProvider { refresh_ok: true };
        let new_token = cache
            .refresh_if_expiring("old-token", &id, &provider)
            .await
            .unwrap();

        assert_eq!(new_token, "new-token");
        assert!(cache.resolve("old-token").is_none());
        assert!(cache.resolve("new-token").is_some());
    }

    #[tokio::test]
    async fn test_no_refresh_when_expiry_is_far() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        let id = identity(Duration::hours(5));
        cache.store("token-1", &id);

        let provider = FakeProvider { refresh_ok: true };
        assert!(cache
            .refresh_if_expiring("token-1", &id, &provider)
            .await
            .is_none());
        assert!(cache.resolve("token-1").is_some());
    }

    #[tokio::test]
    async fn test_no_refresh_for_already_expired_token() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        let id = identity(Duration::seconds(-10));
        cache.store("token-1", &id);

        let provider = FakeProvider { refresh_ok: true };
        assert!(cache
            .refresh_if_expiring("token-1", &id, &provider)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_old_token() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        let id = identity(Duration::minutes(5));
        cache.store("old-token", &id);

        let provider = FakeProvider { refresh_ok: false };
        assert!(cache
            .refresh_if_expiring("old-token", &id, &provider)
            .await
            .is_none());
        // Old token still honored until the provider rejects it
        assert!(cache.resolve("old-token").is_some());
    }

    #[test]
    fn test_sweep_bounds_memory() {
        let cache = SessionCache::new(Duration::minutes(5), Duration::minutes(10));
        cache.store("fresh", &identity(Duration::hours(1)));
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.insert(
                "stale".to_string(),
                CachedIdentity {
                    identity: identity(Duration::hours(1)),
                    cached_at: Utc::now() - Duration::minutes(30),
                },
            );
        }

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }
}
