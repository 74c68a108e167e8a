/// In-memory TTL cache of entitlement lookups
///
/// Avoids hitting the store on every gated request. Correctness comes from
/// the TTL check on read; the periodic sweep only bounds memory. Entries are
/// idempotent re-derivations of store truth, so last-write-wins on concurrent
/// stores is fine.
use crate::entitlement::Entitlement;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

struct CachedEntitlement {
    entitlement: Entitlement,
    cached_at: DateTime<Utc>,
}

pub struct EntitlementCache {
    entries: Mutex<HashMap<String, CachedEntitlement>>,
    ttl: Duration,
}

fn cache_key(email: &str) -> String {
    format!("entitlement_{}", email)
}

impl EntitlementCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a cached entitlement; entries past TTL count as a miss
    pub fn get(&self, email: &str) -> Option<Entitlement> {
        let key = cache_key(email);
        let mut entries = self.entries.lock().unwrap();

        match entries.get(&key) {
            Some(entry) if Utc::now() - entry.cached_at < self.ttl => {
                crate::metrics::record_cache_hit("entitlement");
                Some(entry.entitlement.clone())
            }
            Some(_) => {
                entries.remove(&key);
                crate::metrics::record_cache_miss("entitlement");
                None
            }
            None => {
                crate::metrics::record_cache_miss("entitlement");
                None
            }
        }
    }

    /// Cache an entitlement under its email
    pub fn put(&self, entitlement: &Entitlement) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            cache_key(&entitlement.email),
            CachedEntitlement {
                entitlement: entitlement.clone(),
                cached_at: Utc::now(),
            },
        );
    }

    /// Drop a cached entitlement
    pub fn invalidate(&self, email: &str) {
        self.entries.lock().unwrap().remove(&cache_key(email));
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

    fn trial_entitlement(email: &str) -> Entitlement {
        Entitlement::new_trial("user-1", email, Utc::now(), 7)
    }

    #[test]
    fn test_put_and_get() {
        let cache = EntitlementCache::new(Duration::minutes(2));
        let e = trial_entitlement("dj@example.com");

        cache.put(&e);
        let found = cache.get("dj@example.com").unwrap();
        assert_eq!(found.id, e.id);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = EntitlementCache::new(Duration::seconds(-1));
        let e = trial_entitlement("dj@example.com");

        cache.put(&e);
        assert!(cache.get("dj@example.com").is_none());
        // Expired entry was removed on read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate() {
        let cache = EntitlementCache::new(Duration::minutes(2));
        cache.put(&trial_entitlement("dj@example.com"));

        cache.invalidate("dj@example.com");
        assert!(cache.get("dj@example.com").is_none());
    }

    #[test]
    fn test_sweep_drops_only_stale_entries() {
        let cache = EntitlementCache::new(Duration::minutes(2));
        cache.put(&trial_entitlement("fresh@example.com"));
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.insert(
                cache_key("stale@example.com"),
                CachedEntitlement {
                    entitlement: trial_entitlement("stale@example.com"),
                    cached_at: Utc::now() - Duration::minutes(10),
                },
            );
        }

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get("fresh@example.com").is_some());
        assert!(cache.get("stale@example.com").is_none());
    }
}
