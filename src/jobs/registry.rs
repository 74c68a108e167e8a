/// Active import job tracking
///
/// One session per in-flight import. The streaming handler deactivates the
/// session when the client goes away; the import loop checks the flag between
/// progress events and unwinds cooperatively.
use crate::import::CancelToken;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct JobSession {
    pub id: String,
    pub identity_id: String,
    cancel: CancelToken,
}

impl JobSession {
    fn new(identity_id: &str) -> Self {
        let id = format!("{}-{}", identity_id, uuid::Uuid::new_v4());
        Self {
            id,
            identity_id: identity_id.to_string(),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn deactivate(&self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
pub struct JobRegistry {
    sessions: Mutex<HashMap<String, Arc<JobSession>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity_id: &str) -> Arc<JobSession> {
        let session = Arc::new(JobSession::new(identity_id));
        debug!("Registered import session {}", session.id);
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.id.clone(), session.clone());
        crate::metrics::ACTIVE_IMPORTS.set(sessions.len() as i64);
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<JobSession>> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Deactivate and drop a session; idempotent
    pub fn release(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.remove(session_id) {
            session.deactivate();
            crate::metrics::ACTIVE_IMPORTS.set(sessions.len() as i64);
            debug!("Released import session {}", session_id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let registry = JobRegistry::new();
        let session = registry.register("user-1");
        assert!(session.is_active());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.get(&session.id).is_some());

        registry.release(&session.id);
        assert_eq!(registry.active_count(), 0);
        assert!(!session.is_active());

        // Releasing twice is harmless
        registry.release(&session.id);
    }

    #[test]
    fn test_deactivation_flips_shared_token() {
        let registry = JobRegistry::new();
        let session = registry.register("user-1");
        let token = session.cancel_token();

        assert!(!token.is_cancelled());
        session.deactivate();
        assert!(token.is_cancelled());
        assert!(!session.is_active());
    }

    #[test]
    fn test_session_ids_carry_identity() {
        let registry = JobRegistry::new();
        let session = registry.register("user-7");
        assert!(session.id.starts_with("user-7-"));
        assert_eq!(session.identity_id, "user-7");
    }
}
