//! HTTP-01 challenge tokens.
//!
//! The issuer registers `token → key authorization` while an order is being
//! validated; the plain listener answers
//! `/.well-known/acme-challenge/<token>` from this table.

use std::sync::Arc;

use dashmap::DashMap;

/// Route answered on the plain listener.
pub const ACME_CHALLENGE_ROUTE: &str = "/.well-known/acme-challenge/{token}";

/// Pending HTTP-01 challenges, shared between issuer and plain listener.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_challenge(&self, token: &str, key_authorization: &str) {
        tracing::debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove_challenge(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            tracing::debug!(token = %token, "Removed ACME challenge");
        }
    }

    /// Key authorization for `token`, if registered.
    pub fn get_response(&self, token: &str) -> Option<String> {
        self.challenges.get(token).map(|v| v.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_serve_remove() {
        let manager = ChallengeManager::new();
        manager.add_challenge("tok", "tok.thumb");
        assert_eq!(manager.get_response("tok").as_deref(), Some("tok.thumb"));
        assert_eq!(manager.pending_count(), 1);

        let shared = manager.clone();
        shared.remove_challenge("tok");
        assert!(manager.get_response("tok").is_none());
        assert_eq!(manager.pending_count(), 0);
    }
}
