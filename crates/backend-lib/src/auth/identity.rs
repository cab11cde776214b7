// ============================
// crates/backend-lib/src/auth/identity.rs
// ============================
//! Maps a verified token subject to a stored identity.
use std::sync::Arc;

use crate::error::AuthError;
use crate::storage::{Identity, UserStore};

/// Resolves token subjects against the identity store.
///
/// Nothing is cached: every call is a fresh lookup, so removing an identity
/// locks it out on its next request or connection.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub async fn resolve(&self, subject: &str) -> Result<Identity, AuthError> {
        match self.store.find_by_subject(subject).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(AuthError::UnknownSubject),
            Err(e) => {
                tracing::error!(error = %e, subject, "identity lookup failed");
                Err(AuthError::Lookup(e.to_string()))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryUserStore;
    use dashboard_common::Role;

    #[tokio::test]
    async fn test_resolve_is_never_cached() {
        let store = Arc::new(MemoryUserStore::new());
        store
            .insert(Identity::new("a@example.com", "hash", Role::User))
            .await
            .unwrap();
        let resolver = IdentityResolver::new(store.clone());

        assert_eq!(resolver.resolve("a@example.com").await.unwrap().subject, "a@example.com");

        store.remove("a@example.com");
        assert_eq!(
            resolver.resolve("a@example.com").await,
            Err(AuthError::UnknownSubject)
        );
    }
}
