//! Credential registration and validation
//!
//! Uniqueness of `user` is a list-then-scan pre-check, not a storage
//! constraint. Concurrent registrations of the same user can race past the
//! check; accepted under the single logical writer this store runs with.

use crate::auth::tokens::{AuthError, Claims, TokenSigner};
use crate::resources::{Registry, ResourceName};
use crate::storage::{DocumentStore, JsonMap};
use serde_json::Value;
use tracing::{info, warn};

/// The reserved resource holding credential documents
pub const AUTH_RESOURCE: &str = "user_authenticate";

/// Registers and validates credentials, minting tokens on success
pub struct CredentialGate {
    store: DocumentStore,
    registry: Registry,
    signer: TokenSigner,
    resource: ResourceName,
}

impl CredentialGate {
    pub fn new(store: DocumentStore, registry: Registry, signer: TokenSigner) -> Self {
        let resource =
            ResourceName::parse(AUTH_RESOURCE).expect("reserved resource name is valid");
        Self {
            store,
            registry,
            signer,
            resource,
        }
    }

    /// Create a credential document, rejecting a duplicate user
    pub fn register(&self, user: &str, auth: &str) -> Result<(), AuthError> {
        self.registry.ensure(&self.resource)?;

        let taken = self
            .store
            .list(&self.resource, &JsonMap::new())?
            .iter()
            .any(|doc| doc.body.get("user").and_then(Value::as_str) == Some(user));

        if taken {
            return Err(AuthError::UserExists(user.to_string()));
        }

        let mut body = JsonMap::new();
        body.insert("user".to_string(), Value::from(user));
        body.insert("auth".to_string(), Value::from(auth));
        self.store.insert(&self.resource, body)?;

        info!(user = %user, "registered user");
        Ok(())
    }

    /// Check a credential pair and mint a bearer token on a match.
    ///
    /// The pair binds as text unconditionally: credentials are opaque
    /// strings, so "12345" must match its stored form rather than being
    /// rebound as a number the way generic list filters are.
    pub fn validate(&self, user: &str, auth: &str) -> Result<String, AuthError> {
        self.registry.ensure(&self.resource)?;

        let matched = self
            .store
            .find_exact(&self.resource, &[("user", user), ("auth", auth)])?;

        if matched.is_empty() {
            warn!(user = %user, "credential validation failed");
            return Err(AuthError::InvalidCredentials);
        }

        self.signer.sign(user)
    }

    /// Verify a bearer token; no database round trip
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::UpdateBus;
    use crate::storage::SqliteBackend;
    use std::sync::Arc;

    fn gate() -> CredentialGate {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let bus = Arc::new(UpdateBus::new());
        let store = DocumentStore::new(backend.clone(), bus);
        let registry = Registry::new(backend);
        CredentialGate::new(store, registry, TokenSigner::new(b"gate-test-secret"))
    }

    #[test]
    fn test_register_validate_scenario() {
        let gate = gate();

        gate.register("alice", "s3cret").unwrap();
        assert!(matches!(
            gate.register("alice", "other"),
            Err(AuthError::UserExists(_))
        ));

        let token = gate.validate("alice", "s3cret").unwrap();
        assert!(!token.is_empty());

        let claims = gate.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");

        assert!(matches!(
            gate.validate("alice", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            gate.validate("nobody", "s3cret"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_numeric_secret_validates() {
        let gate = gate();

        gate.register("alice", "12345").unwrap();
        let token = gate.validate("alice", "12345").unwrap();
        assert_eq!(gate.verify(&token).unwrap().sub, "alice");

        assert!(matches!(
            gate.validate("alice", "12346"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_numeric_username_validates() {
        let gate = gate();

        gate.register("1001", "pw").unwrap();
        let token = gate.validate("1001", "pw").unwrap();
        assert_eq!(gate.verify(&token).unwrap().sub, "1001");
    }

    #[test]
    fn test_same_auth_different_users() {
        let gate = gate();

        gate.register("alice", "shared").unwrap();
        gate.register("bob", "shared").unwrap();

        // Both must validate; the match is on the exact pair
        gate.validate("alice", "shared").unwrap();
        gate.validate("bob", "shared").unwrap();
    }
}
