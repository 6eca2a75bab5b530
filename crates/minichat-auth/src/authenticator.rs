use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use minichat_types::models::Role;

use crate::identity::IdentityStore;
use crate::token::TokenService;

/// Identity attached to a request or bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: Role,
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verification core shared by request-scoped and connection-scoped auth.
///
/// Every method answers "who is this?" with `Some` or `None`. Failures are
/// never errors here; deciding whether an anonymous caller may proceed is
/// left to the caller.
#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenService,
    store: Arc<dyn IdentityStore>,
}

impl Authenticator {
    pub fn new(tokens: TokenService, store: Arc<dyn IdentityStore>) -> Self {
        Self { tokens, store }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verify signature and expiry, then require that the subject still
    /// resolves to a stored identity with the same username.
    ///
    /// Performs a blocking storage lookup.
    pub fn authenticate_token(&self, token: &str) -> Option<AuthenticatedUser> {
        let subject = match self.tokens.decode(token) {
            Ok(claims) => claims.sub,
            Err(e) => {
                debug!("Rejected token: {}", e);
                return None;
            }
        };

        let identity = match self.store.find_identity(&subject) {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("Token subject '{}' has no identity", subject);
                return None;
            }
            Err(e) => {
                warn!("Identity lookup for '{}' failed: {}", subject, e);
                return None;
            }
        };

        if identity.username != subject {
            warn!("Token subject '{}' resolved to '{}'", subject, identity.username);
            return None;
        }

        Some(AuthenticatedUser {
            username: identity.username,
            role: identity.role,
        })
    }

    /// Same as [`Self::authenticate_token`], reading an `Authorization` value.
    pub fn authenticate_bearer(&self, header: &str) -> Option<AuthenticatedUser> {
        bearer_token(header).and_then(|token| self.authenticate_token(token))
    }

    /// Accept a client-claimed username without any verification.
    ///
    /// This is the legacy handshake binding: the claim is trusted as-is and
    /// the identity store is not consulted.
    pub fn bind_claim(&self, claimed: &str) -> Option<AuthenticatedUser> {
        let username = claimed.trim();
        if username.is_empty() {
            return None;
        }
        Some(AuthenticatedUser {
            username: username.to_string(),
            role: Role::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use chrono::{Duration, Utc};
    use minichat_db::Database;
    use uuid::Uuid;

    fn authenticator_with(db: Database) -> Authenticator {
        Authenticator::new(
            TokenService::new("secret", Duration::hours(1)),
            Arc::new(db),
        )
    }

    fn db_with_alice() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(
            &Uuid::new_v4().to_string(),
            "alice",
            "alice@example.com",
            "hash",
            "user",
            "2024-01-01T00:00:00.000000Z",
        )
        .unwrap();
        db
    }

    struct FailingStore;

    impl IdentityStore for FailingStore {
        fn find_identity(&self, _username: &str) -> anyhow::Result<Option<Identity>> {
            anyhow::bail!("storage unavailable")
        }
    }

    #[test]
    fn valid_token_for_existing_user() {
        let auth = authenticator_with(db_with_alice());
        let token = auth.tokens().issue("alice").unwrap();

        let user = auth.authenticate_token(&token).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::User);

        let header = format!("Bearer {}", token);
        assert_eq!(auth.authenticate_bearer(&header), Some(user));
    }

    #[test]
    fn signed_token_for_unknown_user_is_rejected() {
        let auth = authenticator_with(db_with_alice());
        let token = auth.tokens().issue("ghost").unwrap();
        assert_eq!(auth.authenticate_token(&token), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = authenticator_with(db_with_alice());
        let token = auth
            .tokens()
            .issue_at("alice", Utc::now() - Duration::hours(3))
            .unwrap();
        assert_eq!(auth.authenticate_token(&token), None);
    }

    #[test]
    fn storage_failure_means_unauthenticated() {
        let tokens = TokenService::new("secret", Duration::hours(1));
        let token = tokens.issue("alice").unwrap();
        let auth = Authenticator::new(tokens, Arc::new(FailingStore));
        assert_eq!(auth.authenticate_token(&token), None);
    }

    #[test]
    fn bearer_prefix_is_required() {
        let auth = authenticator_with(db_with_alice());
        let token = auth.tokens().issue("alice").unwrap();
        assert_eq!(auth.authenticate_bearer(&token), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
    }

    #[test]
    fn claim_binding_trusts_the_claim() {
        let auth = authenticator_with(Database::open_in_memory().unwrap());
        assert_eq!(auth.bind_claim("  ").map(|u| u.username), None);
        assert_eq!(
            auth.bind_claim("nobody").map(|u| u.username).as_deref(),
            Some("nobody")
        );
    }
}
