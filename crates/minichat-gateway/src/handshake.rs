use serde::Deserialize;
use tracing::{debug, warn};

use minichat_auth::{AuthenticatedUser, Authenticator, bearer_token};

/// How the connection-time identity claim is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// Only a valid token binds an identity.
    #[default]
    VerifiedToken,
    /// A valid token binds as above; failing that, a bare `username` claim
    /// is trusted without verification.
    TrustClaimedUsername,
}

/// Identity material presented when a connection opens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeMetadata {
    pub token: Option<String>,
    pub username: Option<String>,
}

impl HandshakeMetadata {
    /// Fill gaps from request headers (`Authorization: Bearer`, `username`).
    pub fn with_headers(mut self, authorization: Option<&str>, username: Option<&str>) -> Self {
        if self.token.is_none() {
            self.token = authorization.and_then(bearer_token).map(str::to_string);
        }
        if self.username.is_none() {
            self.username = username.map(str::to_string);
        }
        self
    }
}

/// Decide which identity, if any, a new connection is bound to.
/// Performs a blocking storage lookup when a token is present.
pub fn resolve(
    metadata: &HandshakeMetadata,
    mode: HandshakeMode,
    authenticator: &Authenticator,
) -> Option<AuthenticatedUser> {
    if let Some(token) = metadata.token.as_deref() {
        if let Some(user) = authenticator.authenticate_token(token) {
            return Some(user);
        }
        debug!("Handshake token rejected");
    }

    match (mode, metadata.username.as_deref()) {
        (HandshakeMode::TrustClaimedUsername, Some(claimed)) => {
            let user = authenticator.bind_claim(claimed);
            if let Some(user) = &user {
                warn!("Binding unverified handshake claim '{}'", user.username);
            }
            user
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use minichat_auth::TokenService;
    use minichat_db::Database;
    use std::sync::Arc;

    fn authenticator() -> Authenticator {
        let db = Database::open_in_memory().unwrap();
        db.create_user(
            &uuid::Uuid::new_v4().to_string(),
            "alice",
            "alice@example.com",
            "hash",
            "user",
            "2024-01-01T00:00:00.000000Z",
        )
        .unwrap();
        Authenticator::new(TokenService::new("secret", Duration::hours(1)), Arc::new(db))
    }

    #[test]
    fn token_binds_in_both_modes() {
        let auth = authenticator();
        let meta = HandshakeMetadata {
            token: Some(auth.tokens().issue("alice").unwrap()),
            username: Some("mallory".into()),
        };
        for mode in [HandshakeMode::VerifiedToken, HandshakeMode::TrustClaimedUsername] {
            assert_eq!(resolve(&meta, mode, &auth).unwrap().username, "alice");
        }
    }

    #[test]
    fn bare_claim_needs_trust_mode() {
        let auth = authenticator();
        let meta = HandshakeMetadata {
            token: None,
            username: Some("bob".into()),
        };
        assert!(resolve(&meta, HandshakeMode::VerifiedToken, &auth).is_none());
        assert_eq!(
            resolve(&meta, HandshakeMode::TrustClaimedUsername, &auth).unwrap().username,
            "bob"
        );
    }

    #[test]
    fn nothing_presented_stays_anonymous() {
        let auth = authenticator();
        let meta = HandshakeMetadata::default().with_headers(Some("Basic xyz"), None);
        assert!(meta.token.is_none());
        assert!(resolve(&meta, HandshakeMode::TrustClaimedUsername, &auth).is_none());
    }

    #[test]
    fn headers_fill_missing_fields_only() {
        let meta = HandshakeMetadata {
            token: Some("from-query".into()),
            username: None,
        }
        .with_headers(Some("Bearer from-header"), Some("carol"));
        assert_eq!(meta.token.as_deref(), Some("from-query"));
        assert_eq!(meta.username.as_deref(), Some("carol"));
    }
}
