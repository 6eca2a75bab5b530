use minichat_auth::AuthenticatedUser;

/// Lifecycle of one gateway connection:
/// `Unauthenticated -> Bound -> Closed`, never back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Unauthenticated,
    Bound(AuthenticatedUser),
    Closed,
}

impl ConnectionState {
    /// Attach an identity. First bind wins: returns `false` and leaves the
    /// state untouched if the connection is already bound or closed.
    pub fn bind(&mut self, user: AuthenticatedUser) -> bool {
        match self {
            Self::Unauthenticated => {
                *self = Self::Bound(user);
                true
            }
            Self::Bound(_) | Self::Closed => false,
        }
    }

    pub fn identity(&self) -> Option<&AuthenticatedUser> {
        match self {
            Self::Bound(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// Close the connection, returning the identity it was bound to.
    pub fn close(&mut self) -> Option<AuthenticatedUser> {
        match std::mem::replace(self, Self::Closed) {
            Self::Bound(user) => Some(user),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minichat_types::models::Role;

    fn user(name: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            username: name.to_string(),
            role: Role::User,
        }
    }

    #[test]
    fn first_bind_wins() {
        let mut state = ConnectionState::default();
        assert!(state.bind(user("alice")));
        assert!(!state.bind(user("mallory")));
        assert_eq!(state.identity().map(|u| u.username.as_str()), Some("alice"));
    }

    #[test]
    fn closed_connection_cannot_bind() {
        let mut state = ConnectionState::default();
        assert_eq!(state.close(), None);
        assert!(!state.bind(user("alice")));
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn close_returns_bound_identity() {
        let mut state = ConnectionState::default();
        state.bind(user("alice"));
        assert_eq!(state.close(), Some(user("alice")));
        assert!(state.identity().is_none());
    }
}
