use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use minichat_db::Database;
use minichat_db::models::UserRow;
use minichat_types::models::{Role, User};

/// Credential record of a registered user.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl Identity {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            online: self.online,
            last_seen: self.last_seen,
        }
    }
}

impl TryFrom<UserRow> for Identity {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let last_seen = minichat_db::parse_timestamp(&row.last_seen).unwrap_or_else(|e| {
            warn!("Corrupt last_seen '{}' on user '{}': {}", row.last_seen, row.username, e);
            DateTime::default()
        });

        Ok(Self {
            id: row.id.parse()?,
            role: Role::from_stored(row.role.as_deref()),
            username: row.username,
            email: row.email,
            password_hash: row.password,
            online: row.online,
            last_seen,
        })
    }
}

/// Lookup of credentials by username. The only storage the authentication
/// path depends on.
pub trait IdentityStore: Send + Sync {
    fn find_identity(&self, username: &str) -> Result<Option<Identity>>;
}

impl IdentityStore for Database {
    fn find_identity(&self, username: &str) -> Result<Option<Identity>> {
        self.get_user_by_username(username)?
            .map(Identity::try_from)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_registered_identity_with_default_role() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            "alice",
            "alice@example.com",
            "hash",
            "",
            "2024-01-01T00:00:00.000000Z",
        )
        .unwrap();

        let identity = db.find_identity("alice").unwrap().unwrap();
        assert_eq!(identity.id, id);
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.to_user().email, "alice@example.com");
        assert!(db.find_identity("bob").unwrap().is_none());
    }
}
