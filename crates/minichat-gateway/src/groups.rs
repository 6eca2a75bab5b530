use std::sync::Arc;

use thiserror::Error;

use minichat_types::models::Group;

use crate::store::GroupStore;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("{0}")]
    Validation(String),
    #[error("group {0} not found")]
    NotFound(i64),
    #[error("group storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Group membership, read straight from storage on every call.
///
/// Nothing is cached: membership may change between any two messages, so a
/// `members_of` result is only good for the routing call that asked for it.
/// All methods block on storage.
#[derive(Clone)]
pub struct GroupDirectory {
    store: Arc<dyn GroupStore>,
}

impl GroupDirectory {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self { store }
    }

    /// Create a group. The creator is always a member of the result.
    pub fn create(
        &self,
        name: Option<String>,
        members: Option<Vec<String>>,
        creator: &str,
    ) -> Result<Group, GroupError> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| GroupError::Validation("Group name and members are required".into()))?;
        let mut members = members
            .ok_or_else(|| GroupError::Validation("Group name and members are required".into()))?;

        members.retain(|m| !m.trim().is_empty());
        if !members.iter().any(|m| m == creator) {
            members.push(creator.to_string());
        }

        Ok(self.store.create_group(&name, &members)?)
    }

    pub fn get(&self, group_id: i64) -> Result<Group, GroupError> {
        self.store
            .find_group(group_id)?
            .ok_or(GroupError::NotFound(group_id))
    }

    pub fn members_of(&self, group_id: i64) -> Result<Vec<String>, GroupError> {
        self.get(group_id).map(|group| group.members)
    }

    pub fn groups_containing(&self, username: &str) -> Result<Vec<Group>, GroupError> {
        Ok(self.store.groups_with_member(username)?)
    }

    pub fn list(&self) -> Result<Vec<Group>, GroupError> {
        Ok(self.store.all_groups()?)
    }

    /// Replace a group's whole record (name and member list).
    pub fn replace(&self, group: &Group) -> Result<(), GroupError> {
        if self.store.update_group(group)? {
            Ok(())
        } else {
            Err(GroupError::NotFound(group.id))
        }
    }
}
