//! The group registry: named, fixed member sets used as `send` targets.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    connections::ConnectionRegistry,
    error::GroupError,
    protocol::{canonical_member_list, parse_member_list, validate_name},
};

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `group` with the members listed in `requested` plus `creator`.
    ///
    /// Every check runs before anything is stored: on error the registry is
    /// untouched. On success returns the canonical member list.
    pub fn create(
        &mut self,
        group: &str,
        requested: &str,
        creator: &str,
        clients: &ConnectionRegistry,
    ) -> Result<String, GroupError> {
        validate_name(group)?;
        if self.contains(group) || clients.contains(group) {
            return Err(GroupError::NameTaken(group.to_string()));
        }

        let mut members = parse_member_list(requested);
        if members.is_empty() {
            return Err(GroupError::NoMembers);
        }
        if requested == creator {
            return Err(GroupError::SelfOnly);
        }
        if let Some(unknown) = members.iter().find(|member| !clients.contains(member)) {
            return Err(GroupError::UnknownMember(unknown.clone()));
        }

        members.insert(creator.to_string());
        let canonical = canonical_member_list(&members);
        self.groups.insert(group.to_string(), members);
        Ok(canonical)
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// `false` for unknown groups.
    pub fn is_member(&self, client: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(client))
    }

    /// Members of `group` in sorted order; empty for unknown groups.
    pub fn members_of(&self, group: &str) -> Vec<&str> {
        self.groups
            .get(group)
            .map(|members| members.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Drops `client` from every group. Returns how many groups it left.
    ///
    /// Groups stay registered even if this empties them, so their names
    /// remain reserved.
    pub fn remove_member(&mut self, client: &str) -> usize {
        self.groups
            .values_mut()
            .map(|members| members.remove(client))
            .filter(|removed| *removed)
            .count()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
