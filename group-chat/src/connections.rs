//! The connection registry: which live connection owns which client name.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::{error::RegisterError, groups::GroupRegistry};

/// Opaque handle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bidirectional name ⇄ connection map.
///
/// Both directions are kept in one structure so resolving the sender of a
/// command never scans the roster. The name side is a `BTreeMap`, which keeps
/// `who` output sorted and therefore reproducible.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_name: BTreeMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `connection`.
    ///
    /// Client and group names share one namespace, so a name already used by
    /// a group is refused just like one held by another client.
    pub fn register(
        &mut self,
        name: &str,
        connection: ConnectionId,
        groups: &GroupRegistry,
    ) -> Result<(), RegisterError> {
        if self.by_name.contains_key(name) || groups.contains(name) {
            return Err(RegisterError::NameTaken(name.to_string()));
        }
        if let Some(existing) = self.by_connection.get(&connection) {
            return Err(RegisterError::AlreadyRegistered(existing.clone()));
        }

        self.by_name.insert(name.to_string(), connection);
        self.by_connection.insert(connection, name.to_string());
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<ConnectionId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Removes the binding for `name`. Unknown names are ignored.
    pub fn unregister(&mut self, name: &str) -> Option<ConnectionId> {
        let connection = self.by_name.remove(name)?;
        self.by_connection.remove(&connection);
        Some(connection)
    }

    /// Removes whatever name `connection` was registered under.
    pub fn unregister_connection(&mut self, connection: ConnectionId) -> Option<String> {
        let name = self.by_connection.remove(&connection)?;
        self.by_name.remove(&name);
        Some(name)
    }

    /// Registered client names in sorted order.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
