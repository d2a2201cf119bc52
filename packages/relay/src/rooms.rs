//! Room membership bookkeeping.
//!
//! The registry is the single source of truth for which connections are in
//! which rooms. It performs no I/O; the router mutates it under the lock
//! discipline described in [`crate::process_message`].

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ConnectionId, RoomId};

/// Tracks which connections are joined to which rooms.
///
/// Rooms are created lazily on first join and removed as soon as their last
/// member leaves, so a room present in the registry always has at least one
/// member.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Map of room name to participant IDs in that room.
    rooms: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to the room, creating the room if it does not
    /// exist, and returns the members that were present before the join.
    ///
    /// Joining a room twice has the same observable effect as joining once;
    /// the returned set never contains the joining connection itself.
    pub fn join(&mut self, room: &str, connection_id: &str) -> BTreeSet<ConnectionId> {
        let members = self.rooms.entry(room.to_owned()).or_default();

        let prior = members
            .iter()
            .filter(|id| id.as_str() != connection_id)
            .cloned()
            .collect();

        members.insert(connection_id.to_owned());

        prior
    }

    /// Removes the connection from every room it belongs to and returns the
    /// rooms it left.
    ///
    /// Rooms left empty are dropped from the registry.
    pub fn leave(&mut self, connection_id: &str) -> Vec<RoomId> {
        let mut left = Vec::new();

        self.rooms.retain(|name, members| {
            if members.remove(connection_id) {
                left.push(name.clone());
            }
            !members.is_empty()
        });

        left
    }

    /// Returns the members of the room excluding `connection_id`, or an empty
    /// set if the room does not exist.
    #[must_use]
    pub fn members_except(&self, room: &str, connection_id: &str) -> BTreeSet<ConnectionId> {
        self.rooms.get(room).map_or_else(BTreeSet::new, |members| {
            members
                .iter()
                .filter(|id| id.as_str() != connection_id)
                .cloned()
                .collect()
        })
    }

    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    #[must_use]
    pub fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Number of rooms currently tracked.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_join_creates_room_and_returns_prior_members() {
        let mut registry = RoomRegistry::new();

        let prior = registry.join("r1", "a");
        assert!(prior.is_empty());
        assert!(registry.room_exists("r1"));

        let prior = registry.join("r1", "b");
        assert_eq!(prior.into_iter().collect::<Vec<_>>(), vec!["a".to_string()]);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");
        registry.join("r1", "b");

        let first = registry.join("r1", "b");
        let second = registry.join("r1", "b");

        assert_eq!(first, second);
        assert!(!first.contains("b"));
        assert_eq!(registry.members_except("r1", "a").len(), 1);
    }

    #[test]
    fn test_connection_can_join_multiple_rooms() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");
        registry.join("r2", "a");

        assert!(registry.room_exists("r1"));
        assert!(registry.room_exists("r2"));
        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn test_leave_removes_from_all_rooms_and_drops_empty_rooms() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");
        registry.join("r1", "b");
        registry.join("r2", "a");

        let left = registry.leave("a");

        assert_eq!(left, vec!["r1".to_string(), "r2".to_string()]);
        assert!(registry.room_exists("r1"));
        assert!(!registry.room_exists("r2"));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_leave_unknown_connection_is_noop() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");

        assert!(registry.leave("b").is_empty());
        assert!(registry.room_exists("r1"));
    }

    #[test]
    fn test_members_except_never_includes_caller() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");
        registry.join("r1", "b");
        registry.join("r1", "c");

        let members = registry.members_except("r1", "b");

        assert!(!members.contains("b"));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_is_member() {
        let mut registry = RoomRegistry::new();

        registry.join("r1", "a");

        assert!(registry.is_member("r1", "a"));
        assert!(!registry.is_member("r1", "b"));
        assert!(!registry.is_member("r2", "a"));
    }

    #[test]
    fn test_members_except_missing_room_is_empty() {
        let registry = RoomRegistry::new();

        assert!(registry.members_except("nope", "a").is_empty());
    }
}
