//! Room registry.
//!
//! Binds live connections to user ids so chat and call events can be
//! addressed by identity. A user's room is the set of connections whose last
//! `join` named that user. Delivery is at-most-once and best-effort: an event
//! addressed to a user with an empty room is dropped without error.
//!
//! All maps are concurrent (DashMap). Guards are never held across two maps
//! at once.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Transport-level session identifier.
pub type ConnectionId = Uuid;

/// A connection's outbound event channel.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Clone, Default)]
pub struct RoomRegistry {
    /// Every live connection, joined or not.
    connections: Arc<DashMap<ConnectionId, ClientSender>>,

    /// Connection → the user id it last joined as.
    bindings: Arc<DashMap<ConnectionId, String>>,

    /// User id → connections in that user's room.
    rooms: Arc<DashMap<String, HashSet<ConnectionId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Connection Lifecycle ──────────────────────────────────────────────

    /// Track a newly opened connection and its outbound channel.
    pub fn attach(&self, connection_id: ConnectionId, sender: ClientSender) {
        self.connections.insert(connection_id, sender);
    }

    /// Bind a connection to `user_id`'s room.
    ///
    /// Idempotent. Re-joining under another id moves the connection out of
    /// its previous room. Returns the previously bound user id, if any.
    pub fn join(&self, connection_id: ConnectionId, user_id: &str) -> Option<String> {
        let previous = self.bindings.insert(connection_id, user_id.to_string());

        if let Some(ref old) = previous {
            if old != user_id {
                self.leave_room(old, connection_id);
            }
        }

        self.rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);

        tracing::debug!(
            connection = %connection_id,
            user_id = user_id,
            previous = previous.as_deref(),
            "Connection joined room"
        );

        previous
    }

    /// Forget a closed connection. Removes its room membership without
    /// notifying anyone. Returns the user id it was bound to.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Option<String> {
        self.connections.remove(&connection_id);
        let (_, user_id) = self.bindings.remove(&connection_id)?;
        self.leave_room(&user_id, connection_id);
        Some(user_id)
    }

    fn leave_room(&self, user_id: &str, connection_id: ConnectionId) {
        if let Some(mut room) = self.rooms.get_mut(user_id) {
            room.remove(&connection_id);
        }
        self.rooms.remove_if(user_id, |_, room| room.is_empty());
    }

    // ── Delivery ──────────────────────────────────────────────────────────

    /// Deliver an event to every connection in `user_id`'s room.
    /// Returns how many connections it reached; zero means the user is offline.
    pub fn emit_to(&self, user_id: &str, event: ServerEvent) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(user_id) {
            Some(room) => room.iter().copied().collect(),
            None => return 0,
        };

        members
            .into_iter()
            .filter(|connection_id| self.emit_to_connection(*connection_id, event.clone()))
            .count()
    }

    /// Deliver an event to one specific connection.
    pub fn emit_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(&connection_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event to every joined connection except `origin`.
    pub fn broadcast_except(&self, origin: ConnectionId, event: ServerEvent) -> usize {
        let targets: Vec<ConnectionId> = self
            .bindings
            .iter()
            .map(|entry| *entry.key())
            .filter(|connection_id| *connection_id != origin)
            .collect();

        targets
            .into_iter()
            .filter(|connection_id| self.emit_to_connection(*connection_id, event.clone()))
            .count()
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// The user id a connection is currently bound to.
    pub fn user_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.bindings.get(&connection_id).map(|entry| entry.value().clone())
    }

    /// Number of live connections, joined or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of users with at least one joined connection.
    pub fn online_user_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
impl RoomRegistry {
    pub(crate) fn is_online(&self, user_id: &str) -> bool {
        self.rooms.contains_key(user_id)
    }

    pub(crate) fn room_size(&self, user_id: &str) -> usize {
        self.rooms.get(user_id).map(|room| room.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &RoomRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.attach(id, tx);
        (id, rx)
    }

    #[test]
    fn test_fan_out_to_every_connection_of_a_user() {
        let registry = RoomRegistry::new();
        let (c1, mut rx1) = connect(&registry);
        let (c2, mut rx2) = connect(&registry);

        registry.join(c1, "student-1");
        registry.join(c2, "student-1");

        assert_eq!(registry.emit_to("student-1", ServerEvent::Pong), 2);
        assert!(matches!(rx1.try_recv().unwrap(), ServerEvent::Pong));
        assert!(matches!(rx2.try_recv().unwrap(), ServerEvent::Pong));
    }

    #[test]
    fn test_emit_to_offline_user_is_silent() {
        let registry = RoomRegistry::new();
        let (c1, mut rx1) = connect(&registry);
        registry.join(c1, "student-1");

        assert_eq!(registry.emit_to("nobody", ServerEvent::Pong), 0);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let (c1, mut rx1) = connect(&registry);

        assert_eq!(registry.join(c1, "student-1"), None);
        assert_eq!(registry.join(c1, "student-1"), Some("student-1".to_string()));
        assert_eq!(registry.room_size("student-1"), 1);

        assert_eq!(registry.emit_to("student-1", ServerEvent::Pong), 1);
        rx1.try_recv().unwrap();
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_rejoin_under_new_id_moves_connection() {
        let registry = RoomRegistry::new();
        let (c1, _rx1) = connect(&registry);

        registry.join(c1, "student-1");
        let previous = registry.join(c1, "counselor-1");

        assert_eq!(previous.as_deref(), Some("student-1"));
        assert!(!registry.is_online("student-1"));
        assert_eq!(registry.user_of(c1).as_deref(), Some("counselor-1"));
        assert_eq!(registry.emit_to("student-1", ServerEvent::Pong), 0);
        assert_eq!(registry.emit_to("counselor-1", ServerEvent::Pong), 1);
    }

    #[test]
    fn test_disconnect_unbinds_only_that_connection() {
        let registry = RoomRegistry::new();
        let (c1, _rx1) = connect(&registry);
        let (c2, mut rx2) = connect(&registry);
        registry.join(c1, "student-1");
        registry.join(c2, "student-1");

        assert_eq!(registry.disconnect(c1).as_deref(), Some("student-1"));
        assert_eq!(registry.room_size("student-1"), 1);
        assert_eq!(registry.emit_to("student-1", ServerEvent::Pong), 1);
        rx2.try_recv().unwrap();

        registry.disconnect(c2);
        assert!(!registry.is_online("student-1"));
        assert_eq!(registry.online_user_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_without_join() {
        let registry = RoomRegistry::new();
        let (c1, _rx1) = connect(&registry);
        assert_eq!(registry.disconnect(c1), None);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_closed_receiver_is_not_counted() {
        let registry = RoomRegistry::new();
        let (c1, rx1) = connect(&registry);
        registry.join(c1, "student-1");
        drop(rx1);

        assert_eq!(registry.emit_to("student-1", ServerEvent::Pong), 0);
    }

    #[test]
    fn test_broadcast_skips_origin_and_unjoined() {
        let registry = RoomRegistry::new();
        let (origin, mut rx_origin) = connect(&registry);
        let (joined, mut rx_joined) = connect(&registry);
        let (_lurker, mut rx_lurker) = connect(&registry);

        registry.join(origin, "student-1");
        registry.join(joined, "counselor-1");

        let reached = registry.broadcast_except(
            origin,
            ServerEvent::ReadyForCall {
                student_id: "student-1".to_string(),
            },
        );

        assert_eq!(reached, 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(rx_lurker.try_recv().is_err());
        match rx_joined.try_recv().unwrap() {
            ServerEvent::ReadyForCall { student_id } => assert_eq!(student_id, "student-1"),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_to_connection_before_join() {
        let registry = RoomRegistry::new();
        let (c1, mut rx1) = connect(&registry);
        assert!(registry.emit_to_connection(c1, ServerEvent::Pong));
        assert!(rx1.try_recv().is_ok());
        assert!(!registry.emit_to_connection(Uuid::new_v4(), ServerEvent::Pong));
    }
}
