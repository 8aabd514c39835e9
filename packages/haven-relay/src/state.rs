//! Server state management.
//!
//! One `RelayState` is built at startup and cloned into every handler. It
//! owns the room registry and hands the same registry to the message relay
//! and the call coordinator, so all three agree on who is online.

use chrono::{DateTime, Utc};

use crate::relay::{DeletePolicy, MessageRelay};
use crate::registry::RoomRegistry;
use crate::signaling::CallCoordinator;
use crate::store::ChatStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// SQLite file for chat history. None = in-memory.
    pub database_path: Option<String>,
    pub delete_policy: DeletePolicy,
    /// Human-readable region label (e.g. "US East", "EU West")
    pub region: String,
    /// City or location description (e.g. "New York", "Frankfurt")
    pub location: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: None,
            delete_policy: DeletePolicy::default(),
            region: "US East".to_string(),
            location: "New York".to_string(),
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// User id → live connections.
    pub registry: RoomRegistry,

    /// Chat send/edit/delete/seen.
    pub relay: MessageRelay,

    /// Call offer/answer routing.
    pub coordinator: CallCoordinator,

    /// Server configuration.
    pub config: RelayConfig,

    pub started_at: DateTime<Utc>,
}

impl RelayState {
    /// Create a new relay state over an opened chat store.
    pub fn new(config: RelayConfig, store: ChatStore) -> Self {
        let registry = RoomRegistry::new();
        let relay = MessageRelay::new(registry.clone(), store, config.delete_policy);
        let coordinator = CallCoordinator::new(registry.clone());

        Self {
            registry,
            relay,
            coordinator,
            config,
            started_at: Utc::now(),
        }
    }

    /// Number of live WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Number of users with at least one joined connection.
    pub fn online_count(&self) -> usize {
        self.registry.online_user_count()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
