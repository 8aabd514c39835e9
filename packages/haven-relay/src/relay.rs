//! Message relay.
//!
//! Chat send/edit/delete/seen. Every durable change goes through the
//! [`ChatStore`]; every notification goes through the [`RoomRegistry`].
//! Failures are reported back to the initiating connection only and never
//! change what the other party sees.

use chrono::Utc;
use thiserror::Error;

use crate::protocol::{ChatMessage, ServerEvent};
use crate::registry::{ConnectionId, RoomRegistry};
use crate::store::{ChatStore, StoreError};

/// Who may hard-delete a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeletePolicy {
    /// Only the author of a message may delete it.
    #[default]
    SenderOnly,
    /// Either party of the conversation may delete it.
    EitherParty,
}

impl DeletePolicy {
    pub fn permits(&self, actor: &str, message: &ChatMessage) -> bool {
        match self {
            DeletePolicy::SenderOnly => message.from == actor,
            DeletePolicy::EitherParty => message.involves(actor),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Message text must not be empty")]
    EmptyMessage,

    #[error("Message not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct MessageRelay {
    registry: RoomRegistry,
    store: ChatStore,
    delete_policy: DeletePolicy,
}

impl MessageRelay {
    pub fn new(registry: RoomRegistry, store: ChatStore, delete_policy: DeletePolicy) -> Self {
        Self {
            registry,
            store,
            delete_policy,
        }
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Run a store call off the event loop.
    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ChatStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {}", e)))?
    }

    // ── Send ──────────────────────────────────────────────────────────────

    /// Persist a message and deliver the stored record to both rooms.
    ///
    /// The sender's room gets the same record so every open tab converges on
    /// the server copy. On failure only the initiating connection hears
    /// about it, with enough context to offer a retry.
    pub async fn send(
        &self,
        origin: ConnectionId,
        from: &str,
        to: &str,
        text: &str,
        client_timestamp: Option<i64>,
    ) -> Result<ChatMessage, RelayError> {
        let result = self.persist(from, to, text).await;

        match result {
            Ok(message) => {
                let delivered =
                    self.registry
                        .emit_to(to, ServerEvent::ReceiveMessage(message.clone()));
                if from != to {
                    self.registry
                        .emit_to(from, ServerEvent::ReceiveMessage(message.clone()));
                }

                tracing::debug!(
                    message_id = message.id.as_str(),
                    from = from,
                    to = to,
                    delivered = delivered,
                    "Relayed chat message"
                );
                Ok(message)
            }
            Err(e) => {
                tracing::warn!(from = from, to = to, error = %e, "Failed to persist chat message");
                self.registry.emit_to_connection(
                    origin,
                    ServerEvent::SendFailed {
                        to: to.to_string(),
                        text: text.to_string(),
                        client_timestamp,
                        reason: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn persist(&self, from: &str, to: &str, text: &str) -> Result<ChatMessage, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let (from, to, text) = (from.to_string(), to.to_string(), text.to_string());
        let timestamp = Utc::now().timestamp_millis();
        let message = self
            .with_store(move |store| store.create(&from, &to, &text, timestamp))
            .await?;
        Ok(message)
    }

    // ── Delete ────────────────────────────────────────────────────────────

    /// Hard-delete a message on behalf of a connected client.
    pub async fn delete(
        &self,
        origin: ConnectionId,
        actor: &str,
        message_id: &str,
    ) -> Result<ChatMessage, RelayError> {
        let result = self.remove(actor, message_id).await;

        if let Err(ref e) = result {
            tracing::debug!(actor = actor, message_id = message_id, error = %e, "Delete refused");
            self.registry.emit_to_connection(
                origin,
                ServerEvent::DeleteFailed {
                    id: message_id.to_string(),
                    reason: e.to_string(),
                },
            );
        }

        result
    }

    /// Delete requested outside a socket session (HTTP). Notifies the same
    /// rooms as a socket delete.
    pub async fn delete_out_of_band(
        &self,
        actor: &str,
        message_id: &str,
    ) -> Result<ChatMessage, RelayError> {
        self.remove(actor, message_id).await
    }

    async fn remove(&self, actor: &str, message_id: &str) -> Result<ChatMessage, RelayError> {
        let id = message_id.to_string();
        let message = self
            .with_store(move |store| store.get(&id))
            .await?
            .ok_or(RelayError::NotFound)?;

        if !self.delete_policy.permits(actor, &message) {
            return Err(RelayError::Forbidden(match self.delete_policy {
                DeletePolicy::SenderOnly => "Only the sender may delete this message",
                DeletePolicy::EitherParty => "Only conversation participants may delete this message",
            }));
        }

        let id = message.id.clone();
        if !self.with_store(move |store| store.delete(&id)).await? {
            // Deleted concurrently by the other party.
            return Err(RelayError::NotFound);
        }

        let event = ServerEvent::MessageDeleted {
            message_id: message.id.clone(),
        };
        self.registry.emit_to(&message.from, event.clone());
        if message.to != message.from {
            self.registry.emit_to(&message.to, event);
        }

        tracing::info!(
            message_id = message.id.as_str(),
            actor = actor,
            "Deleted chat message"
        );
        Ok(message)
    }

    // ── Edit ──────────────────────────────────────────────────────────────

    /// Replace a message's text. Only the sender may edit.
    pub async fn edit(
        &self,
        origin: ConnectionId,
        actor: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<ChatMessage, RelayError> {
        let result = self.apply_edit(actor, message_id, new_text).await;

        match result {
            Ok(ref message) => {
                let event = ServerEvent::MessageEdited(message.clone());
                if message.to != message.from {
                    self.registry.emit_to(&message.to, event.clone());
                }
                self.registry.emit_to(&message.from, event);
            }
            Err(ref e) => {
                self.registry.emit_to_connection(
                    origin,
                    ServerEvent::EditFailed {
                        id: message_id.to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        }

        result
    }

    async fn apply_edit(
        &self,
        actor: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<ChatMessage, RelayError> {
        if new_text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let id = message_id.to_string();
        let existing = self
            .with_store(move |store| store.get(&id))
            .await?
            .ok_or(RelayError::NotFound)?;

        if existing.from != actor {
            return Err(RelayError::Forbidden("Only the sender may edit this message"));
        }

        let (id, text) = (message_id.to_string(), new_text.to_string());
        self.with_store(move |store| store.edit(&id, &text))
            .await?
            .ok_or(RelayError::NotFound)
    }

    // ── Seen ──────────────────────────────────────────────────────────────

    /// Record a read receipt and tell the sender. Repeats are no-ops.
    /// Returns whether this was the first receipt from `viewer`.
    pub async fn seen(
        &self,
        origin: ConnectionId,
        viewer: &str,
        message_id: &str,
    ) -> Result<bool, RelayError> {
        let result = self.record_seen(viewer, message_id).await;

        if let Err(ref e) = result {
            tracing::debug!(viewer = viewer, message_id = message_id, error = %e, "Seen refused");
            self.registry.emit_to_connection(
                origin,
                ServerEvent::Error {
                    message: format!("Cannot mark message '{}' seen: {}", message_id, e),
                },
            );
        }

        result
    }

    async fn record_seen(&self, viewer: &str, message_id: &str) -> Result<bool, RelayError> {
        let id = message_id.to_string();
        let message = self
            .with_store(move |store| store.get(&id))
            .await?
            .ok_or(RelayError::NotFound)?;

        if !message.involves(viewer) {
            return Err(RelayError::Forbidden("Only conversation participants may mark a message seen"));
        }

        let (id, user) = (message.id.clone(), viewer.to_string());
        let seen_at = Utc::now().timestamp_millis();
        let first = self
            .with_store(move |store| store.mark_seen(&id, &user, seen_at))
            .await?;

        if first {
            self.registry.emit_to(
                &message.from,
                ServerEvent::MessageSeenUpdate {
                    message_id: message.id,
                    user_id: viewer.to_string(),
                },
            );
        }

        Ok(first)
    }

    // ── History ───────────────────────────────────────────────────────────

    /// Decrypted conversation between two users, oldest first.
    pub async fn history(&self, my_id: &str, target_id: &str) -> Result<Vec<ChatMessage>, RelayError> {
        let (a, b) = (my_id.to_string(), target_id.to_string());
        Ok(self.with_store(move |store| store.conversation(&a, &b)).await?)
    }

    pub async fn message_count(&self) -> Result<usize, RelayError> {
        Ok(self.with_store(|store| store.message_count()).await?)
    }
}
