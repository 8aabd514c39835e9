//! Client-side chat view.
//!
//! The relay echoes every persisted message back to the sender's room, so a
//! client never renders its own optimistic copy. [`Conversation`] folds relay
//! events into one ordered view and drops duplicates by id, or by
//! `(text, timestamp, from)` when the same record arrives twice under races
//! between tabs.

use crate::protocol::{ChatMessageData, RelayClientEvent, RelayServerEvent};

/// Capitalize the first character. Cosmetic only; the relay stores whatever
/// it is sent.
pub fn normalize_text(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build a `sendMessage` event. Returns None for blank text.
pub fn compose_message(
    from: &str,
    to: &str,
    text: &str,
    client_timestamp: Option<i64>,
) -> Option<RelayClientEvent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(RelayClientEvent::SendMessage {
        to: to.to_string(),
        from: from.to_string(),
        text: normalize_text(trimmed),
        timestamp: client_timestamp,
    })
}

/// A send the relay could not persist, kept so the UI can offer a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSend {
    pub text: String,
    pub client_timestamp: Option<i64>,
    pub reason: String,
}

/// One user's view of a conversation with one peer.
#[derive(Debug, Clone)]
pub struct Conversation {
    self_id: String,
    peer_id: String,
    messages: Vec<ChatMessageData>,
    failed: Vec<FailedSend>,
}

impl Conversation {
    pub fn new(self_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            peer_id: peer_id.into(),
            messages: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Seed the view from a history fetch.
    pub fn load(&mut self, history: Vec<ChatMessageData>) {
        for message in history {
            self.insert(message);
        }
    }

    pub fn messages(&self) -> &[ChatMessageData] {
        &self.messages
    }

    pub fn failed(&self) -> &[FailedSend] {
        &self.failed
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Build a `sendMessage` to the peer. Nothing is added to the view
    /// until the relay echoes the stored record.
    pub fn compose(&self, text: &str, client_timestamp: Option<i64>) -> Option<RelayClientEvent> {
        compose_message(&self.self_id, &self.peer_id, text, client_timestamp)
    }

    /// Read receipts owed for peer messages not yet marked seen by us.
    pub fn pending_receipts(&self) -> Vec<RelayClientEvent> {
        self.messages
            .iter()
            .filter(|m| m.from == self.peer_id && !m.seen_by.contains(&self.self_id))
            .map(|m| RelayClientEvent::MessageSeen {
                message_id: m.id.clone(),
                user_id: self.self_id.clone(),
            })
            .collect()
    }

    fn belongs(&self, message: &ChatMessageData) -> bool {
        (message.from == self.self_id && message.to == self.peer_id)
            || (message.from == self.peer_id && message.to == self.self_id)
    }

    fn is_duplicate(&self, message: &ChatMessageData) -> bool {
        self.messages.iter().any(|m| {
            m.id == message.id
                || (m.text == message.text
                    && m.timestamp == message.timestamp
                    && m.from == message.from)
        })
    }

    fn insert(&mut self, message: ChatMessageData) -> bool {
        if !self.belongs(&message) || self.is_duplicate(&message) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        true
    }

    /// Fold a relay event into the view. Returns whether anything changed.
    pub fn apply(&mut self, event: &RelayServerEvent) -> bool {
        match event {
            RelayServerEvent::ReceiveMessage(message) => self.insert(message.clone()),
            RelayServerEvent::MessageDeleted { message_id } => {
                let before = self.messages.len();
                self.messages.retain(|m| &m.id != message_id);
                self.messages.len() != before
            }
            RelayServerEvent::MessageEdited(edited) => {
                match self.messages.iter_mut().find(|m| m.id == edited.id) {
                    Some(existing) => {
                        existing.text = edited.text.clone();
                        existing.edited = true;
                        true
                    }
                    None => false,
                }
            }
            RelayServerEvent::MessageSeenUpdate {
                message_id,
                user_id,
            } => match self.messages.iter_mut().find(|m| &m.id == message_id) {
                Some(existing) if !existing.seen_by.contains(user_id) => {
                    existing.seen_by.push(user_id.clone());
                    true
                }
                _ => false,
            },
            RelayServerEvent::SendFailed {
                to,
                text,
                client_timestamp,
                reason,
            } if *to == self.peer_id => {
                self.failed.push(FailedSend {
                    text: text.clone(),
                    client_timestamp: *client_timestamp,
                    reason: reason.clone(),
                });
                true
            }
            _ => false,
        }
    }

    /// Take back a failed send for retry.
    pub fn take_failed(&mut self, client_timestamp: Option<i64>) -> Option<FailedSend> {
        let at = self
            .failed
            .iter()
            .position(|f| f.client_timestamp == client_timestamp)?;
        Some(self.failed.remove(at))
    }
}
