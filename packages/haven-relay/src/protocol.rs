//! Relay protocol event definitions.
//!
//! The relay speaks a JSON-over-WebSocket protocol. Every frame is an object
//! tagged by `"type"` carrying the event name (`join`, `sendMessage`,
//! `incomingCall`, ...). Call signal payloads are opaque to the relay; it
//! routes them without looking inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Events sent from a client to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a user's room.
    /// Must be sent before any chat or call event.
    Join {
        user_id: String,
    },

    /// Persist a chat message and relay it to the recipient.
    SendMessage {
        to: String,
        from: String,
        text: String,
        /// Client-side send time, echoed back on failure so the client can
        /// match the failed entry. The persisted record gets a server time.
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Hard-delete a message. `from`/`to` are advisory; the stored record
    /// decides who is notified.
    DeleteMessage {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },

    /// Replace the text of a message the sender owns.
    EditMessage {
        #[serde(rename = "_id")]
        id: String,
        text: String,
    },

    /// Read receipt.
    MessageSeen {
        message_id: String,
        user_id: String,
    },

    /// Offer a call to another user.
    CallUser {
        from: String,
        to: String,
        signal_data: Value,
    },

    /// Answer an incoming call.
    AnswerCall {
        to: String,
        signal: Value,
    },

    /// Callee announces that its media devices are ready. Without `to` the
    /// announcement goes to every other connected client.
    ReadyForCall {
        student_id: String,
        #[serde(default)]
        to: Option<String>,
    },

    /// Tear down a call.
    EndCall {
        to: String,
    },

    /// Keep-alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Events sent from the relay server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Acknowledgement of a `join`.
    Joined {
        user_id: String,
    },

    /// A persisted chat message.
    ReceiveMessage(ChatMessage),

    /// A message was deleted; drop it from the view.
    MessageDeleted {
        message_id: String,
    },

    /// A message was edited in place.
    MessageEdited(ChatMessage),

    /// `user_id` has seen `message_id`.
    MessageSeenUpdate {
        message_id: String,
        user_id: String,
    },

    /// The message could not be persisted and was not relayed.
    SendFailed {
        to: String,
        text: String,
        client_timestamp: Option<i64>,
        reason: String,
    },

    /// A delete request was refused.
    DeleteFailed {
        #[serde(rename = "_id")]
        id: String,
        reason: String,
    },

    /// An edit request was refused.
    EditFailed {
        #[serde(rename = "_id")]
        id: String,
        reason: String,
    },

    /// An offer from a caller.
    IncomingCall {
        from: String,
        signal_data: Value,
    },

    /// The callee's answer.
    CallAccepted {
        from: String,
        signal: Value,
    },

    /// A callee is ready to receive an offer.
    ReadyForCall {
        student_id: String,
    },

    /// The counterpart hung up.
    CallEnded {
        from: String,
    },

    /// Protocol-level error response.
    Error {
        message: String,
    },

    /// Pong response to keep connection alive.
    Pong,
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// A chat message as clients see it: plaintext text, server-assigned id and
/// timestamp (milliseconds since the Unix epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: i64,
    pub edited: bool,
    pub seen_by: Vec<String>,
}

impl ChatMessage {
    /// Whether `user_id` is one of the two parties of this message.
    pub fn involves(&self, user_id: &str) -> bool {
        self.from == user_id || self.to == user_id
    }
}
