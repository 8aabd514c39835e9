//! Relay protocol, client side.
//!
//! Mirrors the relay server's event enums. Field names and event tags must
//! stay in step with the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent from client to relay server.
/// Must match the relay server's `ClientEvent` enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayClientEvent {
    Join {
        user_id: String,
    },
    SendMessage {
        to: String,
        from: String,
        text: String,
        timestamp: Option<i64>,
    },
    DeleteMessage {
        #[serde(rename = "_id")]
        id: String,
        from: Option<String>,
        to: Option<String>,
    },
    EditMessage {
        #[serde(rename = "_id")]
        id: String,
        text: String,
    },
    MessageSeen {
        message_id: String,
        user_id: String,
    },
    CallUser {
        from: String,
        to: String,
        signal_data: Value,
    },
    AnswerCall {
        to: String,
        signal: Value,
    },
    ReadyForCall {
        student_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    EndCall {
        to: String,
    },
    Ping,
}

/// Events received from the relay server.
/// Must match the relay server's `ServerEvent` enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayServerEvent {
    Joined {
        user_id: String,
    },
    ReceiveMessage(ChatMessageData),
    MessageDeleted {
        message_id: String,
    },
    MessageEdited(ChatMessageData),
    MessageSeenUpdate {
        message_id: String,
        user_id: String,
    },
    SendFailed {
        to: String,
        text: String,
        client_timestamp: Option<i64>,
        reason: String,
    },
    DeleteFailed {
        #[serde(rename = "_id")]
        id: String,
        reason: String,
    },
    EditFailed {
        #[serde(rename = "_id")]
        id: String,
        reason: String,
    },
    IncomingCall {
        from: String,
        signal_data: Value,
    },
    CallAccepted {
        from: String,
        signal: Value,
    },
    ReadyForCall {
        student_id: String,
    },
    CallEnded {
        from: String,
    },
    Error {
        message: String,
    },
    Pong,
}

/// A chat message as delivered by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageData {
    #[serde(rename = "_id")]
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub seen_by: Vec<String>,
}

/// Relay connection status.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayStatus {
    Disconnected,
    Connecting,
    Connected,
    Joined(String),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_serialization() {
        let json = serde_json::to_string(&RelayClientEvent::Join {
            user_id: "student-1".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"join","userId":"student-1"}"#);
    }

    #[test]
    fn test_ready_for_call_omits_missing_target() {
        let value = serde_json::to_value(RelayClientEvent::ReadyForCall {
            student_id: "student-1".to_string(),
            to: None,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "readyForCall", "studentId": "student-1"}));
    }

    #[test]
    fn test_receive_message_parsing() {
        let json = r#"{"type":"receiveMessage","_id":"m1","from":"a","to":"b","text":"Hello","timestamp":12345,"edited":false,"seenBy":[]}"#;
        match serde_json::from_str::<RelayServerEvent>(json).unwrap() {
            RelayServerEvent::ReceiveMessage(message) => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.text, "Hello");
                assert_eq!(message.timestamp, 12345);
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_incoming_call_parsing() {
        let json = r#"{"type":"incomingCall","from":"counselor-1","signalData":{"type":"offer"}}"#;
        match serde_json::from_str::<RelayServerEvent>(json).unwrap() {
            RelayServerEvent::IncomingCall { from, signal_data } => {
                assert_eq!(from, "counselor-1");
                assert_eq!(signal_data, json!({"type": "offer"}));
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_send_failed_parsing() {
        let json = r#"{"type":"sendFailed","to":"b","text":"Hi","clientTimestamp":5,"reason":"disk full"}"#;
        match serde_json::from_str::<RelayServerEvent>(json).unwrap() {
            RelayServerEvent::SendFailed { client_timestamp, reason, .. } => {
                assert_eq!(client_timestamp, Some(5));
                assert_eq!(reason, "disk full");
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_call_ended_parsing() {
        let msg: RelayServerEvent =
            serde_json::from_str(r#"{"type":"callEnded","from":"student-1"}"#).unwrap();
        assert_eq!(
            msg,
            RelayServerEvent::CallEnded {
                from: "student-1".to_string()
            }
        );
    }

    #[test]
    fn test_relay_status_equality() {
        assert_eq!(RelayStatus::Disconnected, RelayStatus::Disconnected);
        assert_ne!(
            RelayStatus::Joined("a".to_string()),
            RelayStatus::Joined("b".to_string())
        );
    }
}
