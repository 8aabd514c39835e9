//! WebSocket connection handler.
//!
//! Runs one connection for its lifetime: assigns a connection id, parses
//! client events in arrival order, and dispatches them to the message relay
//! or the call coordinator. Every event except `join` and `ping` requires
//! the connection to have joined a room first.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionId;
use crate::state::RelayState;

/// Handle a single WebSocket connection.
///
/// 1. Attaches an outbound channel to the registry under a fresh id
/// 2. Spawns a sender task draining that channel into the socket
/// 3. Processes incoming events until the connection closes
/// 4. Unbinds the connection; nobody is notified
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id: ConnectionId = Uuid::new_v4();

    // ── Step 1: Attach ────────────────────────────────────────────────────

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.attach(connection_id, tx);
    tracing::info!(connection = %connection_id, "WebSocket connected");

    // ── Step 2: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server event: {}", e);
                }
            }
        }
    });

    // ── Step 3: Process Events ────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(&state, connection_id, event).await;
                }
                Err(e) => {
                    tracing::warn!(
                        connection = %connection_id,
                        error = %e,
                        "Failed to parse client event"
                    );
                    state.registry.emit_to_connection(
                        connection_id,
                        ServerEvent::Error {
                            message: format!("Invalid message format: {}", e),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::debug!(connection = %connection_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(connection = %connection_id, error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong
        }
    }

    // ── Step 4: Cleanup ───────────────────────────────────────────────────

    let user_id = state.registry.disconnect(connection_id);
    sender_task.abort();
    tracing::info!(
        connection = %connection_id,
        user_id = user_id.as_deref(),
        "WebSocket disconnected"
    );
}

/// Handle a parsed client event.
pub(crate) async fn handle_client_event(
    state: &RelayState,
    connection_id: ConnectionId,
    event: ClientEvent,
) {
    let reply = |message: String| {
        state
            .registry
            .emit_to_connection(connection_id, ServerEvent::Error { message });
    };

    let bound = match event {
        ClientEvent::Join { ref user_id } => {
            handle_join(state, connection_id, user_id);
            return;
        }
        ClientEvent::Ping => {
            state
                .registry
                .emit_to_connection(connection_id, ServerEvent::Pong);
            return;
        }
        ref other => match state.registry.user_of(connection_id) {
            Some(user_id) => user_id,
            None => {
                reply(format!("Must join before sending {}", event_name(other)));
                return;
            }
        },
    };

    match event {
        ClientEvent::SendMessage {
            to,
            from,
            text,
            timestamp,
        } => {
            if from != bound {
                reply(mismatch("sendMessage", &from, &bound));
                return;
            }
            // Failures are reported to this connection by the relay.
            let _ = state
                .relay
                .send(connection_id, &bound, &to, &text, timestamp)
                .await;
        }

        ClientEvent::DeleteMessage { id, .. } => {
            let _ = state.relay.delete(connection_id, &bound, &id).await;
        }

        ClientEvent::EditMessage { id, text } => {
            let _ = state.relay.edit(connection_id, &bound, &id, &text).await;
        }

        ClientEvent::MessageSeen {
            message_id,
            user_id,
        } => {
            if user_id != bound {
                reply(mismatch("messageSeen", &user_id, &bound));
                return;
            }
            let _ = state.relay.seen(connection_id, &bound, &message_id).await;
        }

        ClientEvent::CallUser {
            from,
            to,
            signal_data,
        } => {
            if from != bound {
                reply(mismatch("callUser", &from, &bound));
                return;
            }
            state.coordinator.call_user(&bound, &to, signal_data);
        }

        ClientEvent::AnswerCall { to, signal } => {
            state.coordinator.answer_call(&bound, &to, signal);
        }

        ClientEvent::ReadyForCall { student_id, to } => {
            if student_id != bound {
                reply(mismatch("readyForCall", &student_id, &bound));
                return;
            }
            state
                .coordinator
                .ready_for_call(connection_id, &bound, to.as_deref());
        }

        ClientEvent::EndCall { to } => {
            state.coordinator.end_call(&bound, &to);
        }

        ClientEvent::Join { .. } | ClientEvent::Ping => {}
    }
}

/// Bind the connection to a user's room and acknowledge.
fn handle_join(state: &RelayState, connection_id: ConnectionId, user_id: &str) {
    // Identity checks compare ids byte for byte, so refuse rather than trim.
    let refusal = if user_id.trim().is_empty() {
        Some("User id must not be empty")
    } else if user_id.trim() != user_id {
        Some("User id must not have leading or trailing whitespace")
    } else {
        None
    };
    if let Some(reason) = refusal {
        state.registry.emit_to_connection(
            connection_id,
            ServerEvent::Error {
                message: reason.to_string(),
            },
        );
        return;
    }

    let previous = state.registry.join(connection_id, user_id);
    if let Some(ref previous) = previous {
        if previous != user_id {
            tracing::info!(
                connection = %connection_id,
                from = previous.as_str(),
                to = user_id,
                "Connection moved rooms"
            );
        }
    } else {
        tracing::info!(connection = %connection_id, user_id = user_id, "Joined room");
    }

    state.registry.emit_to_connection(
        connection_id,
        ServerEvent::Joined {
            user_id: user_id.to_string(),
        },
    );
}

fn mismatch(event: &str, claimed: &str, bound: &str) -> String {
    format!(
        "{} names user '{}' but this connection joined as '{}'",
        event, claimed, bound
    )
}

fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Join { .. } => "join",
        ClientEvent::SendMessage { .. } => "sendMessage",
        ClientEvent::DeleteMessage { .. } => "deleteMessage",
        ClientEvent::EditMessage { .. } => "editMessage",
        ClientEvent::MessageSeen { .. } => "messageSeen",
        ClientEvent::CallUser { .. } => "callUser",
        ClientEvent::AnswerCall { .. } => "answerCall",
        ClientEvent::ReadyForCall { .. } => "readyForCall",
        ClientEvent::EndCall { .. } => "endCall",
        ClientEvent::Ping => "ping",
    }
}

#[cfg(test)]
mod tests {
    use haven_client::{compose_message, CallSession, RelayClientEvent, RelayServerEvent};
    use serde_json::json;

    use super::*;
    use crate::state::test_support::test_state;
    use crate::state::RelayConfig;

    type Rx = mpsc::UnboundedReceiver<ServerEvent>;

    fn connect(state: &RelayState) -> (ConnectionId, Rx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.registry.attach(id, tx);
        (id, rx)
    }

    async fn joined(state: &RelayState, user_id: &str) -> (ConnectionId, Rx) {
        let (id, mut rx) = connect(state);
        handle_client_event(
            state,
            id,
            ClientEvent::Join {
                user_id: user_id.to_string(),
            },
        )
        .await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Joined { .. }));
        (id, rx)
    }

    fn drain(rx: &mut Rx) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Put a client-built event through the wire encoding.
    fn from_client(event: RelayClientEvent) -> ClientEvent {
        serde_json::from_value(serde_json::to_value(event).unwrap()).unwrap()
    }

    fn to_client(event: ServerEvent) -> RelayServerEvent {
        serde_json::from_value(serde_json::to_value(event).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_join_acknowledges_and_binds() {
        let state = test_state(RelayConfig::default());
        let (id, mut rx) = connect(&state);

        handle_client_event(&state, id, ClientEvent::Join { user_id: "student-1".to_string() })
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::Joined { user_id } => assert_eq!(user_id, "student-1"),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(state.registry.user_of(id).as_deref(), Some("student-1"));
    }

    #[tokio::test]
    async fn test_empty_join_is_refused() {
        let state = test_state(RelayConfig::default());
        let (id, mut rx) = connect(&state);

        handle_client_event(&state, id, ClientEvent::Join { user_id: "  ".to_string() }).await;

        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(state.registry.user_of(id).is_none());
    }

    #[tokio::test]
    async fn test_padded_join_is_refused() {
        let state = test_state(RelayConfig::default());
        let (id, mut rx) = connect(&state);

        handle_client_event(&state, id, ClientEvent::Join { user_id: " alice".to_string() })
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("whitespace")),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(state.registry.user_of(id).is_none());
        assert!(!state.registry.is_online("alice"));
    }

    #[tokio::test]
    async fn test_events_before_join_are_refused() {
        let state = test_state(RelayConfig::default());
        let (_bob, mut rx_bob) = joined(&state, "bob").await;
        let (id, mut rx) = connect(&state);

        handle_client_event(
            &state,
            id,
            ClientEvent::SendMessage {
                to: "bob".to_string(),
                from: "alice".to_string(),
                text: "Hi".to_string(),
                timestamp: None,
            },
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("sendMessage")),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(drain(&mut rx_bob).is_empty());
        assert_eq!(state.relay.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ping_works_without_join() {
        let state = test_state(RelayConfig::default());
        let (id, mut rx) = connect(&state);

        handle_client_event(&state, id, ClientEvent::Ping).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_spoofed_sender_is_refused() {
        let state = test_state(RelayConfig::default());
        let (mallory, mut rx_mallory) = joined(&state, "mallory").await;
        let (_bob, mut rx_bob) = joined(&state, "bob").await;

        handle_client_event(
            &state,
            mallory,
            ClientEvent::SendMessage {
                to: "bob".to_string(),
                from: "alice".to_string(),
                text: "Trust me".to_string(),
                timestamp: None,
            },
        )
        .await;
        handle_client_event(
            &state,
            mallory,
            ClientEvent::CallUser {
                from: "alice".to_string(),
                to: "bob".to_string(),
                signal_data: json!("offer"),
            },
        )
        .await;

        assert_eq!(drain(&mut rx_mallory).len(), 2);
        assert!(drain(&mut rx_bob).is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_signals_carry_bound_identity() {
        let state = test_state(RelayConfig::default());
        let (student, _rx_student) = joined(&state, "student-1").await;
        let (_counselor, mut rx_counselor) = joined(&state, "counselor-1").await;

        handle_client_event(
            &state,
            student,
            ClientEvent::AnswerCall {
                to: "counselor-1".to_string(),
                signal: json!({"type": "answer"}),
            },
        )
        .await;
        handle_client_event(&state, student, ClientEvent::EndCall { to: "counselor-1".to_string() })
            .await;

        match drain(&mut rx_counselor).as_slice() {
            [ServerEvent::CallAccepted { from: a, .. }, ServerEvent::CallEnded { from: b }] => {
                assert_eq!(a, "student-1");
                assert_eq!(b, "student-1");
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_per_connection_order_is_preserved() {
        let state = test_state(RelayConfig::default());
        let (alice, _rx_alice) = joined(&state, "alice").await;
        let (_bob, mut rx_bob) = joined(&state, "bob").await;

        for text in ["One", "Two", "Three"] {
            handle_client_event(
                &state,
                alice,
                ClientEvent::SendMessage {
                    to: "bob".to_string(),
                    from: "alice".to_string(),
                    text: text.to_string(),
                    timestamp: None,
                },
            )
            .await;
        }

        let texts: Vec<String> = drain(&mut rx_bob)
            .into_iter()
            .map(|event| match event {
                ServerEvent::ReceiveMessage(message) => message.text,
                other => panic!("Unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn test_delete_and_edit_use_bound_actor() {
        let state = test_state(RelayConfig::default());
        let (alice, mut rx_alice) = joined(&state, "alice").await;
        let (bob, mut rx_bob) = joined(&state, "bob").await;

        let sent = state.relay.send(alice, "alice", "bob", "Hi", None).await.unwrap();
        drain(&mut rx_alice);
        drain(&mut rx_bob);

        // Advisory from/to cannot widen who may delete.
        handle_client_event(
            &state,
            bob,
            ClientEvent::DeleteMessage {
                id: sent.id.clone(),
                from: Some("alice".to_string()),
                to: Some("bob".to_string()),
            },
        )
        .await;
        assert!(matches!(drain(&mut rx_bob).as_slice(), [ServerEvent::DeleteFailed { .. }]));

        handle_client_event(
            &state,
            alice,
            ClientEvent::EditMessage {
                id: sent.id.clone(),
                text: "Hello".to_string(),
            },
        )
        .await;
        assert!(matches!(drain(&mut rx_bob).as_slice(), [ServerEvent::MessageEdited(_)]));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_room_silently() {
        let state = test_state(RelayConfig::default());
        let (student, _rx_student) = joined(&state, "student-1").await;
        let (_counselor, mut rx_counselor) = joined(&state, "counselor-1").await;

        state.registry.disconnect(student);

        assert!(!state.registry.is_online("student-1"));
        assert!(drain(&mut rx_counselor).is_empty());
    }

    #[tokio::test]
    async fn test_late_callee_gets_exactly_one_offer() {
        let state = test_state(RelayConfig::default());
        let offer = json!({"type": "offer", "sdp": "v=0 counselor"});

        // Caller joins and offers before the callee is connected.
        let mut caller = CallSession::new("counselor-1");
        let (caller_conn, mut rx_caller) = joined(&state, "counselor-1").await;
        let call = caller.start_call("student-1", offer.clone()).unwrap();
        handle_client_event(&state, caller_conn, from_client(call)).await;
        assert!(drain(&mut rx_caller).is_empty());

        // Callee comes up and announces readiness.
        let mut callee = CallSession::new("student-1");
        let (callee_conn, mut rx_callee) = connect(&state);
        for event in callee.listen(None).unwrap() {
            handle_client_event(&state, callee_conn, from_client(event)).await;
        }
        assert!(matches!(
            drain(&mut rx_callee).as_slice(),
            [ServerEvent::Joined { .. }]
        ));

        // Caller sees readyForCall and re-sends the retained offer.
        let announcements = drain(&mut rx_caller);
        assert_eq!(announcements.len(), 1);
        let ready = match to_client(announcements[0].clone()) {
            RelayServerEvent::ReadyForCall { student_id } => student_id,
            other => panic!("Unexpected event: {:?}", other),
        };
        let retry = caller.on_ready_for_call(&ready).unwrap();
        handle_client_event(&state, caller_conn, from_client(retry)).await;

        let received = drain(&mut rx_callee);
        assert_eq!(received.len(), 1);
        match to_client(received[0].clone()) {
            RelayServerEvent::IncomingCall { from, signal_data } => {
                assert_eq!(from, "counselor-1");
                assert_eq!(signal_data, offer);
                assert!(callee.on_incoming_call(&from, signal_data).unwrap());
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_text_is_normalized_end_to_end() {
        let state = test_state(RelayConfig::default());
        let (alice, _rx_alice) = joined(&state, "alice").await;
        let (_bob, mut rx_bob) = joined(&state, "bob").await;

        let event = compose_message("alice", "bob", "hello", Some(1_000)).unwrap();
        handle_client_event(&state, alice, from_client(event)).await;

        let delivered = drain(&mut rx_bob);
        assert_eq!(delivered.len(), 1);
        let message = match to_client(delivered[0].clone()) {
            RelayServerEvent::ReceiveMessage(message) => message,
            other => panic!("Unexpected event: {:?}", other),
        };
        assert_eq!(message.text, "Hello");
        assert_eq!(message.from, "alice");

        let history = state.relay.history("bob", "alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, message.id);
        assert_eq!(history[0].text, "Hello");
    }

    #[tokio::test]
    async fn test_relay_over_real_sockets() {
        use haven_client::RelayConnection;
        use std::time::Duration;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let state = test_state(RelayConfig::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::api::router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        let url = format!("ws://{}/ws", addr);

        let mut alice = RelayConnection::connect(&url).await.unwrap();
        let mut bob = RelayConnection::connect(&url).await.unwrap();
        for (conn, user_id) in [(&mut alice, "alice"), (&mut bob, "bob")] {
            conn.send(RelayClientEvent::Join {
                user_id: user_id.to_string(),
            })
            .unwrap();
            assert!(matches!(conn.recv().await.unwrap(), RelayServerEvent::Joined { .. }));
        }

        alice
            .send(compose_message("alice", "bob", "hello", None).unwrap())
            .unwrap();
        match bob.recv().await.unwrap() {
            RelayServerEvent::ReceiveMessage(message) => {
                assert_eq!(message.text, "Hello");
                assert_eq!(message.from, "alice");
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        // A frame that is not an event gets an error reply on the same socket.
        let (mut raw, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        raw.send(WsMessage::Text("not json".to_string())).await.unwrap();
        let reply = loop {
            match raw.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break text,
                _ => continue,
            }
        };
        match serde_json::from_str::<RelayServerEvent>(&reply).unwrap() {
            RelayServerEvent::Error { message } => {
                assert!(message.contains("Invalid message format"))
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        assert!(state.registry.is_online("bob"));
        bob.close().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.registry.is_online("bob") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(state.registry.is_online("alice"));
        assert_eq!(state.online_count(), 1);
    }
}
