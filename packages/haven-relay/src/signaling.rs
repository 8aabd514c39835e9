//! Call signaling coordinator.
//!
//! Routes the offer/answer handshake between two users so they can bring up
//! a direct media stream. Signal payloads are opaque and never inspected.
//! Nothing here waits on a client, keeps session state, or reports errors
//! back: an offer to an offline callee is dropped, and the caller's client
//! re-sends it when the callee later announces `readyForCall`.

use serde_json::Value;

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, RoomRegistry};

#[derive(Clone)]
pub struct CallCoordinator {
    registry: RoomRegistry,
}

impl CallCoordinator {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    /// Forward a caller's offer as `incomingCall`.
    pub fn call_user(&self, from: &str, to: &str, signal_data: Value) -> usize {
        let delivered = self.registry.emit_to(
            to,
            ServerEvent::IncomingCall {
                from: from.to_string(),
                signal_data,
            },
        );
        log_delivery("callUser", from, to, delivered);
        delivered
    }

    /// Forward a callee's answer as `callAccepted`.
    pub fn answer_call(&self, from: &str, to: &str, signal: Value) -> usize {
        let delivered = self.registry.emit_to(
            to,
            ServerEvent::CallAccepted {
                from: from.to_string(),
                signal,
            },
        );
        log_delivery("answerCall", from, to, delivered);
        delivered
    }

    /// Relay a callee's readiness. Addressed announcements go to one room;
    /// unaddressed ones go to every other joined connection.
    pub fn ready_for_call(
        &self,
        origin: ConnectionId,
        student_id: &str,
        to: Option<&str>,
    ) -> usize {
        let event = ServerEvent::ReadyForCall {
            student_id: student_id.to_string(),
        };

        let delivered = match to {
            Some(to) => self.registry.emit_to(to, event),
            None => self.registry.broadcast_except(origin, event),
        };

        tracing::debug!(
            student_id = student_id,
            to = to,
            delivered = delivered,
            "Relayed readyForCall"
        );
        delivered
    }

    /// Forward a hang-up as `callEnded`. Both sides release media on their
    /// own; the relay does not force teardown.
    pub fn end_call(&self, from: &str, to: &str) -> usize {
        let delivered = self.registry.emit_to(
            to,
            ServerEvent::CallEnded {
                from: from.to_string(),
            },
        );
        log_delivery("endCall", from, to, delivered);
        delivered
    }
}

fn log_delivery(event: &str, from: &str, to: &str, delivered: usize) {
    if delivered == 0 {
        tracing::debug!(event = event, from = from, to = to, "Signal target offline, dropped");
    } else {
        tracing::debug!(
            event = event,
            from = from,
            to = to,
            connections = delivered,
            "Forwarded signal"
        );
    }
}
