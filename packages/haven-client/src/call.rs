//! # Call Session
//!
//! Client-side state machine for one-to-one call setup over the relay.
//!
//! ```text
//!   caller:  Idle ──start_call──► Offering ──on_call_accepted──► Answered ──end──► Ended
//!                                   │  ▲
//!                                   └──┘ on_ready_for_call(callee) re-sends the retained offer
//!
//!   callee:  Idle ──listen──► Listening ──(incomingCall)──► Listening + pending offer
//!                                                  └──answer──► Answered ──end──► Ended
//! ```
//!
//! The relay never resends anything. If the offer reaches the relay before
//! the callee has joined, it is dropped; the callee's later `readyForCall`
//! is what prompts the caller to emit the same offer again.

use serde_json::Value;

use crate::error::CallError;
use crate::protocol::RelayClientEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Listening,
    Offering,
    Answered,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// An offer that reached a listening callee.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingOffer {
    pub from: String,
    pub signal: Value,
}

/// One user's view of a call.
#[derive(Debug, Clone)]
pub struct CallSession {
    self_id: String,
    state: CallState,
    role: Option<CallRole>,
    peer_id: Option<String>,
    /// Last offer sent while `Offering`, kept for the retry path.
    retained_offer: Option<Value>,
    incoming: Option<IncomingOffer>,
}

impl CallSession {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            state: CallState::Idle,
            role: None,
            peer_id: None,
            retained_offer: None,
            incoming: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn retained_offer(&self) -> Option<&Value> {
        self.retained_offer.as_ref()
    }

    pub fn incoming(&self) -> Option<&IncomingOffer> {
        self.incoming.as_ref()
    }

    fn reset(&mut self) {
        self.role = None;
        self.peer_id = None;
        self.retained_offer = None;
        self.incoming = None;
    }

    fn invalid(&self, action: &'static str) -> CallError {
        CallError::InvalidTransition {
            action,
            state: self.state,
        }
    }

    // ── Callee ────────────────────────────────────────────────────────────

    /// Become reachable: join our own room and announce readiness.
    ///
    /// Call once local media is up. `notify` addresses the announcement to a
    /// specific caller; without it every connected client hears it.
    pub fn listen(&mut self, notify: Option<&str>) -> Result<Vec<RelayClientEvent>, CallError> {
        match self.state {
            CallState::Idle | CallState::Ended => {}
            _ => return Err(self.invalid("listen")),
        }

        self.reset();
        self.state = CallState::Listening;
        self.role = Some(CallRole::Callee);

        Ok(vec![
            RelayClientEvent::Join {
                user_id: self.self_id.clone(),
            },
            RelayClientEvent::ReadyForCall {
                student_id: self.self_id.clone(),
                to: notify.map(str::to_string),
            },
        ])
    }

    /// Record an incoming offer. Returns false for a repeat of the offer
    /// already pending, so a retried offer does not ring twice.
    pub fn on_incoming_call(&mut self, from: &str, signal: Value) -> Result<bool, CallError> {
        if self.state != CallState::Listening {
            return Err(self.invalid("accept an incoming call"));
        }

        if let Some(ref pending) = self.incoming {
            if pending.from == from && pending.signal == signal {
                return Ok(false);
            }
        }

        self.peer_id = Some(from.to_string());
        self.incoming = Some(IncomingOffer {
            from: from.to_string(),
            signal,
        });
        Ok(true)
    }

    /// Answer the pending offer with our answer payload.
    pub fn answer(&mut self, answer: Value) -> Result<RelayClientEvent, CallError> {
        if self.state != CallState::Listening {
            return Err(self.invalid("answer"));
        }
        let offer = self.incoming.take().ok_or(CallError::NoIncomingCall)?;

        self.state = CallState::Answered;
        self.peer_id = Some(offer.from.clone());

        Ok(RelayClientEvent::AnswerCall {
            to: offer.from,
            signal: answer,
        })
    }

    // ── Caller ────────────────────────────────────────────────────────────

    /// Offer a call to `callee`, retaining the offer for the retry path.
    pub fn start_call(&mut self, callee: &str, offer: Value) -> Result<RelayClientEvent, CallError> {
        match self.state {
            CallState::Idle | CallState::Ended => {}
            _ => return Err(self.invalid("start a call")),
        }

        self.reset();
        self.state = CallState::Offering;
        self.role = Some(CallRole::Caller);
        self.peer_id = Some(callee.to_string());
        self.retained_offer = Some(offer.clone());

        Ok(RelayClientEvent::CallUser {
            from: self.self_id.clone(),
            to: callee.to_string(),
            signal_data: offer,
        })
    }

    /// React to a callee's readiness announcement.
    ///
    /// While still offering to that callee, returns the retained offer to
    /// send again. Announcements from anyone else are ignored.
    pub fn on_ready_for_call(&self, student_id: &str) -> Option<RelayClientEvent> {
        if self.state != CallState::Offering || self.peer_id.as_deref() != Some(student_id) {
            return None;
        }

        let offer = self.retained_offer.clone()?;
        tracing::debug!(callee = student_id, "Callee ready, re-sending retained offer");

        Some(RelayClientEvent::CallUser {
            from: self.self_id.clone(),
            to: student_id.to_string(),
            signal_data: offer,
        })
    }

    /// The callee answered. Returns the answer payload for the local peer
    /// connection.
    pub fn on_call_accepted(&mut self, from: &str, signal: Value) -> Result<Value, CallError> {
        if self.state != CallState::Offering {
            return Err(self.invalid("accept an answer"));
        }
        if self.peer_id.as_deref() != Some(from) {
            return Err(CallError::WrongPeer {
                expected: self.peer_id.clone().unwrap_or_default(),
                actual: from.to_string(),
            });
        }

        self.state = CallState::Answered;
        self.retained_offer = None;
        Ok(signal)
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Hang up. The caller must release local media after sending the
    /// returned event.
    pub fn end(&mut self) -> Result<RelayClientEvent, CallError> {
        let peer = match (self.state, self.peer_id.clone()) {
            (CallState::Offering | CallState::Answered, Some(peer)) => peer,
            (CallState::Listening, Some(peer)) if self.incoming.is_some() => peer,
            _ => return Err(self.invalid("end a call")),
        };

        self.state = CallState::Ended;
        self.retained_offer = None;
        self.incoming = None;

        Ok(RelayClientEvent::EndCall { to: peer })
    }

    /// The peer hung up. Returns true when local media must now be released.
    pub fn on_call_ended(&mut self, from: &str) -> bool {
        if self.peer_id.as_deref() != Some(from) {
            return false;
        }

        let was_active = matches!(self.state, CallState::Offering | CallState::Answered)
            || (self.state == CallState::Listening && self.incoming.is_some());

        if was_active {
            self.state = CallState::Ended;
            self.retained_offer = None;
            self.incoming = None;
        }
        was_active
    }
}
