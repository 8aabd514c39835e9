//! Client error types.

use thiserror::Error;

use crate::call::CallState;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    #[error("Relay connection closed")]
    Closed,

    #[error("Invalid relay frame: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// A call action that the current call state does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: CallState,
    },

    #[error("No incoming call to answer")]
    NoIncomingCall,

    #[error("Event from {actual} does not belong to the call with {expected}")]
    WrongPeer { expected: String, actual: String },
}
