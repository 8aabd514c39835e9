//! # Haven Client
//!
//! Client-side half of the Haven relay protocol.
//!
//! - [`protocol`]: wire event types, mirroring the relay server
//! - [`chat`]: text normalization and a de-duplicating conversation view
//! - [`call`]: the call setup state machine, including the retained-offer
//!   retry when a callee joins late
//! - [`connection`]: a WebSocket connection to the relay
//!
//! ## Example
//!
//! ```ignore
//! use haven_client::{CallSession, RelayConnection};
//!
//! let mut conn = RelayConnection::connect("ws://localhost:8080/ws").await?;
//! let mut session = CallSession::new("student-1");
//! conn.send_all(session.listen(None)?)?;
//! ```

pub mod call;
pub mod chat;
pub mod connection;
pub mod error;
pub mod protocol;

pub use call::{CallRole, CallSession, CallState, IncomingOffer};
pub use chat::{compose_message, normalize_text, Conversation, FailedSend};
pub use connection::RelayConnection;
pub use error::{CallError, ClientError, Result};
pub use protocol::{ChatMessageData, RelayClientEvent, RelayServerEvent, RelayStatus};
