//! WebSocket connection to the relay.
//!
//! [`RelayConnection::connect`] opens the socket and spawns two tasks: a
//! writer draining an outbound channel into the socket, and a reader parsing
//! frames into [`RelayServerEvent`]s. Callers only touch channels.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{ClientError, Result};
use crate::protocol::{RelayClientEvent, RelayServerEvent, RelayStatus};

pub struct RelayConnection {
    outbound: mpsc::UnboundedSender<RelayClientEvent>,
    inbound: mpsc::UnboundedReceiver<RelayServerEvent>,
    status: watch::Receiver<RelayStatus>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RelayConnection {
    /// Connect to a relay WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (status_tx, status_rx) = watch::channel(RelayStatus::Connecting);

        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            let _ = status_tx.send(RelayStatus::Error(e.to_string()));
            ClientError::Connect(e.to_string())
        })?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let _ = status_tx.send(RelayStatus::Connected);
        tracing::info!(url = url, "Connected to relay");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RelayServerEvent>();

        let writer_task = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize client event: {}", e);
                    }
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<RelayServerEvent>(&text) {
                            Ok(event) => {
                                if let RelayServerEvent::Joined { ref user_id } = event {
                                    let _ = status_tx.send(RelayStatus::Joined(user_id.clone()));
                                }
                                if in_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to parse relay event");
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Relay sent close frame");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay WebSocket error");
                        let _ = status_tx.send(RelayStatus::Error(e.to_string()));
                        return;
                    }
                    _ => {}
                }
            }
            let _ = status_tx.send(RelayStatus::Disconnected);
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            status: status_rx,
            reader_task,
            writer_task,
        })
    }

    /// Queue an event for the relay.
    pub fn send(&self, event: RelayClientEvent) -> Result<()> {
        self.outbound.send(event).map_err(|_| ClientError::Closed)
    }

    /// Queue several events in order.
    pub fn send_all(&self, events: impl IntoIterator<Item = RelayClientEvent>) -> Result<()> {
        for event in events {
            self.send(event)?;
        }
        Ok(())
    }

    /// Next event from the relay, or `ClientError::Closed` once the socket
    /// is gone.
    pub async fn recv(&mut self) -> Result<RelayServerEvent> {
        self.inbound.recv().await.ok_or(ClientError::Closed)
    }

    pub fn status(&self) -> RelayStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<RelayStatus> {
        self.status.clone()
    }

    /// Send a close frame after any queued events, then stop reading.
    pub async fn close(self) {
        let Self {
            outbound,
            reader_task,
            writer_task,
            ..
        } = self;
        drop(outbound);
        let _ = writer_task.await;
        reader_task.abort();
    }
}
