//! Client side of the relay connection.
//!
//! A thin message pipe: outbound [`ClientEvent`]s are queued onto a
//! writer task, inbound frames are decoded into [`ServerEvent`]s and
//! delivered on a channel together with a terminal `ConnectionLost`
//! marker. Everything above this module treats relay loss as a retryable
//! "offline" status, never a crash.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use campana_shared::protocol::{ClientEvent, ServerEvent};

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Signaling unavailable: {0}")]
    Unavailable(String),

    #[error("Signaling connection closed")]
    Closed,
}

/// Inbound side of a signaling connection.
#[derive(Debug)]
pub enum SignalingEvent {
    Server(ServerEvent),
    /// The underlying connection dropped; no further events follow.
    ConnectionLost(String),
}

pub type SignalingEvents = mpsc::Receiver<SignalingEvent>;

#[async_trait]
pub trait SignalingConnection: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), SignalingError>;
    async fn close(&self);
}

/// WebSocket signaling connection to the relay.
pub struct WsSignaling {
    outbox: mpsc::Sender<OutboundFrame>,
}

enum OutboundFrame {
    Event(ClientEvent),
    Close,
}

impl WsSignaling {
    /// Connect to the relay, presenting the identity bearer token at
    /// upgrade time.
    pub async fn connect(
        url: &str,
        bearer: &str,
    ) -> Result<(Self, SignalingEvents), SignalingError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SignalingError::Unavailable(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {bearer}")
                .parse()
                .map_err(|_| SignalingError::Unavailable("invalid bearer token".to_string()))?,
        );

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| SignalingError::Unavailable(e.to_string()))?;
        info!(url = %url, "Connected to signaling relay");

        let (mut sink, mut stream) = socket.split();
        let (outbox, mut outbox_rx) = mpsc::channel::<OutboundFrame>(64);
        let (events_tx, events_rx) = mpsc::channel::<SignalingEvent>(64);

        // Writer: serialize queued events onto the socket.
        tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                let message = match frame {
                    OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                        Ok(text) => WsMessage::Text(text),
                        Err(_) => continue,
                    },
                    OutboundFrame::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        // Reader: decode inbound frames, surface connection loss.
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if events_tx.send(SignalingEvent::Server(event)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Undecodable relay event, skipping");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Signaling socket closed");
                        let _ = events_tx
                            .send(SignalingEvent::ConnectionLost("connection closed".to_string()))
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Signaling socket error");
                        let _ = events_tx
                            .send(SignalingEvent::ConnectionLost(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok((Self { outbox }, events_rx))
    }
}

#[async_trait]
impl SignalingConnection for WsSignaling {
    async fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        self.outbox
            .send(OutboundFrame::Event(event))
            .await
            .map_err(|_| SignalingError::Closed)
    }

    async fn close(&self) {
        let _ = self.outbox.send(OutboundFrame::Close).await;
    }
}
