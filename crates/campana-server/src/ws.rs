//! WebSocket signaling endpoint.
//!
//! Each connection is authenticated at upgrade time and then serves one
//! event loop: inbound `join-call` / `leave-call` / `signal` events are
//! dispatched to the room registry, outbound events are pumped from the
//! connection's outbox. When the socket closes the connection leaves
//! every call it had joined.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use campana_shared::constants::{
    MAX_CANDIDATE_BYTES, MAX_SDP_BYTES, MAX_WS_MESSAGE_BYTES, WS_MAX_MESSAGES_PER_MINUTE,
    WS_OUTBOX_CAPACITY,
};
use campana_shared::protocol::{ClientEvent, ServerEvent, SignalKind};
use campana_shared::types::{CallId, ParticipantId};

use crate::api::AppState;
use crate::auth;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let participant = match auth::authenticate(&headers, &state.config.auth_pubkey) {
        Ok(participant) => participant,
        Err(e) => return e.into_response(),
    };

    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, participant))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, participant: ParticipantId) {
    info!(peer = %participant.short(), "Signaling connection established");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(WS_OUTBOX_CAPACITY);
    let (closed_tx, mut closed_rx) = mpsc::channel::<()>(1);

    // Outbox pump: serialize queued events onto the socket.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = closed_tx.try_send(());
    });

    let mut joined: HashSet<CallId> = HashSet::new();
    let mut window_start = Instant::now();
    let mut window_count: u32 = 0;

    loop {
        tokio::select! {
            _ = closed_rx.recv() => break,
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };

                let now = Instant::now();
                if now.duration_since(window_start) >= Duration::from_secs(60) {
                    window_start = now;
                    window_count = 0;
                }
                window_count = window_count.saturating_add(1);
                if window_count > WS_MAX_MESSAGES_PER_MINUTE {
                    send_error(&tx, "Rate limit exceeded").await;
                    break;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        send_error(&tx, "Binary frames are not supported").await;
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let event: ClientEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(peer = %participant.short(), error = %e, "Invalid client event");
                        send_error(&tx, "Invalid event").await;
                        continue;
                    }
                };

                match event {
                    ClientEvent::JoinCall { call_id } => {
                        // The registry queues the Joined ack itself, so
                        // no forwarded envelope can overtake it.
                        match state
                            .registry
                            .join(call_id, participant.clone(), tx.clone())
                            .await
                        {
                            Ok(()) => {
                                joined.insert(call_id);
                            }
                            Err(e) => send_error(&tx, &e.to_string()).await,
                        }
                    }
                    ClientEvent::LeaveCall { call_id } => {
                        joined.remove(&call_id);
                        state.registry.leave(&call_id, &participant).await;
                    }
                    ClientEvent::Signal {
                        call_id,
                        kind,
                        data,
                        to,
                    } => {
                        if !joined.contains(&call_id) {
                            send_error(&tx, "Join the call before signaling").await;
                            continue;
                        }
                        if !payload_size_ok(kind, &data) {
                            send_error(&tx, "Signal payload too large").await;
                            continue;
                        }
                        state
                            .registry
                            .relay(&call_id, &participant, kind, data, to.as_ref())
                            .await;
                    }
                }
            }
        }
    }

    for call_id in &joined {
        state.registry.leave(call_id, &participant).await;
    }
    info!(peer = %participant.short(), "Signaling connection closed");
}

async fn send_error(tx: &mpsc::Sender<ServerEvent>, message: &str) {
    let _ = tx
        .send(ServerEvent::Error {
            message: message.to_string(),
        })
        .await;
}

fn payload_size_ok(kind: SignalKind, data: &serde_json::Value) -> bool {
    let len = data.to_string().len();
    match kind {
        SignalKind::Offer | SignalKind::Answer => len <= MAX_SDP_BYTES,
        SignalKind::Candidate => len <= MAX_CANDIDATE_BYTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_router;
    use crate::config::ServerConfig;
    use crate::rooms::RoomRegistry;
    use campana_shared::identity::create_identity_token;
    use chrono::{Duration as ChronoDuration, Utc};
    use ed25519_dalek::SigningKey;
    use futures::{SinkExt as _, StreamExt as _};
    use rand::rngs::OsRng;
    use std::sync::Arc;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start_relay() -> (std::net::SocketAddr, SigningKey) {
        let key = SigningKey::generate(&mut OsRng);
        let config = ServerConfig {
            auth_pubkey: key.verifying_key().to_bytes(),
            ..ServerConfig::default()
        };
        let state = AppState {
            registry: RoomRegistry::new(config.max_call_members),
            config: Arc::new(config),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        (addr, key)
    }

    async fn connect(addr: std::net::SocketAddr, key: &SigningKey, who: &str) -> Client {
        let token = create_identity_token(
            ParticipantId::new(who),
            Utc::now() + ChronoDuration::hours(1),
            key,
        );
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", token.to_bearer()).parse().unwrap(),
        );
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    async fn send(client: &mut Client, event: &ClientEvent) {
        client
            .send(WsMessage::Text(serde_json::to_string(event).unwrap()))
            .await
            .unwrap();
    }

    async fn recv(client: &mut Client) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for relay event")
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_upgrade_is_refused() {
        let (addr, _key) = start_relay().await;
        let request = format!("ws://{addr}/ws").into_client_request().unwrap();
        assert!(connect_async(request).await.is_err());
    }

    #[tokio::test]
    async fn test_join_and_forward_between_members() {
        let (addr, key) = start_relay().await;
        let call = CallId::new();

        let mut alice = connect(addr, &key, "alice").await;
        send(&mut alice, &ClientEvent::JoinCall { call_id: call }).await;
        match recv(&mut alice).await {
            ServerEvent::Joined { participants, .. } => assert!(participants.is_empty()),
            other => panic!("expected joined ack, got {other:?}"),
        }

        let mut bob = connect(addr, &key, "bob").await;
        send(&mut bob, &ClientEvent::JoinCall { call_id: call }).await;
        match recv(&mut bob).await {
            ServerEvent::Joined { participants, .. } => {
                assert_eq!(participants, vec![ParticipantId::new("alice")])
            }
            other => panic!("expected joined ack, got {other:?}"),
        }

        // Alice is told about Bob.
        match recv(&mut alice).await {
            ServerEvent::PeerJoined { participant } => {
                assert_eq!(participant, ParticipantId::new("bob"))
            }
            other => panic!("expected peer-joined, got {other:?}"),
        }

        send(
            &mut alice,
            &ClientEvent::Signal {
                call_id: call,
                kind: SignalKind::Offer,
                data: serde_json::json!({"sdp": "v=0"}),
                to: None,
            },
        )
        .await;

        match recv(&mut bob).await {
            ServerEvent::Signal { kind, from, data } => {
                assert_eq!(kind, SignalKind::Offer);
                assert_eq!(from, ParticipantId::new("alice"));
                assert_eq!(data["sdp"], "v=0");
            }
            other => panic!("expected signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_before_join_is_rejected() {
        let (addr, key) = start_relay().await;
        let mut alice = connect(addr, &key, "alice").await;

        send(
            &mut alice,
            &ClientEvent::Signal {
                call_id: CallId::new(),
                kind: SignalKind::Offer,
                data: serde_json::json!({"sdp": "v=0"}),
                to: None,
            },
        )
        .await;

        assert!(matches!(recv(&mut alice).await, ServerEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_joined_calls() {
        let (addr, key) = start_relay().await;
        let call = CallId::new();

        let mut alice = connect(addr, &key, "alice").await;
        send(&mut alice, &ClientEvent::JoinCall { call_id: call }).await;
        let _ = recv(&mut alice).await;

        let mut bob = connect(addr, &key, "bob").await;
        send(&mut bob, &ClientEvent::JoinCall { call_id: call }).await;
        let _ = recv(&mut bob).await;
        let _ = recv(&mut alice).await; // peer-joined

        drop(bob);

        match recv(&mut alice).await {
            ServerEvent::PeerLeft { participant } => {
                assert_eq!(participant, ParticipantId::new("bob"))
            }
            other => panic!("expected peer-left, got {other:?}"),
        }
    }
}
