//! Per-connection WebSocket lifecycle: session bind → `connected` event →
//! read loop → cleanup.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use periscope_protocol::{
    ClientFrame, ConnectedPayload, FRAME_BUFFER, FramePayload, MAX_PAYLOAD_BYTES, ServerFrame,
    events,
};

use crate::{router, state::{ConnectedClient, GatewayState}};

/// Handle a single WebSocket connection through its full lifecycle.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    session_token: Option<String>,
    user_agent: Option<String>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let remote_ip = remote_addr.ip().to_string();
    info!(conn_id = %conn_id, remote_ip = %remote_ip, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();
    let (frame_tx, mut frame_rx) = mpsc::channel::<FramePayload>(FRAME_BUFFER);

    // Write loop: one task owns the sink. Biased towards the reliable
    // channel so acks and events are never starved by frames.
    let write_state = Arc::clone(&state);
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = control_rx.recv() => match msg {
                    Some(msg) => {
                        if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    },
                    None => break,
                },
                frame = frame_rx.recv() => match frame {
                    Some(frame) => {
                        let seq = write_state.next_seq();
                        let event = ServerFrame::event(
                            events::FRAME,
                            serde_json::json!(frame),
                            seq,
                        );
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!(conn_id = %write_conn_id, error = %e, "frame serialize failed");
                                continue;
                            },
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    },
                    None => break,
                },
            }
        }
        debug!(conn_id = %write_conn_id, "ws: write loop closed");
    });

    // Bind the stable session identity before anything else flows.
    let session = state
        .sessions
        .get_or_create(
            session_token.as_deref(),
            &remote_ip,
            user_agent.as_deref().unwrap_or(""),
        )
        .await;

    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            session_id: session.id.clone(),
            control_tx: control_tx.clone(),
            frame_tx,
            connected_at: Instant::now(),
            last_activity: Instant::now(),
        })
        .await;

    let connected = ConnectedPayload {
        session_id: session.id.clone(),
        session_token: session.token.clone(),
        browser_id: session.browser_id.clone(),
    };
    router::send_event(
        &state,
        &conn_id,
        events::CONNECTED,
        serde_json::json!(connected),
    )
    .await;

    // ── Message loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            continue;
        }

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                continue;
            },
        };

        if let Some(client) = state.clients.write().await.get_mut(&conn_id) {
            client.touch();
        }
        state.sessions.update(&session.id, |_| {}).await;

        router::dispatch(&state, &conn_id, &session.id, frame).await;
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    state.cleanup_connection(&conn_id, &session.id).await;
    drop(control_tx);
    write_handle.abort();

    info!(conn_id = %conn_id, session_id = %session.id, "ws: connection closed");
}
