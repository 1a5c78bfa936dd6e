//! Dispatch of inbound control messages to the pool, engines, and sessions.
//!
//! Every handler returns `Result<serde_json::Value, ErrorShape>`; the
//! dispatch boundary converts outcomes into acks, so no handler error ever
//! reaches another client or tears down the socket.

use std::sync::Arc;

use {
    serde_json::{Value, json},
    tokio::sync::{Mutex, mpsc},
    tracing::{info, warn},
};

use {
    periscope_browser::{BrowserAction, Error as PoolError, ImageFormat},
    periscope_protocol::{
        ClientFrame, ErrorShape, InitParams, LatencyReport, MessageName, NavigateParams,
        PingParams, ResizeParams, ServerFrame, StatusPayload, StreamControlParams,
        StreamSettingsParams, error_codes, events,
    },
    periscope_streaming::{
        ConnectionClass, DeviceClass, EngineControl, StreamEngine, StreamSettings, StreamState,
    },
};

use crate::{capture::PoolFrameSource, state::GatewayState};

type HandlerResult = Result<Value, ErrorShape>;

/// Dispatch one inbound frame and ack it if the client asked for one.
pub async fn dispatch(state: &Arc<GatewayState>, conn_id: &str, session_id: &str, frame: ClientFrame) {
    let payload = frame
        .payload
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let result = match frame.name {
        MessageName::Init => handle_init(state, conn_id, session_id, payload).await,
        MessageName::Navigate => handle_navigate(state, conn_id, payload).await,
        MessageName::Action => handle_action(state, conn_id, payload).await,
        MessageName::Resize => handle_resize(state, conn_id, payload).await,
        MessageName::Status => handle_status(state, conn_id).await,
        MessageName::StreamSettings => {
            handle_stream_settings(state, conn_id, session_id, payload).await
        },
        MessageName::StreamControl => handle_stream_control(state, conn_id, payload).await,
        MessageName::LatencyReport => handle_latency_report(state, conn_id, payload).await,
        MessageName::Ping => handle_ping(state, conn_id, payload).await,
    };

    match (frame.id, result) {
        (Some(id), Ok(payload)) => {
            send_control(state, conn_id, &ServerFrame::ack_ok(id, payload)).await;
        },
        (Some(id), Err(error)) => {
            warn!(
                conn_id,
                code = %error.code,
                error = %error.message,
                "command failed"
            );
            send_control(state, conn_id, &ServerFrame::ack_err(id, error)).await;
        },
        (None, Err(error)) => {
            warn!(
                conn_id,
                code = %error.code,
                error = %error.message,
                "unacked command failed"
            );
        },
        (None, Ok(_)) => {},
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// `init`: bind a browser to this socket (idempotent) and start the stream
/// engine. The ack is queued before the engine can place a frame on the wire.
async fn handle_init(
    state: &Arc<GatewayState>,
    conn_id: &str,
    session_id: &str,
    payload: Value,
) -> HandlerResult {
    let params: InitParams = parse_params(payload)?;

    // Idempotent: a socket that already owns a browser keeps it.
    if let Some(existing) = state.browser_for(conn_id).await {
        return Ok(json!({ "success": true, "browserId": existing }));
    }

    let cfg = &state.config;
    let url = params
        .url
        .clone()
        .unwrap_or_else(|| cfg.browser.default_url.clone());
    let width = params.width.unwrap_or(cfg.browser.viewport_width);
    let height = params.height.unwrap_or(cfg.browser.viewport_height);

    let browser_id = state
        .pool
        .create(&url, width, height)
        .await
        .map_err(pool_error)?;

    if !state.bind_browser(conn_id, &browser_id).await {
        // A concurrent init won the race; this browser is surplus.
        state.pool.close(&browser_id).await;
        let existing = state.browser_for(conn_id).await.unwrap_or_default();
        return Ok(json!({ "success": true, "browserId": existing }));
    }
    state
        .sessions
        .set_browser_id(session_id, Some(browser_id.clone()))
        .await;

    let connection_class = params
        .connection_quality
        .as_deref()
        .and_then(ConnectionClass::parse)
        .unwrap_or_default();
    let device_class = params
        .device_type
        .as_deref()
        .and_then(DeviceClass::parse)
        .unwrap_or_default();
    let adaptive = params
        .adaptive_bitrate
        .unwrap_or(cfg.features.adaptive_bitrate);

    let limits = state.limits();
    let settings = StreamSettings::initial(
        connection_class,
        device_class,
        params.fps,
        params.quality,
        adaptive,
        &limits,
    );

    state
        .sessions
        .update(session_id, |s| {
            s.settings.fps = Some(settings.fps);
            s.settings.quality = Some(settings.quality);
            s.settings.adaptive = Some(settings.adaptive);
            s.settings.resolution = Some(format!("{width}x{height}"));
        })
        .await;

    let frame_tx = {
        let clients = state.clients.read().await;
        let client = clients.get(conn_id).ok_or_else(|| {
            ErrorShape::new(error_codes::TRANSPORT, "socket already disconnected")
        })?;
        client.frame_tx.clone()
    };

    let format =
        ImageFormat::parse(&cfg.browser.screenshot_format).unwrap_or_default();
    let source = PoolFrameSource::new(Arc::clone(&state.pool), &browser_id, format);
    let stream_state = Arc::new(Mutex::new(StreamState::new(
        conn_id,
        &browser_id,
        settings,
        connection_class,
        device_class,
    )));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let engine = StreamEngine::new(
        Arc::clone(&stream_state),
        source,
        frame_tx,
        control_rx,
        limits,
    );
    let task = tokio::spawn(engine.run());
    state
        .insert_stream(conn_id, crate::state::StreamHandle {
            state: stream_state,
            control: control_tx,
            task,
        })
        .await;

    info!(conn_id, browser_id = %browser_id, fps = settings.fps, quality = settings.quality, "stream initialised");
    Ok(json!({ "success": true, "browserId": browser_id }))
}

async fn handle_navigate(
    state: &Arc<GatewayState>,
    conn_id: &str,
    payload: Value,
) -> HandlerResult {
    let params: NavigateParams = parse_params(payload)?;
    let browser_id = require_browser(state, conn_id).await?;
    let current_url = state
        .pool
        .navigate(&browser_id, &params.url)
        .await
        .map_err(pool_error)?;
    Ok(json!({ "success": true, "currentUrl": current_url }))
}

async fn handle_action(state: &Arc<GatewayState>, conn_id: &str, payload: Value) -> HandlerResult {
    let browser_id = require_browser(state, conn_id).await?;

    // `getCurrentUrl` is a router-level query, never part of the pool's
    // input-action dispatch.
    if payload.get("action").and_then(Value::as_str) == Some("getCurrentUrl") {
        let url = state
            .pool
            .current_url(&browser_id)
            .await
            .map_err(pool_error)?;
        return Ok(json!({ "success": true, "url": url }));
    }

    let action: BrowserAction = serde_json::from_value(payload)
        .map_err(|e| ErrorShape::new(error_codes::VALIDATION, format!("unknown action: {e}")))?;
    state
        .pool
        .execute(&browser_id, action)
        .await
        .map_err(pool_error)?;
    Ok(json!({ "success": true }))
}

async fn handle_resize(state: &Arc<GatewayState>, conn_id: &str, payload: Value) -> HandlerResult {
    let params: ResizeParams = parse_params(payload)?;
    let browser_id = require_browser(state, conn_id).await?;
    state
        .pool
        .resize(&browser_id, params.width, params.height)
        .await
        .map_err(pool_error)?;
    Ok(json!({ "success": true }))
}

async fn handle_status(state: &Arc<GatewayState>, conn_id: &str) -> HandlerResult {
    let browser_id = state.browser_for(conn_id).await;
    let stream = match state.stream(conn_id).await {
        Some((stream_state, _)) => Some(stream_state.lock().await.summary()),
        None => None,
    };
    let status = StatusPayload {
        connected: true,
        browser_id,
        active_browsers: state.pool.count().await,
        all_browser_ids: state.pool.list().await,
        stream,
    };
    serde_json::to_value(status)
        .map_err(|e| ErrorShape::new(error_codes::UNKNOWN, e.to_string()))
}

/// `stream-settings`: clamp and apply, force a keyframe, and echo the final
/// settings. The `stream-settings-updated` event is queued while the state
/// lock is held so it always precedes the first frame produced under the new
/// settings.
async fn handle_stream_settings(
    state: &Arc<GatewayState>,
    conn_id: &str,
    session_id: &str,
    payload: Value,
) -> HandlerResult {
    let params: StreamSettingsParams = parse_params(payload)?;
    let Some((stream_state, control)) = state.stream(conn_id).await else {
        return Err(ErrorShape::new(error_codes::NOT_FOUND, "no active stream"));
    };

    let limits = state.limits();
    let settings_value;
    let changed;
    {
        let mut st = stream_state.lock().await;
        let before = st.settings;

        if let Some(fps) = params.fps {
            st.settings.fps = fps;
        }
        if let Some(quality) = params.quality {
            st.settings.quality = quality;
        }
        if let Some(adaptive) = params.adaptive_bitrate {
            st.settings.adaptive = adaptive;
        }
        if let Some(class) = params
            .connection_quality
            .as_deref()
            .and_then(ConnectionClass::parse)
        {
            st.connection_class = class;
            st.settings.keyframe_interval = class.keyframe_interval();
        }
        st.settings.clamp(&limits);

        changed = st.settings != before;
        if changed {
            st.force_keyframe();
            info!(
                conn_id,
                fps = st.settings.fps,
                quality = st.settings.quality,
                adaptive = st.settings.adaptive,
                previous_fps = before.fps,
                previous_quality = before.quality,
                "stream settings updated"
            );
        }
        settings_value = serde_json::to_value(st.settings)
            .map_err(|e| ErrorShape::new(error_codes::UNKNOWN, e.to_string()))?;

        if changed {
            send_event(
                state,
                conn_id,
                events::STREAM_SETTINGS_UPDATED,
                json!({ "settings": settings_value.clone() }),
            )
            .await;
        }
    }
    if changed {
        let _ = control.send(EngineControl::SettingsChanged);
    }

    // Width/height ride along as a viewport resize.
    if let (Some(width), Some(height)) = (params.width, params.height) {
        if let Some(browser_id) = state.browser_for(conn_id).await {
            if let Err(e) = state.pool.resize(&browser_id, width, height).await {
                warn!(conn_id, error = %e, "resize during settings update failed");
            }
        }
    }

    state
        .sessions
        .update(session_id, |s| {
            if let Some(fps) = params.fps {
                s.settings.fps = Some(fps);
            }
            if let Some(quality) = params.quality {
                s.settings.quality = Some(quality);
            }
            if let Some(adaptive) = params.adaptive_bitrate {
                s.settings.adaptive = Some(adaptive);
            }
        })
        .await;

    Ok(json!({ "success": true, "settings": settings_value }))
}

async fn handle_stream_control(
    state: &Arc<GatewayState>,
    conn_id: &str,
    payload: Value,
) -> HandlerResult {
    let params: StreamControlParams = parse_params(payload)?;
    let Some((_, control)) = state.stream(conn_id).await else {
        return Err(ErrorShape::new(error_codes::NOT_FOUND, "no active stream"));
    };

    let msg = if params.streaming {
        EngineControl::Resume
    } else {
        EngineControl::Pause
    };
    control.send(msg).map_err(|_| {
        ErrorShape::new(error_codes::NOT_FOUND, "stream engine not running")
    })?;

    Ok(json!({ "success": true, "streaming": params.streaming }))
}

async fn handle_latency_report(
    state: &Arc<GatewayState>,
    conn_id: &str,
    payload: Value,
) -> HandlerResult {
    let report: LatencyReport = parse_params(payload)?;
    if let Some((_, control)) = state.stream(conn_id).await {
        let _ = control.send(EngineControl::Latency(report.latency));
    }
    Ok(json!({ "success": true }))
}

async fn handle_ping(state: &Arc<GatewayState>, conn_id: &str, payload: Value) -> HandlerResult {
    let params: PingParams = parse_params(payload)?;
    send_event(state, conn_id, events::PONG, json!({ "t0": params.t0 })).await;
    Ok(json!({ "t0": params.t0 }))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_params<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ErrorShape> {
    serde_json::from_value(payload)
        .map_err(|e| ErrorShape::new(error_codes::VALIDATION, format!("bad payload: {e}")))
}

async fn require_browser(state: &Arc<GatewayState>, conn_id: &str) -> Result<String, ErrorShape> {
    state.browser_for(conn_id).await.ok_or_else(|| {
        ErrorShape::new(error_codes::NOT_FOUND, "no browser bound to this socket")
    })
}

/// Map pool errors onto the wire taxonomy.
fn pool_error(err: PoolError) -> ErrorShape {
    let code = match &err {
        PoolError::NotFound(_) => error_codes::NOT_FOUND,
        PoolError::NavigationFailed(_) => error_codes::NAVIGATION,
        PoolError::ScreenshotFailed(_) => error_codes::CAPTURE,
        PoolError::InvalidAction(_) | PoolError::ElementNotFound(_) => error_codes::VALIDATION,
        PoolError::Capacity => error_codes::CAPACITY,
        PoolError::LaunchFailed(_)
        | PoolError::ActionFailed(_)
        | PoolError::Cdp(_)
        | PoolError::Io(_) => error_codes::UNKNOWN,
    };
    ErrorShape::new(code, err.to_string())
}

/// Send a frame on the client's reliable channel.
pub async fn send_control(state: &Arc<GatewayState>, conn_id: &str, frame: &ServerFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(conn_id, error = %e, "failed to serialize outbound frame");
            return false;
        },
    };
    state
        .clients
        .read()
        .await
        .get(conn_id)
        .map(|c| c.send_control(&json))
        .unwrap_or(false)
}

/// Send a server-push event on the reliable channel.
pub async fn send_event(
    state: &Arc<GatewayState>,
    conn_id: &str,
    event: &str,
    payload: Value,
) -> bool {
    let seq = state.next_seq();
    send_control(state, conn_id, &ServerFrame::event(event, payload, seq)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use periscope_config::PeriscopeConfig;
    use tokio::sync::mpsc;

    async fn state_with_client(
        conn_id: &str,
    ) -> (
        Arc<GatewayState>,
        mpsc::UnboundedReceiver<String>,
        mpsc::Receiver<periscope_protocol::FramePayload>,
    ) {
        let state = GatewayState::new(PeriscopeConfig::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(periscope_protocol::FRAME_BUFFER);
        state
            .register_client(crate::state::ConnectedClient {
                conn_id: conn_id.to_string(),
                session_id: "session-1".into(),
                control_tx,
                frame_tx,
                connected_at: std::time::Instant::now(),
                last_activity: std::time::Instant::now(),
            })
            .await;
        (state, control_rx, frame_rx)
    }

    #[tokio::test]
    async fn navigate_without_browser_is_not_found() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        let result = handle_navigate(
            &state,
            "sock-1",
            json!({ "url": "https://example.com" }),
        )
        .await;
        assert_eq!(result.unwrap_err().code, error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn action_rejects_unknown_verbs() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        state.bind_browser("sock-1", "browser-a").await;

        let result = handle_action(&state, "sock-1", json!({ "action": "teleport" })).await;
        assert_eq!(result.unwrap_err().code, error_codes::VALIDATION);
    }

    #[tokio::test]
    async fn action_with_valid_verb_hits_pool() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        state.bind_browser("sock-1", "browser-a").await;

        // The verb parses, so the failure comes from the pool: the bound
        // browser id has no live instance behind it.
        let result = handle_action(
            &state,
            "sock-1",
            json!({ "action": "click", "x": 5.0, "y": 6.0 }),
        )
        .await;
        assert_eq!(result.unwrap_err().code, error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_without_stream() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        let result = handle_status(&state, "sock-1").await.unwrap();
        assert_eq!(result["connected"], json!(true));
        assert_eq!(result["activeBrowsers"], json!(0));
        assert!(result.get("browserId").is_none());
        assert!(result.get("stream").is_none());
    }

    #[tokio::test]
    async fn stream_settings_without_stream_is_not_found() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        let result =
            handle_stream_settings(&state, "sock-1", "session-1", json!({ "fps": 24 })).await;
        assert_eq!(result.unwrap_err().code, error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn ping_echoes_t0_as_pong_event() {
        let (state, mut control, _frames) = state_with_client("sock-1").await;
        let result = handle_ping(&state, "sock-1", json!({ "t0": 123456 }))
            .await
            .unwrap();
        assert_eq!(result["t0"], json!(123456));

        let raw = control.recv().await.unwrap();
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        match frame {
            ServerFrame::Event(event) => {
                assert_eq!(event.event, events::PONG);
                assert_eq!(event.payload.unwrap()["t0"], json!(123456));
            },
            ServerFrame::Ack(_) => panic!("expected event"),
        }
    }

    #[tokio::test]
    async fn dispatch_acks_errors() {
        let (state, mut control, _frames) = state_with_client("sock-1").await;
        dispatch(
            &state,
            "sock-1",
            "session-1",
            ClientFrame {
                id: Some("req-9".into()),
                name: MessageName::Navigate,
                payload: Some(json!({ "url": "https://example.com" })),
            },
        )
        .await;

        let raw = control.recv().await.unwrap();
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        match frame {
            ServerFrame::Ack(ack) => {
                assert_eq!(ack.id, "req-9");
                assert!(!ack.ok);
                assert_eq!(ack.error.unwrap().code, error_codes::NOT_FOUND);
            },
            ServerFrame::Event(_) => panic!("expected ack"),
        }
    }

    #[tokio::test]
    async fn latency_report_without_stream_is_ok() {
        let (state, _control, _frames) = state_with_client("sock-1").await;
        let result =
            handle_latency_report(&state, "sock-1", json!({ "latency": 250 })).await;
        assert!(result.is_ok());
    }
}
