//! HTTP server assembly: routes, CORS, background reapers, shutdown.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade},
        http::{HeaderMap, HeaderValue, header},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    tokio::net::TcpListener,
    tower_http::cors::{Any, CorsLayer},
    tracing::{info, warn},
};

use {periscope_config::PeriscopeConfig, periscope_protocol::SESSION_TOKEN_QUERY};

use crate::{state::GatewayState, ws::handle_connection};

/// Browser idle reaper cadence.
const BROWSER_REAP_INTERVAL: Duration = Duration::from_secs(300);
/// Session reaper cadence.
const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(900);

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server assembly ──────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.config.security.cors_origin);
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .with_state(AppState { gateway: state })
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(origin, "invalid CORS origin, falling back to any");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        },
    }
}

/// Bind and serve until shutdown. A bind failure propagates out and exits
/// non-zero at the binary boundary.
pub async fn run(config: PeriscopeConfig) -> anyhow::Result<()> {
    let state = GatewayState::new(config);
    spawn_reapers(&state);

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(addr = %addr, "gateway listening");

    let app = build_gateway_app(Arc::clone(&state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.pool.close_all().await;
    Ok(())
}

/// Periodic browser idle reaping and session expiry. Reaper errors are
/// logged by the callees and never escape the loop.
fn spawn_reapers(state: &Arc<GatewayState>) {
    let browser_state = Arc::clone(state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(BROWSER_REAP_INTERVAL);
        tick.tick().await; // skip the immediate tick
        loop {
            tick.tick().await;
            let closed = browser_state.pool.reap_idle().await;
            if closed > 0 {
                info!(closed, "idle reaper closed browser instances");
            }
        }
    });

    let session_state = Arc::clone(state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_REAP_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            session_state.sessions.reap_expired().await;
        }
    });
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "activeBrowsers": app.gateway.pool.count().await,
        "connectedClients": app.gateway.client_count().await,
        "sessions": app.gateway.sessions.count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let token = query.get(SESSION_TOKEN_QUERY).cloned();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ws.on_upgrade(move |socket| handle_connection(socket, app.gateway, addr, token, user_agent))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_app_with_default_config() {
        let state = GatewayState::new(PeriscopeConfig::default());
        let _app = build_gateway_app(state);
    }

    #[test]
    fn build_app_with_explicit_origin() {
        let mut config = PeriscopeConfig::default();
        config.security.cors_origin = "https://viewer.example.com".into();
        let state = GatewayState::new(config);
        let _app = build_gateway_app(state);
    }
}
