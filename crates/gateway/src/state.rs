use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::sync::{Mutex, RwLock, mpsc},
    tracing::{debug, warn},
};

use {
    periscope_browser::{BrowserPool, LaunchConfig},
    periscope_config::PeriscopeConfig,
    periscope_protocol::FramePayload,
    periscope_sessions::SessionRegistry,
    periscope_streaming::{EngineControl, StreamLimits, StreamState},
};

/// How long connection cleanup waits for an engine task before aborting it.
const ENGINE_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket client currently connected to the gateway.
///
/// Two outbound channels feed one write loop: `control_tx` is unbounded and
/// reliable (acks, events), `frame_tx` is bounded and volatile — the engine
/// drops frames when it fills up.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub session_id: String,
    pub control_tx: mpsc::UnboundedSender<String>,
    pub frame_tx: mpsc::Sender<FramePayload>,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl ConnectedClient {
    /// Send a serialized frame on the reliable channel.
    pub fn send_control(&self, frame: &str) -> bool {
        self.control_tx.send(frame.to_string()).is_ok()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

// ── Stream handle ────────────────────────────────────────────────────────────

/// The router's grip on a running engine: shared state for reads and
/// settings updates, a mailbox for control, and the task handle for teardown.
pub struct StreamHandle {
    pub state: Arc<Mutex<StreamState>>,
    pub control: mpsc::UnboundedSender<EngineControl>,
    pub task: tokio::task::JoinHandle<()>,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// All connected WebSocket clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Per-socket browser ownership: exactly one browser id per conn_id.
    pub socket_browsers: RwLock<HashMap<String, String>>,
    /// Running stream engines, keyed by conn_id.
    pub streams: RwLock<HashMap<String, StreamHandle>>,
    pub pool: Arc<BrowserPool>,
    pub sessions: Arc<SessionRegistry>,
    pub config: PeriscopeConfig,
    /// Monotonically increasing sequence counter for outbound events.
    pub seq: AtomicU64,
}

impl GatewayState {
    pub fn new(config: PeriscopeConfig) -> Arc<Self> {
        let pool = Arc::new(BrowserPool::new(LaunchConfig::from(&config.browser)));
        let sessions = Arc::new(SessionRegistry::new(Duration::from_millis(
            config.security.session_timeout_ms,
        )));
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            socket_browsers: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            pool,
            sessions,
            config,
            seq: AtomicU64::new(0),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Engine clamping bounds derived from config.
    pub fn limits(&self) -> StreamLimits {
        let s = &self.config.streaming;
        StreamLimits {
            min_fps: s.min_fps,
            max_fps: s.max_fps,
            default_fps: s.default_fps,
            min_quality: s.min_quality,
            max_quality: s.max_quality,
            default_quality: self
                .config
                .browser
                .screenshot_quality
                .clamp(s.min_quality, s.max_quality),
        }
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Record the socket → browser binding. At most one browser per socket;
    /// returns false (and leaves the map unchanged) if one is already bound.
    pub async fn bind_browser(&self, conn_id: &str, browser_id: &str) -> bool {
        let mut map = self.socket_browsers.write().await;
        if map.contains_key(conn_id) {
            return false;
        }
        map.insert(conn_id.to_string(), browser_id.to_string());
        true
    }

    pub async fn browser_for(&self, conn_id: &str) -> Option<String> {
        self.socket_browsers.read().await.get(conn_id).cloned()
    }

    pub async fn unbind_browser(&self, conn_id: &str) -> Option<String> {
        self.socket_browsers.write().await.remove(conn_id)
    }

    pub async fn insert_stream(&self, conn_id: &str, handle: StreamHandle) {
        self.streams
            .write()
            .await
            .insert(conn_id.to_string(), handle);
    }

    /// Shared state and mailbox of the socket's engine, if one is running.
    pub async fn stream(
        &self,
        conn_id: &str,
    ) -> Option<(Arc<Mutex<StreamState>>, mpsc::UnboundedSender<EngineControl>)> {
        self.streams
            .read()
            .await
            .get(conn_id)
            .map(|h| (Arc::clone(&h.state), h.control.clone()))
    }

    /// Tear down everything a connection owns: engine first (so no capture
    /// targets a closing browser), then the browser, exactly once.
    pub async fn cleanup_connection(&self, conn_id: &str, session_id: &str) {
        if let Some(handle) = self.streams.write().await.remove(conn_id) {
            let _ = handle.control.send(EngineControl::Shutdown);
            let abort = handle.task.abort_handle();
            match tokio::time::timeout(ENGINE_SHUTDOWN_GRACE, handle.task).await {
                Ok(_) => debug!(conn_id, "stream engine stopped"),
                Err(_) => {
                    warn!(conn_id, "stream engine did not stop in time, aborting");
                    abort.abort();
                },
            }
        }

        if let Some(browser_id) = self.unbind_browser(conn_id).await {
            self.pool.close(&browser_id).await;
            self.sessions.set_browser_id(session_id, None).await;
        }

        self.remove_client(conn_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<GatewayState> {
        GatewayState::new(PeriscopeConfig::default())
    }

    #[tokio::test]
    async fn at_most_one_browser_per_socket() {
        let state = state();
        assert!(state.bind_browser("sock-1", "browser-a").await);
        assert!(!state.bind_browser("sock-1", "browser-b").await);
        assert_eq!(
            state.browser_for("sock-1").await.as_deref(),
            Some("browser-a")
        );

        assert_eq!(
            state.unbind_browser("sock-1").await.as_deref(),
            Some("browser-a")
        );
        assert!(state.browser_for("sock-1").await.is_none());
        assert!(state.unbind_browser("sock-1").await.is_none());
    }

    #[tokio::test]
    async fn limits_derived_from_config() {
        let mut config = PeriscopeConfig::default();
        config.streaming.min_fps = 10;
        config.streaming.max_fps = 40;
        config.browser.screenshot_quality = 99; // above max_quality, clamped

        let state = GatewayState::new(config);
        let limits = state.limits();
        assert_eq!(limits.min_fps, 10);
        assert_eq!(limits.max_fps, 40);
        assert_eq!(limits.default_quality, 95);
    }

    #[tokio::test]
    async fn seq_is_monotonic() {
        let state = state();
        let a = state.next_seq();
        let b = state.next_seq();
        assert!(b > a);
    }

    #[tokio::test]
    async fn cleanup_without_resources_is_noop() {
        let state = state();
        state.cleanup_connection("sock-unknown", "session-unknown").await;
        assert_eq!(state.client_count().await, 0);
        assert_eq!(state.pool.count().await, 0);
    }
}
