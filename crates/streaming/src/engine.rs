//! Per-client producer engine.
//!
//! One engine task runs per connected socket. Each iteration captures a
//! screenshot through the [`FrameSource`] seam, encodes it, and emits a
//! [`FramePayload`] on a bounded channel. Frames are volatile: when the
//! channel is full the frame is dropped and pacing continues. Control
//! messages (pause, resume, settings, latency, shutdown) arrive on an
//! unbounded mailbox and are also used to cut the inter-frame sleep short.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info, warn},
};

use periscope_protocol::FramePayload;

use crate::{
    codec,
    error::Result,
    settings::{ConnectionClass, DeviceClass, StreamLimits, StreamSettings},
};

/// Resume restarts the loop immediately when the stream has been dark for
/// longer than this.
const STALE_RESUME: Duration = Duration::from_secs(1);

// ── Frame source seam ────────────────────────────────────────────────────────

/// Capture capability the engine pulls frames from. The gateway implements
/// this over the browser pool; tests use stubs.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Rasterise the current viewport at the given quality.
    async fn capture(&self, quality: u8) -> Result<Vec<u8>>;
}

// ── Stream state ─────────────────────────────────────────────────────────────

/// Mutable per-client streaming state. Owned by the engine task; the router
/// mutates it for settings updates and pause/resume, and reads it for
/// `status` replies. A plain lock suffices — both writers touch it briefly.
#[derive(Debug)]
pub struct StreamState {
    pub socket_id: String,
    pub browser_id: String,
    pub active: bool,
    pub settings: StreamSettings,
    /// Monotonic frame ordinal; frame N is a keyframe when
    /// `N % keyframe_interval == 0`. Reset to 0 on any settings change so the
    /// next frame is self-contained.
    pub keyframe_counter: u32,
    pub last_frame_at: Option<Instant>,
    pub frame_count: u64,
    pub bytes_sent: u64,
    /// Last client latency report. Client-clock derived, drift-biased — a
    /// hint, never an absolute measurement.
    pub observed_latency_ms: Option<u32>,
    pub connection_class: ConnectionClass,
    pub device_class: DeviceClass,
}

impl StreamState {
    pub fn new(
        socket_id: impl Into<String>,
        browser_id: impl Into<String>,
        settings: StreamSettings,
        connection_class: ConnectionClass,
        device_class: DeviceClass,
    ) -> Self {
        Self {
            socket_id: socket_id.into(),
            browser_id: browser_id.into(),
            active: true,
            settings,
            keyframe_counter: 0,
            last_frame_at: None,
            frame_count: 0,
            bytes_sent: 0,
            observed_latency_ms: None,
            connection_class,
            device_class,
        }
    }

    /// Force the next emitted frame to be a keyframe.
    pub fn force_keyframe(&mut self) {
        self.keyframe_counter = 0;
    }

    /// Snapshot for `status` replies.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "active": self.active,
            "targetFps": self.settings.fps,
            "quality": self.settings.quality,
            "adaptive": self.settings.adaptive,
            "keyframeInterval": self.settings.keyframe_interval,
            "frameCount": self.frame_count,
            "bytesSent": self.bytes_sent,
            "observedLatencyMs": self.observed_latency_ms,
            "connectionClass": self.connection_class,
            "deviceClass": self.device_class,
        })
    }
}

// ── Control messages ─────────────────────────────────────────────────────────

/// Mailbox messages from the router to the engine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineControl {
    Resume,
    Pause,
    /// Settings were updated in the shared state; forces a keyframe and cuts
    /// the current sleep short.
    SettingsChanged,
    /// Client latency report in milliseconds.
    Latency(u32),
    Shutdown,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct StreamEngine<S: FrameSource> {
    state: Arc<Mutex<StreamState>>,
    source: S,
    frames: mpsc::Sender<FramePayload>,
    control: mpsc::UnboundedReceiver<EngineControl>,
    limits: StreamLimits,
    epoch: Instant,
}

impl<S: FrameSource> StreamEngine<S> {
    pub fn new(
        state: Arc<Mutex<StreamState>>,
        source: S,
        frames: mpsc::Sender<FramePayload>,
        control: mpsc::UnboundedReceiver<EngineControl>,
        limits: StreamLimits,
    ) -> Self {
        Self {
            state,
            source,
            frames,
            control,
            limits,
            epoch: Instant::now(),
        }
    }

    /// Run the producer loop until shutdown, transport loss, or a capture
    /// failure. Consumes the engine; spawn it on its own task.
    pub async fn run(mut self) {
        let socket_id = self.state.lock().await.socket_id.clone();
        info!(socket_id = %socket_id, "stream engine started");

        loop {
            // Apply any queued control messages before producing.
            loop {
                match self.control.try_recv() {
                    Ok(msg) => {
                        if !self.handle(msg).await {
                            debug!(socket_id = %socket_id, "stream engine shut down");
                            return;
                        }
                    },
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }

            // Park while paused; only a control message can wake us.
            if !self.state.lock().await.active {
                match self.control.recv().await {
                    Some(msg) => {
                        if !self.handle(msg).await {
                            debug!(socket_id = %socket_id, "stream engine shut down");
                            return;
                        }
                        continue;
                    },
                    None => return,
                }
            }

            let tick = Instant::now();

            let (quality, target_fps, keyframe) = {
                let mut st = self.state.lock().await;
                let keyframe = st.keyframe_counter % st.settings.keyframe_interval == 0;
                st.keyframe_counter = st.keyframe_counter.wrapping_add(1);
                (st.settings.quality, st.settings.fps, keyframe)
            };

            let raw = match self.source.capture(quality).await {
                Ok(raw) => raw,
                Err(e) => {
                    // Correctness over silent degradation: the client sees
                    // frame starvation and reinitialises.
                    warn!(socket_id = %socket_id, error = %e, "capture failed, terminating stream");
                    return;
                },
            };

            let encoded = match codec::encode(&raw) {
                Ok(e) => e,
                Err(e) => {
                    warn!(socket_id = %socket_id, error = %e, "encode failed, terminating stream");
                    return;
                },
            };
            let byte_len = encoded.byte_len;

            let frame = FramePayload {
                image: encoded.payload,
                is_keyframe: keyframe,
                quality,
                timestamp: self.epoch.elapsed().as_millis() as u64,
            };

            match self.frames.try_send(frame) {
                Ok(()) => {},
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(socket_id = %socket_id, "frame dropped under backpressure");
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Transport gone; exit silently.
                    return;
                },
            }

            {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                if st.settings.adaptive {
                    if let Some(prev) = st.last_frame_at {
                        let elapsed_ms = now.duration_since(prev).as_millis().max(1) as f64;
                        let limits = self.limits;
                        st.settings.adapt_to_pace(1000.0 / elapsed_ms, &limits);
                    }
                }
                st.last_frame_at = Some(now);
                st.frame_count += 1;
                st.bytes_sent += byte_len as u64;
            }

            let period = Duration::from_millis(u64::from(1000 / target_fps.max(1)).max(1));
            let sleep_for = period
                .saturating_sub(tick.elapsed())
                .max(Duration::from_millis(1));

            // Sleep out the frame budget. Latency reports are absorbed
            // without disturbing the cadence; pause/resume/settings changes
            // cut the sleep short.
            let deadline = tokio::time::Instant::now() + sleep_for;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    msg = self.control.recv() => match msg {
                        Some(msg @ EngineControl::Latency(_)) => {
                            if !self.handle(msg).await {
                                return;
                            }
                        },
                        Some(msg) => {
                            if !self.handle(msg).await {
                                debug!(socket_id = %socket_id, "stream engine shut down");
                                return;
                            }
                            break;
                        },
                        None => return,
                    },
                }
            }
        }
    }

    /// Apply one control message. Returns `false` on shutdown.
    async fn handle(&mut self, msg: EngineControl) -> bool {
        match msg {
            EngineControl::Resume => {
                let mut st = self.state.lock().await;
                if !st.active {
                    st.active = true;
                    // Resume always restarts with a self-contained frame; a
                    // stale stream additionally skips any residual sleep by
                    // falling straight into the next iteration.
                    st.force_keyframe();
                    let stale = st
                        .last_frame_at
                        .map(|t| t.elapsed() > STALE_RESUME)
                        .unwrap_or(true);
                    info!(socket_id = %st.socket_id, stale, "stream resumed");
                }
            },
            EngineControl::Pause => {
                let mut st = self.state.lock().await;
                if st.active {
                    st.active = false;
                    info!(socket_id = %st.socket_id, "stream paused");
                }
            },
            EngineControl::SettingsChanged => {
                self.state.lock().await.force_keyframe();
            },
            EngineControl::Latency(ms) => {
                let mut st = self.state.lock().await;
                st.observed_latency_ms = Some(ms);
                if st.settings.adaptive {
                    let limits = self.limits;
                    st.settings.adapt_to_latency(ms, &limits);
                }
            },
            EngineControl::Shutdown => return false,
        }
        true
    }
}
