//! Streaming gateway WebSocket protocol definitions.
//!
//! All communication uses JSON text frames over a single WebSocket per
//! client.
//!
//! Frame types:
//! - `ClientFrame` — client → gateway command; carries an optional `id`,
//!   in which case the gateway replies with exactly one ack.
//! - `ServerFrame` — gateway → client: either an `ack` correlated by id or
//!   a server-push `event` (`connected`, `frame`, `pong`,
//!   `stream-settings-updated`).

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Maximum accepted size of a single inbound text frame.
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KB

/// Outbound frames buffered per client before the engine starts dropping.
/// Frames are volatile; control traffic uses a separate unbounded channel.
pub const FRAME_BUFFER: usize = 8;

/// Query parameter carrying the optional session token on upgrade.
pub const SESSION_TOKEN_QUERY: &str = "token";

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION: &str = "VALIDATION";
    pub const CAPTURE: &str = "CAPTURE";
    pub const NAVIGATION: &str = "NAVIGATION";
    pub const CODEC: &str = "CODEC";
    pub const CAPACITY: &str = "CAPACITY";
    pub const TRANSPORT: &str = "TRANSPORT";
    pub const UNKNOWN: &str = "UNKNOWN";
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Message names ────────────────────────────────────────────────────────────

/// The closed set of inbound command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageName {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "navigate")]
    Navigate,
    #[serde(rename = "action")]
    Action,
    #[serde(rename = "resize")]
    Resize,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "stream-settings")]
    StreamSettings,
    #[serde(rename = "stream-control")]
    StreamControl,
    #[serde(rename = "latency-report")]
    LatencyReport,
    #[serde(rename = "ping")]
    Ping,
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway command frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Ack correlation id. When present the gateway sends exactly one ack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: MessageName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Gateway → client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "ack")]
    Ack(AckFrame),
    #[serde(rename = "event")]
    Event(EventFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl ServerFrame {
    pub fn ack_ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Ack(AckFrame {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        })
    }

    pub fn ack_err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self::Ack(AckFrame {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        })
    }

    pub fn event(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self::Event(EventFrame {
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        })
    }
}

// ── Inbound payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitParams {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub quality: Option<u8>,
    #[serde(rename = "adaptiveBitrate")]
    pub adaptive_bitrate: Option<bool>,
    #[serde(rename = "connectionQuality")]
    pub connection_quality: Option<String>,
    #[serde(rename = "deviceType")]
    pub device_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettingsParams {
    pub fps: Option<u32>,
    pub quality: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(rename = "adaptiveBitrate")]
    pub adaptive_bitrate: Option<bool>,
    #[serde(rename = "connectionQuality")]
    pub connection_quality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamControlParams {
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    pub latency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingParams {
    pub t0: u64,
}

// ── Outbound payloads ────────────────────────────────────────────────────────

/// Sent once after the socket is accepted and the session is bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    #[serde(rename = "browserId", skip_serializing_if = "Option::is_none")]
    pub browser_id: Option<String>,
}

/// One streamed frame. Every frame is a self-contained image; `isKeyframe`
/// only drives client-side reset logic, no delta encoding exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePayload {
    /// Base64 of the DEFLATE-compressed raster bytes. No MIME prefix — the
    /// client prepends the data-URL prefix after decompression.
    pub image: String,
    #[serde(rename = "isKeyframe")]
    pub is_keyframe: bool,
    pub quality: u8,
    /// Producer-monotonic milliseconds. Non-decreasing per socket.
    pub timestamp: u64,
}

/// Reply payload for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub connected: bool,
    #[serde(rename = "browserId", skip_serializing_if = "Option::is_none")]
    pub browser_id: Option<String>,
    #[serde(rename = "activeBrowsers")]
    pub active_browsers: usize,
    #[serde(rename = "allBrowserIds")]
    pub all_browser_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<serde_json::Value>,
}

// ── Event names ──────────────────────────────────────────────────────────────

pub mod events {
    pub const CONNECTED: &str = "connected";
    pub const FRAME: &str = "frame";
    pub const PONG: &str = "pong";
    pub const STREAM_SETTINGS_UPDATED: &str = "stream-settings-updated";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_round_trip() {
        let frame = ClientFrame {
            id: Some("r1".into()),
            name: MessageName::StreamSettings,
            payload: Some(serde_json::json!({ "fps": 24, "quality": 70 })),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"stream-settings\""));
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id.as_deref(), Some("r1"));
        assert_eq!(back.name, MessageName::StreamSettings);
    }

    #[test]
    fn client_frame_without_ack_id() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"name":"latency-report","payload":{"latency":250}}"#).unwrap();
        assert!(frame.id.is_none());
        assert_eq!(frame.name, MessageName::LatencyReport);
    }

    #[test]
    fn unknown_message_name_rejected() {
        let err = serde_json::from_str::<ClientFrame>(r#"{"name":"shutdown"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn ack_frames_tagged() {
        let ok = ServerFrame::ack_ok("a", serde_json::json!({ "success": true }));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"type\":\"ack\""));

        let err = ServerFrame::ack_err(
            "b",
            ErrorShape::new(error_codes::NOT_FOUND, "no browser for socket"),
        );
        let json = serde_json::to_string(&err).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        match back {
            ServerFrame::Ack(ack) => {
                assert!(!ack.ok);
                assert_eq!(ack.error.unwrap().code, error_codes::NOT_FOUND);
            },
            ServerFrame::Event(_) => panic!("expected ack"),
        }
    }

    #[test]
    fn frame_payload_wire_names() {
        let payload = FramePayload {
            image: "eJw=".into(),
            is_keyframe: true,
            quality: 80,
            timestamp: 1234,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"isKeyframe\":true"));
        assert!(!json.contains("is_keyframe"));
    }

    #[test]
    fn init_params_defaults() {
        let params: InitParams = serde_json::from_str("{}").unwrap();
        assert!(params.url.is_none());
        assert!(params.fps.is_none());

        let params: InitParams =
            serde_json::from_str(r#"{"fps":120,"quality":10,"adaptiveBitrate":false}"#).unwrap();
        assert_eq!(params.fps, Some(120));
        assert_eq!(params.quality, Some(10));
        assert_eq!(params.adaptive_bitrate, Some(false));
    }
}
