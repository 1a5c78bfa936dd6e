//! Config schema types (server, browser, streaming, security, features,
//! storage).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriscopeConfig {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub streaming: StreamingConfig,
    pub security: SecurityConfig,
    pub features: FeaturesConfig,
    pub storage: StorageConfig,
}

impl PeriscopeConfig {
    /// Sanity-check bounds that would otherwise wedge the stream engine.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.streaming;
        if s.min_fps == 0 || s.min_fps > s.max_fps {
            anyhow::bail!("streaming.min_fps must be in 1..=max_fps (got {})", s.min_fps);
        }
        if !(s.min_fps..=s.max_fps).contains(&s.default_fps) {
            anyhow::bail!(
                "streaming.default_fps {} outside [{}, {}]",
                s.default_fps,
                s.min_fps,
                s.max_fps
            );
        }
        if s.min_quality > s.max_quality || s.max_quality > 100 {
            anyhow::bail!(
                "streaming quality bounds invalid: [{}, {}]",
                s.min_quality,
                s.max_quality
            );
        }
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.browser.max_browsers == 0 {
            anyhow::bail!("browser.max_browsers must be at least 1");
        }
        match self.browser.screenshot_format.as_str() {
            "jpeg" | "png" => {},
            other => anyhow::bail!("browser.screenshot_format must be jpeg or png, got {other}"),
        }
        Ok(())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8002,
        }
    }
}

/// Browser pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Page loaded into a freshly created instance when the client gives none.
    pub default_url: String,
    /// Hard cap on concurrent browser instances; the LRU instance is evicted
    /// when a create would exceed it.
    pub max_browsers: usize,
    /// Instances idle longer than this are closed by the reaper.
    pub idle_timeout_ms: u64,
    /// Raster quality baked into JPEG screenshots (1-100).
    pub screenshot_quality: u8,
    /// "jpeg" or "png".
    pub screenshot_format: String,
    pub headless: bool,
    /// Path to a Chrome/Chromium binary (auto-detected if unset).
    pub chrome_path: Option<String>,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
    pub navigation_timeout_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            default_url: "https://www.google.com".into(),
            max_browsers: 5,
            idle_timeout_ms: 900_000, // 15 min
            screenshot_quality: 80,
            screenshot_format: "jpeg".into(),
            headless: true,
            chrome_path: None,
            chrome_args: Vec::new(),
            navigation_timeout_ms: 30_000,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Stream engine bounds and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub default_fps: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    pub keyframe_interval: u32,
    pub min_quality: u8,
    pub max_quality: u8,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_fps: 30,
            min_fps: 5,
            max_fps: 60,
            keyframe_interval: 10,
            min_quality: 20,
            max_quality: 95,
        }
    }
}

/// Security-adjacent settings consumed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allowed CORS origin; `*` allows any.
    pub cors_origin: String,
    /// Sessions idle longer than this are expired.
    pub session_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origin: "*".into(),
            session_timeout_ms: 7_200_000, // 2 h
        }
    }
}

/// Feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Default for clients that do not state an adaptive-bitrate preference.
    pub adaptive_bitrate: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            adaptive_bitrate: true,
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit config file path; discovery is used when unset.
    pub config_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PeriscopeConfig::default().validate().unwrap();
    }

    #[test]
    fn default_values_match_documented() {
        let cfg = PeriscopeConfig::default();
        assert_eq!(cfg.server.port, 8002);
        assert_eq!(cfg.browser.max_browsers, 5);
        assert_eq!(cfg.browser.idle_timeout_ms, 900_000);
        assert_eq!(cfg.browser.screenshot_quality, 80);
        assert_eq!(cfg.streaming.default_fps, 30);
        assert_eq!(cfg.streaming.min_fps, 5);
        assert_eq!(cfg.streaming.max_fps, 60);
        assert_eq!(cfg.streaming.keyframe_interval, 10);
        assert_eq!(cfg.security.session_timeout_ms, 7_200_000);
        assert_eq!(cfg.security.cors_origin, "*");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: PeriscopeConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [streaming]
            default_fps = 24
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.streaming.default_fps, 24);
        assert_eq!(cfg.streaming.max_fps, 60);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut cfg = PeriscopeConfig::default();
        cfg.streaming.min_fps = 61;
        assert!(cfg.validate().is_err());

        let mut cfg = PeriscopeConfig::default();
        cfg.streaming.min_quality = 96;
        assert!(cfg.validate().is_err());

        let mut cfg = PeriscopeConfig::default();
        cfg.browser.screenshot_format = "webp".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_default_fps_outside_bounds() {
        let mut cfg = PeriscopeConfig::default();
        cfg.streaming.default_fps = 90;
        assert!(cfg.validate().is_err());
    }
}
