//! Stream settings: class presets, clamping, and feedback-driven adaptation.

use serde::{Deserialize, Serialize};

// ── Classes ──────────────────────────────────────────────────────────────────

/// Coarse descriptor of the client's link quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionClass {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl ConnectionClass {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "slow" => Some(Self::Slow),
            "medium" => Some(Self::Medium),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }

    /// Keyframe cadence for this class: slower links get keyframes less often
    /// to keep average frame size down.
    pub fn keyframe_interval(self) -> u32 {
        match self {
            Self::Slow => 15,
            Self::Medium => 10,
            Self::Fast => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Tablet,
    Mobile,
    Tv,
}

impl DeviceClass {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "desktop" => Some(Self::Desktop),
            "tablet" => Some(Self::Tablet),
            "mobile" => Some(Self::Mobile),
            "tv" => Some(Self::Tv),
            _ => None,
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────────────────

/// Configured bounds and defaults the engine clamps against.
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub min_fps: u32,
    pub max_fps: u32,
    pub default_fps: u32,
    pub min_quality: u8,
    pub max_quality: u8,
    pub default_quality: u8,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            min_fps: 5,
            max_fps: 60,
            default_fps: 30,
            min_quality: 20,
            max_quality: 95,
            default_quality: 80,
        }
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// Per-client streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub fps: u32,
    pub quality: u8,
    pub adaptive: bool,
    #[serde(rename = "keyframeInterval")]
    pub keyframe_interval: u32,
}

impl StreamSettings {
    /// Derive initial settings from the class preset, client overrides, and
    /// the configured bounds, in that order.
    pub fn initial(
        connection: ConnectionClass,
        device: DeviceClass,
        fps_override: Option<u32>,
        quality_override: Option<u8>,
        adaptive: bool,
        limits: &StreamLimits,
    ) -> Self {
        let (fps, quality) = preset(connection, device);
        let mut settings = Self {
            fps: fps_override.unwrap_or(fps),
            quality: quality_override.unwrap_or(quality),
            adaptive,
            keyframe_interval: connection.keyframe_interval(),
        };
        settings.clamp(limits);
        settings
    }

    /// Clamp fps and quality into the configured bounds.
    pub fn clamp(&mut self, limits: &StreamLimits) {
        self.fps = self.fps.clamp(limits.min_fps, limits.max_fps);
        self.quality = self.quality.clamp(limits.min_quality, limits.max_quality);
        if self.keyframe_interval == 0 {
            self.keyframe_interval = 1;
        }
    }

    /// React to the observed production rate. Called by the engine after each
    /// frame when adaptive mode is on.
    pub fn adapt_to_pace(&mut self, observed_fps: f64, limits: &StreamLimits) {
        let target = self.fps as f64;
        if observed_fps < 0.9 * target && self.quality > limits.min_quality {
            self.quality = self.quality.saturating_sub(5).max(limits.min_quality);
        } else if observed_fps > 1.1 * target && self.quality < limits.max_quality {
            self.quality = (self.quality + 2).min(limits.max_quality);
        }
    }

    /// React to a client latency report. The number is client-clock derived
    /// and drift-biased, so it is only ever a hint.
    pub fn adapt_to_latency(&mut self, latency_ms: u32, limits: &StreamLimits) {
        if latency_ms > 200 {
            self.quality = self.quality.saturating_sub(5).max(limits.min_quality);
            self.fps = self.fps.saturating_sub(2).max(limits.min_fps);
        } else if latency_ms > 100 {
            self.quality = self.quality.saturating_sub(2).max(limits.min_quality);
        } else {
            let quality_cap = limits.max_quality.min(limits.default_quality);
            if self.quality < quality_cap {
                self.quality += 1;
            }
            if self.fps < limits.default_fps {
                self.fps += 1;
            }
        }
        self.clamp(limits);
    }
}

/// Preset (fps, quality) by connection × device class.
fn preset(connection: ConnectionClass, device: DeviceClass) -> (u32, u8) {
    use {ConnectionClass::*, DeviceClass::*};
    match (connection, device) {
        (Slow, Desktop) => (10, 40),
        (Slow, Tablet) => (10, 35),
        (Slow, Mobile) => (8, 30),
        (Slow, Tv) => (10, 40),
        (Medium, Desktop) => (20, 65),
        (Medium, Tablet) => (18, 60),
        (Medium, Mobile) => (15, 50),
        (Medium, Tv) => (20, 70),
        (Fast, Desktop) => (30, 80),
        (Fast, Tablet) => (30, 75),
        (Fast, Mobile) => (24, 65),
        (Fast, Tv) => (30, 85),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> StreamLimits {
        StreamLimits::default()
    }

    #[test]
    fn initial_from_preset() {
        let s = StreamSettings::initial(
            ConnectionClass::Fast,
            DeviceClass::Desktop,
            None,
            None,
            true,
            &limits(),
        );
        assert_eq!(s.fps, 30);
        assert_eq!(s.quality, 80);
        assert_eq!(s.keyframe_interval, 8);
    }

    #[test]
    fn overrides_clamped_into_bounds() {
        // fps 120 / quality 10 must land on 60 / 20.
        let s = StreamSettings::initial(
            ConnectionClass::Medium,
            DeviceClass::Desktop,
            Some(120),
            Some(10),
            true,
            &limits(),
        );
        assert_eq!(s.fps, 60);
        assert_eq!(s.quality, 20);
    }

    #[test]
    fn keyframe_interval_by_connection_class() {
        assert_eq!(ConnectionClass::Slow.keyframe_interval(), 15);
        assert_eq!(ConnectionClass::Medium.keyframe_interval(), 10);
        assert_eq!(ConnectionClass::Fast.keyframe_interval(), 8);
    }

    #[test]
    fn pace_adaptation_lowers_quality_when_behind() {
        let mut s = StreamSettings {
            fps: 30,
            quality: 80,
            adaptive: true,
            keyframe_interval: 10,
        };
        s.adapt_to_pace(20.0, &limits()); // well below 0.9 * 30
        assert_eq!(s.quality, 75);

        s.adapt_to_pace(40.0, &limits()); // above 1.1 * 30
        assert_eq!(s.quality, 77);
    }

    #[test]
    fn pace_adaptation_respects_floor() {
        let mut s = StreamSettings {
            fps: 30,
            quality: 20,
            adaptive: true,
            keyframe_interval: 10,
        };
        s.adapt_to_pace(5.0, &limits());
        assert_eq!(s.quality, 20);
    }

    #[test]
    fn latency_downshift_three_reports() {
        // Three 250 ms reports: quality 80 → 65, fps 30 → 24.
        let mut s = StreamSettings {
            fps: 30,
            quality: 80,
            adaptive: true,
            keyframe_interval: 10,
        };
        for _ in 0..3 {
            s.adapt_to_latency(250, &limits());
        }
        assert_eq!(s.quality, 65);
        assert_eq!(s.fps, 24);
    }

    #[test]
    fn latency_downshift_bounded_at_floors() {
        let mut s = StreamSettings {
            fps: 6,
            quality: 22,
            adaptive: true,
            keyframe_interval: 10,
        };
        for _ in 0..5 {
            s.adapt_to_latency(500, &limits());
        }
        assert_eq!(s.quality, 20);
        assert_eq!(s.fps, 5);
    }

    #[test]
    fn mid_latency_trims_quality_only() {
        let mut s = StreamSettings {
            fps: 30,
            quality: 80,
            adaptive: true,
            keyframe_interval: 10,
        };
        s.adapt_to_latency(150, &limits());
        assert_eq!(s.quality, 78);
        assert_eq!(s.fps, 30);
    }

    #[test]
    fn low_latency_recovers_toward_defaults() {
        let mut s = StreamSettings {
            fps: 20,
            quality: 60,
            adaptive: true,
            keyframe_interval: 10,
        };
        s.adapt_to_latency(50, &limits());
        assert_eq!(s.quality, 61);
        assert_eq!(s.fps, 21);

        // Recovery never pushes past the default quality.
        let mut s = StreamSettings {
            fps: 30,
            quality: 80,
            adaptive: true,
            keyframe_interval: 10,
        };
        s.adapt_to_latency(50, &limits());
        assert_eq!(s.quality, 80);
        assert_eq!(s.fps, 30);
    }

    #[test]
    fn class_parsing() {
        assert_eq!(ConnectionClass::parse("fast"), Some(ConnectionClass::Fast));
        assert_eq!(ConnectionClass::parse("warp"), None);
        assert_eq!(DeviceClass::parse("tv"), Some(DeviceClass::Tv));
        assert_eq!(DeviceClass::parse("fridge"), None);
    }
}
