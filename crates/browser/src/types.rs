//! Browser action types, snapshot options, and input helpers.

use serde::{Deserialize, Serialize};

// ── Viewport and snapshots ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// Options for a single screenshot capture. Quality is baked into the raster
/// here; the codec downstream treats the bytes as opaque.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOptions {
    pub format: ImageFormat,
    /// JPEG quality 1-100; ignored for PNG.
    pub quality: u8,
    pub full_page: bool,
}

// ── Launch configuration ─────────────────────────────────────────────────────

/// Pool-level launch configuration.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub max_browsers: usize,
    pub idle_timeout: std::time::Duration,
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub chrome_args: Vec<String>,
    pub navigation_timeout: std::time::Duration,
    pub default_viewport: Viewport,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            max_browsers: 5,
            idle_timeout: std::time::Duration::from_secs(900),
            headless: true,
            chrome_path: None,
            chrome_args: Vec::new(),
            navigation_timeout: std::time::Duration::from_secs(30),
            default_viewport: Viewport {
                width: 1280,
                height: 720,
            },
        }
    }
}

impl From<&periscope_config::schema::BrowserConfig> for LaunchConfig {
    fn from(cfg: &periscope_config::schema::BrowserConfig) -> Self {
        Self {
            max_browsers: cfg.max_browsers,
            idle_timeout: std::time::Duration::from_millis(cfg.idle_timeout_ms),
            headless: cfg.headless,
            chrome_path: cfg.chrome_path.clone(),
            chrome_args: cfg.chrome_args.clone(),
            navigation_timeout: std::time::Duration::from_millis(cfg.navigation_timeout_ms),
            default_viewport: Viewport {
                width: cfg.viewport_width,
                height: cfg.viewport_height,
            },
        }
    }
}

// ── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// The closed set of input actions a client can replay into its browser.
/// Unknown verbs fail deserialization and surface as a validation error.
///
/// All coordinates, including `scroll`/`scrollBy` deltas, are in the
/// browser's device-pixel space (the space CDP input events use), not the
/// client canvas space.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BrowserAction {
    /// Pointer click at image coordinates.
    Click { x: f64, y: f64 },
    DoubleClick { x: f64, y: f64 },
    /// Press; coordinates default to the last pointer position.
    MouseDown {
        button: MouseButton,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    MouseUp {
        button: MouseButton,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    MouseMove { x: f64, y: f64 },
    /// Keystroke sequence.
    Type { text: String },
    /// Single key or a `Mod1+Mod2+K` chord.
    Key { key: String },
    KeyDown { key: String },
    KeyUp { key: String },
    /// Absolute scroll position.
    Scroll { x: i64, y: i64 },
    /// Relative scroll delta.
    ScrollBy { x: i64, y: i64 },
    /// Hover the first element whose visible text contains `text`.
    Hover { text: String },
    Reload,
    GoBack,
    GoForward,
}

impl BrowserAction {
    /// Short verb name for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::DoubleClick { .. } => "doubleClick",
            Self::MouseDown { .. } => "mouseDown",
            Self::MouseUp { .. } => "mouseUp",
            Self::MouseMove { .. } => "mouseMove",
            Self::Type { .. } => "type",
            Self::Key { .. } => "key",
            Self::KeyDown { .. } => "keyDown",
            Self::KeyUp { .. } => "keyUp",
            Self::Scroll { .. } => "scroll",
            Self::ScrollBy { .. } => "scrollBy",
            Self::Hover { .. } => "hover",
            Self::Reload => "reload",
            Self::GoBack => "goBack",
            Self::GoForward => "goForward",
        }
    }
}

// ── Key chords ───────────────────────────────────────────────────────────────

/// A parsed key press: the key name, the CDP modifier bitmask, and the text
/// the key produces when it is a plain printable character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub key: String,
    pub modifiers: i64,
    pub text: Option<String>,
}

/// CDP modifier bits.
const MOD_ALT: i64 = 1;
const MOD_CTRL: i64 = 2;
const MOD_META: i64 = 4;
const MOD_SHIFT: i64 = 8;

/// Parse `"K"` or `"Ctrl+Shift+K"` into a [`KeyChord`]. The last segment is
/// the key; everything before it must be a modifier name.
pub fn parse_key_chord(raw: &str) -> Option<KeyChord> {
    let mut parts: Vec<&str> = raw.split('+').map(str::trim).collect();
    // "+" on its own is the plus key.
    if raw == "+" {
        parts = vec!["+"];
    }
    let key = (*parts.last()?).to_string();
    if key.is_empty() {
        return None;
    }

    let mut modifiers = 0;
    for part in &parts[..parts.len() - 1] {
        modifiers |= match part.to_ascii_lowercase().as_str() {
            "alt" | "option" => MOD_ALT,
            "ctrl" | "control" => MOD_CTRL,
            "meta" | "cmd" | "command" | "super" => MOD_META,
            "shift" => MOD_SHIFT,
            _ => return None,
        };
    }

    // Plain printable keys produce text; chords with ctrl/alt/meta do not.
    let text = if key.chars().count() == 1 && modifiers & (MOD_ALT | MOD_CTRL | MOD_META) == 0 {
        Some(key.clone())
    } else {
        None
    };

    Some(KeyChord {
        key,
        modifiers,
        text,
    })
}

// ── URL normalisation ────────────────────────────────────────────────────────

/// Prepend `https://` when the input lacks a scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "about:blank".into();
    }
    if trimmed.contains("://") || trimmed.starts_with("about:") || trimmed.starts_with("data:") {
        return trimmed.to_string();
    }
    format!("https://{trimmed}")
}

/// Reject navigation targets that do not parse or use a scheme the pool will
/// not drive a browser to.
pub fn validate_url(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("invalid URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" | "about" => Ok(()),
        scheme => Err(format!("unsupported URL scheme {scheme:?}")),
    }
}
