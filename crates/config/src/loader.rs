use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::PeriscopeConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["periscope.toml", "periscope.json"];

/// Load config from the given path (format picked by extension), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<PeriscopeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let mut cfg = parse_config(&raw, path)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./periscope.{toml,json}` (project-local)
/// 2. `~/.config/periscope/periscope.{toml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) when no file is found.
pub fn discover_and_load() -> anyhow::Result<PeriscopeConfig> {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        return load_config(&path);
    }
    debug!("no config file found, using defaults");
    let mut cfg = PeriscopeConfig::default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "periscope") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/periscope/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "periscope").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("periscope.toml")
}

/// Serialize `config` to TOML and write it to `path` (or the discovered /
/// default path when `None`). Creates parent directories if needed.
pub fn save_config(config: &PeriscopeConfig, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(find_or_default_config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<PeriscopeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

// ── Environment overrides ────────────────────────────────────────────────────

/// Apply the documented environment variables on top of `cfg`.
/// Malformed values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut PeriscopeConfig) {
    if let Ok(v) = std::env::var("HOST") {
        if !v.is_empty() {
            cfg.server.host = v;
        }
    }
    if let Ok(v) = std::env::var("CORS_ORIGIN") {
        if !v.is_empty() {
            cfg.security.cors_origin = v;
        }
    }
    if let Ok(v) = std::env::var("DEFAULT_URL") {
        if !v.is_empty() {
            cfg.browser.default_url = v;
        }
    }
    if let Ok(v) = std::env::var("SCREENSHOT_TYPE") {
        if !v.is_empty() {
            cfg.browser.screenshot_format = v;
        }
    }

    override_num("PORT", &mut cfg.server.port);
    override_num("MAX_BROWSERS", &mut cfg.browser.max_browsers);
    override_num("BROWSER_TIMEOUT", &mut cfg.browser.idle_timeout_ms);
    override_num("SCREENSHOT_QUALITY", &mut cfg.browser.screenshot_quality);
    override_num("DEFAULT_FPS", &mut cfg.streaming.default_fps);
    override_num("MIN_FPS", &mut cfg.streaming.min_fps);
    override_num("MAX_FPS", &mut cfg.streaming.max_fps);
    override_num("KEYFRAME_INTERVAL", &mut cfg.streaming.keyframe_interval);
    override_num("SESSION_TIMEOUT", &mut cfg.security.session_timeout_ms);
}

fn override_num<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        if raw.is_empty() {
            return;
        }
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!(var, value = %raw, "ignoring malformed numeric env override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_by_extension() {
        let cfg = parse_config(
            "[server]\nport = 8100\n",
            Path::new("periscope.toml"),
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8100);
    }

    #[test]
    fn parse_json_by_extension() {
        let cfg = parse_config(
            r#"{ "browser": { "max_browsers": 2 } }"#,
            Path::new("periscope.json"),
        )
        .unwrap();
        assert_eq!(cfg.browser.max_browsers, 2);
        assert_eq!(cfg.server.port, 8002);
    }

    #[test]
    fn unsupported_extension_rejected() {
        assert!(parse_config("", Path::new("periscope.yaml")).is_err());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("periscope.toml");

        let mut cfg = PeriscopeConfig::default();
        cfg.server.port = 8111;
        cfg.browser.max_browsers = 3;
        let written = save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server.port, 8111);
        assert_eq!(loaded.browser.max_browsers, 3);
    }
}
