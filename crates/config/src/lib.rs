//! Configuration for the periscope gateway.
//!
//! Config is loaded in three layers: built-in defaults, an optional config
//! file (`periscope.toml` or `periscope.json`, project-local or under
//! `~/.config/periscope/`), and environment variable overrides.

pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config},
    schema::PeriscopeConfig,
};
