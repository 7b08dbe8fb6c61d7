//! Agent Configuration
//!
//! Loads and saves the agent's configuration from `~/.glitch/glitch.json`.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_config, AgentConfig};

/// Config file name within the agent directory.
const CONFIG_FILENAME: &str = "glitch.json";

/// Returns the agent's state directory: `~/.glitch`.
pub fn get_agent_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".glitch")
}

/// Returns the full path to the config file: `~/.glitch/glitch.json`.
pub fn get_config_path() -> PathBuf {
    get_agent_dir().join(CONFIG_FILENAME)
}

/// Load the agent config from disk.
///
/// Reads `~/.glitch/glitch.json`, merges missing fields with defaults, and
/// falls back to the `GEMINI_API_KEY` environment variable when the file
/// does not carry a key.
///
/// Returns `None` if the config file does not exist or cannot be parsed.
pub fn load_config() -> Option<AgentConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: AgentConfig = serde_json::from_str(&contents).ok()?;

    merge_defaults(&mut config);

    // Fall back to the environment for the API key if the file has none
    if config.api_key.is_empty() {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.api_key = key;
        }
    }

    Some(config)
}

/// Fill unset fields with defaults so older config files keep working.
pub fn merge_defaults(config: &mut AgentConfig) {
    let defaults = default_config();

    if config.models.is_empty() {
        config.models = defaults.models;
    }
    if config.capture_width == 0 {
        config.capture_width = defaults.capture_width;
    }
    if config.capture_height == 0 {
        config.capture_height = defaults.capture_height;
    }
    if config.base_delay_ms == 0 {
        config.base_delay_ms = defaults.base_delay_ms;
    }
    if config.max_delay_ms == 0 {
        config.max_delay_ms = defaults.max_delay_ms;
    }
    if config.min_call_interval_ms == 0 {
        config.min_call_interval_ms = defaults.min_call_interval_ms;
    }
    if config.backoff_floor_ms == 0 {
        config.backoff_floor_ms = defaults.backoff_floor_ms;
    }
    if config.backoff_cap_ms == 0 {
        config.backoff_cap_ms = defaults.backoff_cap_ms;
    }
    if config.daily_request_limit == 0 {
        config.daily_request_limit = defaults.daily_request_limit;
    }
    if config.similarity_tolerance_pct <= 0.0 {
        config.similarity_tolerance_pct = defaults.similarity_tolerance_pct;
    }
    if config.static_ceiling == 0 {
        config.static_ceiling = defaults.static_ceiling;
    }
    if config.vision_dir.is_empty() {
        config.vision_dir = defaults.vision_dir;
    }
    if config.messaging_app.is_empty() {
        config.messaging_app = defaults.messaging_app;
    }
    if config.version.is_empty() {
        config.version = defaults.version;
    }
}

/// Save the agent config to disk at `~/.glitch/glitch.json`.
///
/// Creates the agent directory with mode 0o700 if it does not exist. The
/// config file is written with mode 0o600 since it may contain an API key.
pub fn save_config(config: &AgentConfig) -> Result<()> {
    let dir = get_agent_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create agent directory")?;
        #[cfg(unix)]
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    #[cfg(unix)]
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
///
/// If the path starts with `~`, the tilde is replaced with the user's home
/// directory. Otherwise the path is returned as-is.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}
