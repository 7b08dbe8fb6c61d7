//! Desktop Automation
//!
//! The default input provider: enigo-driven mouse and keyboard. Input
//! handles are not `Send`, so each action constructs a fresh handle on a
//! blocking thread. App launch and run-dialog commands are composed from
//! the same primitives the way a user would drive the OS search.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use tokio::time::sleep;
use xcap::Monitor;

use crate::types::AutomationProvider;

/// Settle time after pressing the OS search key.
const SEARCH_OPEN_WAIT: Duration = Duration::from_millis(500);
/// Settle time while OS search results populate.
const SEARCH_RESULTS_WAIT: Duration = Duration::from_millis(800);
/// How long a launched app gets to draw its window.
const APP_START_WAIT: Duration = Duration::from_secs(5);
/// Messaging apps initialize their UI noticeably slower.
const HEAVY_APP_START_WAIT: Duration = Duration::from_secs(7);
/// Settle time inside the run dialog.
const RUN_DIALOG_WAIT: Duration = Duration::from_millis(500);
const RUN_COMMAND_WAIT: Duration = Duration::from_secs(2);

/// Window titles that never matter to the agent (shell surfaces and
/// input overlays), matched case-insensitively as substrings.
const SKIP_TITLES: &[&str] = &[
    "program manager",
    "windows input experience",
    "task view",
    "system tray",
    "notification area",
];

pub struct DesktopAutomation {
    screen: (u32, u32),
}

impl DesktopAutomation {
    /// Probe the primary display bounds once; everything else is
    /// stateless per call.
    pub fn new() -> Result<Self> {
        let monitors =
            Monitor::all().map_err(|e| anyhow!("Failed to enumerate monitors: {}", e))?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first())
            .ok_or_else(|| anyhow!("No monitors found"))?;

        let width = monitor
            .width()
            .map_err(|e| anyhow!("Failed to read display width: {}", e))?;
        let height = monitor
            .height()
            .map_err(|e| anyhow!("Failed to read display height: {}", e))?;

        Ok(Self {
            screen: (width, height),
        })
    }

    /// Run one injection closure with a fresh enigo handle on a blocking
    /// thread.
    async fn with_input<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Enigo) -> Result<()> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut enigo = Enigo::new(&Settings::default())
                .map_err(|e| anyhow!("Input handle init failed: {}", e))?;
            f(&mut enigo)
        })
        .await
        .context("Input task join failed")?
    }
}

#[async_trait]
impl AutomationProvider for DesktopAutomation {
    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    async fn move_mouse(&self, x: i32, y: i32) -> Result<()> {
        self.with_input(move |enigo| {
            enigo
                .move_mouse(x, y, Coordinate::Abs)
                .map_err(|e| anyhow!("Mouse move failed: {}", e))
        })
        .await
    }

    async fn click(&self) -> Result<()> {
        self.with_input(|enigo| {
            enigo
                .button(Button::Left, Direction::Click)
                .map_err(|e| anyhow!("Click failed: {}", e))
        })
        .await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.with_input(move |enigo| {
            enigo
                .text(&text)
                .map_err(|e| anyhow!("Typing failed: {}", e))
        })
        .await
    }

    async fn press_key(&self, combo: &str) -> Result<()> {
        let combo = combo.to_string();
        self.with_input(move |enigo| press_combo(enigo, &combo)).await
    }

    /// Launch an app the way a user would: OS search, type the name,
    /// Enter, then wait for the window.
    async fn launch_app(&self, name: &str) -> Result<()> {
        self.press_key("meta").await?;
        sleep(SEARCH_OPEN_WAIT).await;
        self.type_text(name).await?;
        sleep(SEARCH_RESULTS_WAIT).await;
        self.press_key("enter").await?;

        let settle = if name.to_lowercase().contains("whatsapp") {
            HEAVY_APP_START_WAIT
        } else {
            APP_START_WAIT
        };
        sleep(settle).await;
        Ok(())
    }

    /// Run a command through the OS run dialog (meta+R on Windows-style
    /// desktops).
    async fn run_command(&self, command: &str) -> Result<()> {
        self.press_key("meta+r").await?;
        sleep(RUN_DIALOG_WAIT).await;
        self.type_text(command).await?;
        sleep(Duration::from_millis(200)).await;
        self.press_key("enter").await?;
        sleep(RUN_COMMAND_WAIT).await;
        Ok(())
    }

    async fn open_windows(&self) -> Result<Vec<String>> {
        tokio::task::spawn_blocking(list_window_titles)
            .await
            .context("Window listing task join failed")?
    }
}

/// Press a single key or a `mod+mod+key` combo: modifiers held, the
/// final key clicked, modifiers released in reverse order.
fn press_combo(enigo: &mut Enigo, combo: &str) -> Result<()> {
    let parts: Vec<String> = combo
        .to_lowercase()
        .split('+')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let keys: Vec<Key> = parts.iter().map(|p| parse_key(p)).collect();
    let Some((last, modifiers)) = keys.split_last() else {
        return Ok(());
    };

    for modifier in modifiers {
        enigo
            .key(*modifier, Direction::Press)
            .map_err(|e| anyhow!("Key press failed: {}", e))?;
    }
    let result = enigo
        .key(*last, Direction::Click)
        .map_err(|e| anyhow!("Key press failed: {}", e));
    for modifier in modifiers.iter().rev() {
        enigo
            .key(*modifier, Direction::Release)
            .map_err(|e| anyhow!("Key release failed: {}", e))?;
    }
    result
}

/// Map key names the model uses to enigo keys. Unrecognized single
/// characters pass through as unicode keys.
fn parse_key(name: &str) -> Key {
    match name {
        "enter" | "return" => Key::Return,
        "escape" | "esc" => Key::Escape,
        "tab" => Key::Tab,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "win" | "windows" | "cmd" | "meta" | "super" => Key::Meta,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        other => Key::Unicode(other.chars().next().unwrap_or(' ')),
    }
}

/// Titles of open, non-minimized windows, topmost first, with shell
/// surfaces filtered out.
fn list_window_titles() -> Result<Vec<String>> {
    let windows =
        xcap::Window::all().map_err(|e| anyhow!("Failed to enumerate windows: {}", e))?;

    let titles = windows
        .into_iter()
        .filter_map(|w| {
            if w.is_minimized().unwrap_or(false) {
                return None;
            }
            let title = w.title().ok()?;
            if title.trim().is_empty() {
                return None;
            }
            let lower = title.to_lowercase();
            if SKIP_TITLES.iter().any(|skip| lower.contains(skip)) {
                return None;
            }
            Some(title)
        })
        .collect();

    Ok(titles)
}

// ─── Tool Discovery ──────────────────────────────────────────────

/// Names of developer tools worth telling the model about.
const TOOL_CANDIDATES: &[&str] = &["code", "python", "node", "git"];

/// Probe which known tools exist on this machine. Used once at session
/// start to ground the model's strategy choices.
pub async fn discover_tools() -> Vec<String> {
    let mut found = Vec::new();
    for tool in TOOL_CANDIDATES {
        if binary_exists(tool).await {
            found.push(tool.to_string());
        }
    }
    if cfg!(windows) {
        found.push("notepad".to_string());
    }
    found
}

async fn binary_exists(name: &str) -> bool {
    let probe = if cfg!(windows) { "where" } else { "which" };
    tokio::process::Command::new(probe)
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_maps_named_keys() {
        assert!(matches!(parse_key("enter"), Key::Return));
        assert!(matches!(parse_key("esc"), Key::Escape));
        assert!(matches!(parse_key("win"), Key::Meta));
        assert!(matches!(parse_key("cmd"), Key::Meta));
        assert!(matches!(parse_key("ctrl"), Key::Control));
    }

    #[test]
    fn test_parse_key_falls_back_to_unicode() {
        assert!(matches!(parse_key("s"), Key::Unicode('s')));
        assert!(matches!(parse_key("r"), Key::Unicode('r')));
    }

    #[tokio::test]
    async fn test_discover_tools_probes_quietly() {
        // No assertion on contents: the host may or may not carry the
        // tools. The probe itself must not fail or hang.
        let _ = discover_tools().await;
    }
}
