//! Glitch - Type Definitions
//!
//! Shared types for the desktop-control agent runtime: the action
//! vocabulary the model speaks, the bounded history entries, the agent
//! configuration, and the collaborator traits the core calls through.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Actions ─────────────────────────────────────────────────────

/// The fixed coordinate space the model is shown. Click coordinates are
/// scaled from this space to the physical display at execution time.
pub const MODEL_SPACE_WIDTH: u32 = 1280;
pub const MODEL_SPACE_HEIGHT: u32 = 720;

/// One step the model asked for. The optional `thought` is logged for
/// visibility but never executed.
#[derive(Clone, Debug, Serialize)]
pub struct Action {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// The closed action vocabulary. The wire tag is the `type` field of the
/// model's JSON output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Click at model-space coordinates (1280x720 reference frame).
    Click { x: f64, y: f64 },
    /// Type text verbatim, optionally pressing Enter afterwards.
    Type {
        text: String,
        #[serde(default)]
        enter: bool,
    },
    /// Press a key or combo such as `enter` or `ctrl+s`.
    #[serde(alias = "press")]
    PressKey { key: String },
    /// Say something through the speech sink.
    Speak { text: String },
    /// Launch an application by name.
    LaunchApp { app: String },
    /// Run a command through the OS run dialog.
    RunCommand { command: String },
    /// Composite messaging flow: open the chat app, find the contact,
    /// send the message.
    SendMessage { contact: String, message: String },
    /// Opaque shell action, delegated wholesale to the shell handler.
    System {
        #[serde(flatten)]
        payload: serde_json::Map<String, Value>,
    },
    /// Terminal action: the task is done, end the session.
    Stop {
        #[serde(default)]
        reason: String,
    },
}

impl ActionKind {
    /// Wire tag of this action, matching the serde `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            ActionKind::Click { .. } => "click",
            ActionKind::Type { .. } => "type",
            ActionKind::PressKey { .. } => "press_key",
            ActionKind::Speak { .. } => "speak",
            ActionKind::LaunchApp { .. } => "launch_app",
            ActionKind::RunCommand { .. } => "run_command",
            ActionKind::SendMessage { .. } => "send_message",
            ActionKind::System { .. } => "system",
            ActionKind::Stop { .. } => "stop",
        }
    }
}

impl Action {
    /// Short description retained in history after the action executes.
    /// Drawn from whichever descriptive field the action carries.
    pub fn summary(&self) -> ActionSummary {
        let text = match &self.kind {
            ActionKind::Click { .. } => "interaction".to_string(),
            ActionKind::Type { text, .. } => truncate(text, 80),
            ActionKind::PressKey { key } => key.clone(),
            ActionKind::Speak { text } => truncate(text, 80),
            ActionKind::LaunchApp { app } => app.clone(),
            ActionKind::RunCommand { command } => truncate(command, 80),
            ActionKind::SendMessage { contact, .. } => format!("to {}", contact),
            ActionKind::System { payload } => payload
                .get("command")
                .and_then(Value::as_str)
                .map(|c| truncate(c, 80))
                .unwrap_or_else(|| "shell action".to_string()),
            ActionKind::Stop { reason } => reason.clone(),
        };
        ActionSummary {
            kind: self.kind.tag().to_string(),
            summary: text,
        }
    }
}

/// The only thing remembered about an executed action.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub kind: String,
    pub summary: String,
}

/// Truncate on a char boundary, appending an ellipsis when cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Gemini API key. Falls back to the `GEMINI_API_KEY` env var when empty.
    pub api_key: String,
    /// Ordered model roster; failover only ever moves forward through it.
    pub models: Vec<String>,
    /// Capture downscale target (JPEG payload sent to the model).
    pub capture_width: u32,
    pub capture_height: u32,
    /// Base sleep between perception cycles, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on base + adaptive delay when fully idle.
    pub max_delay_ms: u64,
    /// Hard floor between consecutive model calls.
    pub min_call_interval_ms: u64,
    /// Starting (and reset) value of the throttling backoff.
    pub backoff_floor_ms: u64,
    /// Upper bound the backoff may grow to.
    pub backoff_cap_ms: u64,
    /// Model calls allowed per rolling 24h window.
    pub daily_request_limit: u32,
    /// Frames whose byte-length differs by less than this percentage of
    /// their average length are treated as the same screen.
    pub similarity_tolerance_pct: f64,
    /// Consecutive static frames tolerated before a decision is forced.
    pub static_ceiling: u32,
    /// Directory where every captured frame is archived for diagnostics.
    pub vision_dir: String,
    /// Application name used by the send_message composite flow.
    pub messaging_app: String,
    pub version: String,
}

/// Default configuration. The pacing values are product tuning observed to
/// keep a free-tier quota alive for a full day of unattended operation.
pub fn default_config() -> AgentConfig {
    AgentConfig {
        api_key: String::new(),
        models: vec![
            "gemini-2.5-flash".to_string(),
            "gemini-2.0-flash-exp".to_string(),
            "gemini-2.0-flash".to_string(),
        ],
        capture_width: 960,
        capture_height: 540,
        base_delay_ms: 30_000,
        max_delay_ms: 60_000,
        min_call_interval_ms: 10_000,
        backoff_floor_ms: 15_000,
        backoff_cap_ms: 120_000,
        daily_request_limit: 15,
        similarity_tolerance_pct: 1.5,
        static_ceiling: 10,
        vision_dir: "~/.glitch/vision".to_string(),
        messaging_app: "whatsapp".to_string(),
        version: "0.1.0".to_string(),
    }
}

// ─── Collaborator Contracts ──────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureFormat {
    Jpeg,
    Png,
}

#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    pub format: CaptureFormat,
}

/// Screen capture provider. Returns `None` when no frame is available;
/// errors are treated as fatal to the single cycle, never the session.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture(&self, options: &CaptureOptions) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Input/automation provider: primitive OS-level actions. Each call may
/// fail; call sites decide whether the failure is absorbed or propagated.
#[async_trait]
pub trait AutomationProvider: Send + Sync {
    /// Physical size of the primary display, in pixels.
    fn screen_size(&self) -> (u32, u32);

    async fn move_mouse(&self, x: i32, y: i32) -> anyhow::Result<()>;
    async fn click(&self) -> anyhow::Result<()>;
    async fn type_text(&self, text: &str) -> anyhow::Result<()>;
    async fn press_key(&self, combo: &str) -> anyhow::Result<()>;
    async fn launch_app(&self, name: &str) -> anyhow::Result<()>;
    async fn run_command(&self, command: &str) -> anyhow::Result<()>;

    /// Titles of currently open windows, best effort. Callers swallow
    /// failures silently.
    async fn open_windows(&self) -> anyhow::Result<Vec<String>>;
}

/// Handler for opaque `system` actions. The core does not interpret the
/// payload beyond handing it over.
#[async_trait]
pub trait ShellActionHandler: Send + Sync {
    async fn handle(&self, payload: &serde_json::Map<String, Value>) -> anyhow::Result<String>;
}

/// Fire-and-forget text sinks. Must never panic or block for long.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;
pub type SpeechSink = Arc<dyn Fn(&str) + Send + Sync>;
