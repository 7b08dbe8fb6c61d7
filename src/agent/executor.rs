//! Action Executor
//!
//! Translates one model action into automation-provider calls, records a
//! summary into history before dispatch, and tells the loop whether the
//! session should end. Click coordinates arrive in the model's fixed
//! 1280x720 space and are scaled to the physical display here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::time::sleep;

use crate::types::{
    Action, ActionKind, ActionSummary, AutomationProvider, LogSink, ShellActionHandler,
    SpeechSink, MODEL_SPACE_HEIGHT, MODEL_SPACE_WIDTH,
};

use super::history::ActionHistory;

/// Settle pause after moving the pointer, before clicking.
const HOVER_SETTLE: Duration = Duration::from_millis(100);
/// Settle pause after a click so the UI can react.
const CLICK_SETTLE: Duration = Duration::from_millis(200);
/// Pause after typing so the target can buffer the text.
const TYPE_SETTLE: Duration = Duration::from_millis(500);
/// Extra pause after shortcuts that open dialogs or move focus.
const DIALOG_SETTLE: Duration = Duration::from_millis(800);

// Fixed timings of the messaging composite. The long waits cover search
// indexing and chat-view loading in desktop messaging apps.
const SEARCH_OPEN_WAIT: Duration = Duration::from_millis(800);
const CONTACT_RESULTS_WAIT: Duration = Duration::from_millis(1_500);
const CHAT_OPEN_WAIT: Duration = Duration::from_millis(1_200);
const MESSAGE_BUFFER_WAIT: Duration = Duration::from_millis(500);
const SEND_WAIT: Duration = Duration::from_millis(1_000);

/// Per-axis scaling from model space to the physical display, computed
/// once at session start from the real display bounds.
#[derive(Clone, Copy, Debug)]
pub struct CoordinateScale {
    sx: f64,
    sy: f64,
}

impl CoordinateScale {
    pub fn from_screen(width: u32, height: u32) -> Self {
        Self {
            sx: f64::from(width) / f64::from(MODEL_SPACE_WIDTH),
            sy: f64::from(height) / f64::from(MODEL_SPACE_HEIGHT),
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (i32, i32) {
        ((x * self.sx).round() as i32, (y * self.sy).round() as i32)
    }

    pub fn factors(&self) -> (f64, f64) {
        (self.sx, self.sy)
    }
}

pub struct ActionExecutor {
    automation: Arc<dyn AutomationProvider>,
    shell: Arc<dyn ShellActionHandler>,
    speak: SpeechSink,
    log: LogSink,
    scale: CoordinateScale,
    messaging_app: String,
}

impl ActionExecutor {
    pub fn new(
        automation: Arc<dyn AutomationProvider>,
        shell: Arc<dyn ShellActionHandler>,
        speak: SpeechSink,
        log: LogSink,
        scale: CoordinateScale,
        messaging_app: String,
    ) -> Self {
        Self {
            automation,
            shell,
            speak,
            log,
            scale,
            messaging_app,
        }
    }

    /// Execute one action. Returns `true` when the action was a terminal
    /// stop and the session must end after it.
    pub async fn execute(&self, action: &Action, history: &mut ActionHistory) -> Result<bool> {
        history.record(action.summary());

        match &action.kind {
            ActionKind::Click { x, y } => {
                let (sx, sy) = self.scale.apply(*x, *y);
                (self.log)(&format!(
                    "Clicking at ({}, {}) [scaled from {}, {}]",
                    sx, sy, x, y
                ));
                self.automation.move_mouse(sx, sy).await?;
                sleep(HOVER_SETTLE).await;
                self.automation.click().await?;
                sleep(CLICK_SETTLE).await;
            }
            ActionKind::Type { text, enter } => {
                (self.log)(&format!(
                    "Typing: '{}'{}",
                    crate::types::truncate(text, 50),
                    if *enter { " + Enter" } else { "" }
                ));
                self.automation.type_text(text).await?;
                sleep(TYPE_SETTLE).await;
                if *enter {
                    self.automation.press_key("enter").await?;
                }
            }
            ActionKind::PressKey { key } => {
                (self.log)(&format!("Key combo: {}", key));
                self.automation.press_key(key).await?;
                // Find shortcuts and tab navigation change focus; give the
                // dialog time to appear before the next perception cycle.
                if key == "ctrl+f" || key == "tab" {
                    sleep(DIALOG_SETTLE).await;
                }
            }
            ActionKind::Speak { text } => {
                (self.log)(&format!("Agent: {}", text));
                (self.speak)(text);
            }
            ActionKind::LaunchApp { app } => {
                (self.log)(&format!("Launching: {}", app));
                self.automation.launch_app(app).await?;
            }
            ActionKind::RunCommand { command } => {
                (self.log)(&format!("Run command: {}", command));
                self.automation.run_command(command).await?;
            }
            ActionKind::SendMessage { contact, message } => {
                self.send_message(contact, message, history).await;
            }
            ActionKind::System { payload } => {
                (self.log)(&format!(
                    "System command: {}",
                    payload
                        .get("command")
                        .and_then(Value::as_str)
                        .unwrap_or("(opaque)")
                ));
                self.shell.handle(payload).await?;
            }
            ActionKind::Stop { reason } => {
                (self.log)(&format!("Stopping: {}", reason));
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Composite messaging flow with fixed timings. Failures are absorbed
    /// here: spoken and recorded, never propagated to the loop.
    async fn send_message(&self, contact: &str, message: &str, history: &mut ActionHistory) {
        (self.log)(&format!("Sending a message to {}", contact));

        match self.drive_messaging_flow(contact, message).await {
            Ok(()) => {
                (self.log)("Message sent");
                (self.speak)(&format!(
                    "Message sent to {} on {}",
                    contact, self.messaging_app
                ));
                history.record(ActionSummary {
                    kind: "send_message".to_string(),
                    summary: format!("sent to {}", contact),
                });
            }
            Err(e) => {
                (self.log)(&format!("Message send failed: {:#}", e));
                (self.speak)(&format!("Failed to send the message to {}: {}", contact, e));
                history.record(ActionSummary {
                    kind: "send_message".to_string(),
                    summary: format!("FAILED for {}: {}", contact, e),
                });
            }
        }
    }

    async fn drive_messaging_flow(&self, contact: &str, message: &str) -> Result<()> {
        self.automation.launch_app(&self.messaging_app).await?;

        // Open the in-app search and give it time to take focus
        self.automation.press_key("ctrl+f").await?;
        sleep(SEARCH_OPEN_WAIT).await;

        // Find the contact; search results lag behind the keystrokes
        self.automation.type_text(contact).await?;
        sleep(CONTACT_RESULTS_WAIT).await;

        // Open the top result's chat
        self.automation.press_key("enter").await?;
        sleep(CHAT_OPEN_WAIT).await;

        // Type and send the message body
        self.automation.type_text(message).await?;
        sleep(MESSAGE_BUFFER_WAIT).await;
        self.automation.press_key("enter").await?;
        sleep(SEND_WAIT).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAutomation {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingAutomation {
        fn failing_on(call: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(call),
            }
        }

        fn record(&self, call: String) -> Result<()> {
            let name = call.split(' ').next().unwrap_or("").to_string();
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(name.as_str()) {
                anyhow::bail!("{} failed", name);
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AutomationProvider for RecordingAutomation {
        fn screen_size(&self) -> (u32, u32) {
            (1920, 1080)
        }
        async fn move_mouse(&self, x: i32, y: i32) -> Result<()> {
            self.record(format!("move {} {}", x, y))
        }
        async fn click(&self) -> Result<()> {
            self.record("click".to_string())
        }
        async fn type_text(&self, text: &str) -> Result<()> {
            self.record(format!("type {}", text))
        }
        async fn press_key(&self, combo: &str) -> Result<()> {
            self.record(format!("press {}", combo))
        }
        async fn launch_app(&self, name: &str) -> Result<()> {
            self.record(format!("launch {}", name))
        }
        async fn run_command(&self, command: &str) -> Result<()> {
            self.record(format!("run {}", command))
        }
        async fn open_windows(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NoopShell;

    #[async_trait]
    impl ShellActionHandler for NoopShell {
        async fn handle(&self, _payload: &serde_json::Map<String, Value>) -> Result<String> {
            Ok(String::new())
        }
    }

    fn executor(automation: Arc<RecordingAutomation>) -> (ActionExecutor, Arc<Mutex<Vec<String>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let spoken_sink = Arc::clone(&spoken);
        let (width, height) = automation.screen_size();
        let exec = ActionExecutor::new(
            automation,
            Arc::new(NoopShell),
            Arc::new(move |text: &str| spoken_sink.lock().unwrap().push(text.to_string())),
            Arc::new(|_msg: &str| {}),
            CoordinateScale::from_screen(width, height),
            "whatsapp".to_string(),
        );
        (exec, spoken)
    }

    fn action(kind: ActionKind) -> Action {
        Action {
            thought: None,
            kind,
        }
    }

    #[test]
    fn test_coordinate_scaling_round_trip() {
        let scale = CoordinateScale::from_screen(1920, 1080);
        assert_eq!(scale.apply(640.0, 360.0), (960, 540));
        assert_eq!(scale.apply(1280.0, 720.0), (1920, 1080));
        assert_eq!(scale.apply(0.0, 0.0), (0, 0));

        // Non-integral ratio rounds to the nearest pixel
        let scale = CoordinateScale::from_screen(1366, 768);
        assert_eq!(scale.apply(100.0, 100.0), (107, 107));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_moves_then_clicks_scaled() {
        let automation = Arc::new(RecordingAutomation::default());
        let (exec, _) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        let stop = exec
            .execute(&action(ActionKind::Click { x: 640.0, y: 360.0 }), &mut history)
            .await
            .unwrap();

        assert!(!stop);
        assert_eq!(automation.calls(), vec!["move 960 540", "click"]);
        assert_eq!(history.summaries()[0].kind, "click");
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_with_enter_presses_enter_after() {
        let automation = Arc::new(RecordingAutomation::default());
        let (exec, _) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        exec.execute(
            &action(ActionKind::Type {
                text: "hello".to_string(),
                enter: true,
            }),
            &mut history,
        )
        .await
        .unwrap();

        assert_eq!(automation.calls(), vec!["type hello", "press enter"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signals_termination_and_is_recorded() {
        let automation = Arc::new(RecordingAutomation::default());
        let (exec, _) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        let stop = exec
            .execute(
                &action(ActionKind::Stop {
                    reason: "completed".to_string(),
                }),
                &mut history,
            )
            .await
            .unwrap();

        assert!(stop);
        assert!(automation.calls().is_empty());
        assert_eq!(history.summaries()[0].summary, "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_goes_to_speech_sink_only() {
        let automation = Arc::new(RecordingAutomation::default());
        let (exec, spoken) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        exec.execute(
            &action(ActionKind::Speak {
                text: "working on it".to_string(),
            }),
            &mut history,
        )
        .await
        .unwrap();

        assert!(automation.calls().is_empty());
        assert_eq!(spoken.lock().unwrap().as_slice(), ["working on it"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_drives_full_flow() {
        let automation = Arc::new(RecordingAutomation::default());
        let (exec, spoken) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        exec.execute(
            &action(ActionKind::SendMessage {
                contact: "Rohith M".to_string(),
                message: "hello there".to_string(),
            }),
            &mut history,
        )
        .await
        .unwrap();

        assert_eq!(
            automation.calls(),
            vec![
                "launch whatsapp",
                "press ctrl+f",
                "type Rohith M",
                "press enter",
                "type hello there",
                "press enter",
            ]
        );
        assert_eq!(spoken.lock().unwrap().len(), 1);
        // Pre-dispatch attempt entry plus the success entry
        let summaries = history.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].summary, "sent to Rohith M");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_failure_is_absorbed() {
        let automation = Arc::new(RecordingAutomation::failing_on("launch"));
        let (exec, spoken) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        let result = exec
            .execute(
                &action(ActionKind::SendMessage {
                    contact: "mom".to_string(),
                    message: "late".to_string(),
                }),
                &mut history,
            )
            .await;

        // Never propagates, never stops the session
        assert!(matches!(result, Ok(false)));
        let spoken = spoken.lock().unwrap();
        assert!(spoken[0].contains("Failed to send"));
        assert!(history.summaries()[1].summary.starts_with("FAILED for mom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_action_failure_propagates() {
        let automation = Arc::new(RecordingAutomation::failing_on("click"));
        let (exec, _) = executor(Arc::clone(&automation));
        let mut history = ActionHistory::new();

        let result = exec
            .execute(&action(ActionKind::Click { x: 10.0, y: 10.0 }), &mut history)
            .await;

        assert!(result.is_err());
        // Still recorded before dispatch
        assert_eq!(history.len(), 1);
    }
}
