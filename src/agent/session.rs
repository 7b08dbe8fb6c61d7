//! Agent Session and Scheduler Loop
//!
//! The single state machine coordinating everything else. One session
//! owns one long-lived task that cycles through guard wait, capture,
//! dedup, quota check, rate gate, decide, act, and sleep. `start` and
//! `stop` are the only operations exposed to the host; both are
//! idempotent, and stop is cooperative (the in-flight cycle finishes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::resolve_path;
use crate::engine::{Decision, DecisionContext, DecisionEngine, EngineError};
use crate::types::{
    Action, AgentConfig, AutomationProvider, CaptureFormat, CaptureOptions, CaptureProvider,
    LogSink, ShellActionHandler, SpeechSink,
};
use crate::vision;
use crate::vision::similarity::frames_similar;

use super::executor::{ActionExecutor, CoordinateScale};
use super::history::ActionHistory;
use super::pacing::{PacingState, StaticDecision, StaticTracker};

/// Sleep while a previous action batch is still executing.
const GUARD_WAIT: Duration = Duration::from_secs(1);
/// Pause between successive actions within one batch.
const INTER_ACTION_PAUSE: Duration = Duration::from_millis(800);

/// Everything a session needs from its host. The collaborators stay
/// behind trait objects so tests can substitute all of them.
pub struct SessionDeps {
    pub capture: Arc<dyn CaptureProvider>,
    pub automation: Arc<dyn AutomationProvider>,
    pub shell: Arc<dyn ShellActionHandler>,
    pub speak: SpeechSink,
    pub log: LogSink,
    pub engine: DecisionEngine,
    pub config: AgentConfig,
}

struct SessionInner {
    capture: Arc<dyn CaptureProvider>,
    automation: Arc<dyn AutomationProvider>,
    shell: Arc<dyn ShellActionHandler>,
    speak: SpeechSink,
    log: LogSink,
    engine: tokio::sync::Mutex<DecisionEngine>,
    config: AgentConfig,
}

/// Handle to one live agent. Owned by the host; `stop` may be called
/// from any thread, which is why the flags are atomics.
pub struct AgentSession {
    id: Uuid,
    active: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
    inner: Arc<SessionInner>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// How one perception cycle ended.
enum CycleOutcome {
    /// Full cycle ran; take the normal inter-cycle sleep.
    Completed,
    /// Cycle was cut short (static screen, missing frame); nap this long
    /// and skip the normal sleep.
    Skip(Duration),
    /// The session must end: terminal stop action, quota exhaustion, or
    /// roster exhaustion. The reason was already logged at the site.
    Stop,
}

impl AgentSession {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            id: Uuid::new_v4(),
            active: Arc::new(AtomicBool::new(false)),
            executing: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(SessionInner {
                capture: deps.capture,
                automation: deps.automation,
                shell: deps.shell,
                speak: deps.speak,
                log: deps.log,
                engine: tokio::sync::Mutex::new(deps.engine),
                config: deps.config,
            }),
            task: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the loop with a standing instruction for the session's
    /// lifetime. No-op when already active.
    pub fn start(&self, instruction: &str) {
        if self.active.swap(true, Ordering::SeqCst) {
            warn!("Agent session is already active");
            return;
        }

        (self.inner.log)(&format!("Agent starting: \"{}\"", instruction));

        let instruction = instruction.to_string();
        let inner = Arc::clone(&self.inner);
        let active = Arc::clone(&self.active);
        let executing = Arc::clone(&self.executing);
        let id = self.id;

        let handle = tokio::spawn(async move {
            run_loop(id, inner, active, executing, instruction).await;
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Cooperative stop: the flag flips immediately, the loop observes it
    /// between iterations. No-op when already inactive.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            debug!("Agent session is not active");
            return;
        }
        (self.inner.log)("Agent stopped");
    }

    /// Wait for the loop task to finish. Returns immediately when no
    /// loop was ever started.
    pub async fn wait(&self) {
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_loop(
    id: Uuid,
    inner: Arc<SessionInner>,
    active: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
    instruction: String,
) {
    let config = &inner.config;

    // Coordinate scaling is computed once from the real display bounds.
    let (width, height) = inner.automation.screen_size();
    let scale = CoordinateScale::from_screen(width, height);
    let (fx, fy) = scale.factors();
    (inner.log)(&format!(
        "Resolution scaling: {}x{} (x{:.2}, y{:.2})",
        width, height, fx, fy
    ));

    let executor = ActionExecutor::new(
        Arc::clone(&inner.automation),
        Arc::clone(&inner.shell),
        Arc::clone(&inner.speak),
        Arc::clone(&inner.log),
        scale,
        config.messaging_app.clone(),
    );

    // Session boot: learn what this machine has, prefer a discovered
    // model, and take focus with one centre click.
    let tools = crate::input::discover_tools().await;
    (inner.log)(&format!("Tools detected: {}", tools.join(", ")));
    inner.engine.lock().await.discover_models().await;

    if let Err(e) = take_focus(&*inner.automation, width, height).await {
        warn!("Initial focus click failed: {:#}", e);
    }

    let mut history = ActionHistory::new();
    let mut pacing = PacingState::new(config);
    let mut statics = StaticTracker::new(config.static_ceiling);
    let mut last_frame: Option<Vec<u8>> = None;

    let capture_options = CaptureOptions {
        width: config.capture_width,
        height: config.capture_height,
        format: CaptureFormat::Jpeg,
    };
    let vision_dir = resolve_path(&config.vision_dir);

    debug!("Session {} entering loop", id);

    while active.load(Ordering::SeqCst) {
        // Guard: never perceive a screen mid-action.
        if executing.load(Ordering::SeqCst) {
            sleep(GUARD_WAIT).await;
            continue;
        }

        let outcome: anyhow::Result<CycleOutcome> = async {
            // 1. See
            let Some(frame) = inner.capture.capture(&capture_options).await? else {
                warn!("Capture produced no frame; skipping cycle");
                return Ok(CycleOutcome::Skip(GUARD_WAIT));
            };
            vision::archive_frame(&vision_dir, &frame);

            // 2. Dedup: skip the model while the screen holds still, but
            // never trust a static reading forever.
            let similar = last_frame
                .as_deref()
                .map(|prev| frames_similar(prev, &frame, config.similarity_tolerance_pct))
                .unwrap_or(false);

            match statics.observe(similar) {
                StaticDecision::Nap(nap) => {
                    (inner.log)(&format!(
                        "Screen static ({}); skipping decision",
                        statics.run()
                    ));
                    return Ok(CycleOutcome::Skip(nap));
                }
                StaticDecision::ForceDecide => {
                    (inner.log)("Static ceiling reached; forcing a decision");
                }
                StaticDecision::Changed => {}
            }

            last_frame = Some(frame);
            let frame: &[u8] = last_frame.as_deref().unwrap_or(&[]);

            // 3. Quota window
            if pacing.roll_window_if_due(Utc::now()) {
                (inner.log)("Daily request counter reset");
            }
            if pacing.quota_exhausted() {
                (inner.log)(&format!(
                    "Daily limit reached ({}/{}); stopping to protect the quota",
                    pacing.daily_count(),
                    pacing.daily_limit()
                ));
                (inner.speak)("I've reached my daily request limit. I'll reset in 24 hours.");
                return Ok(CycleOutcome::Stop);
            }

            // 4. Rate gate
            let wait = pacing.rate_gate_wait(Instant::now());
            if !wait.is_zero() {
                debug!("Rate floor: waiting {:?} before the next call", wait);
                sleep(wait).await;
            }

            // 5. Think
            pacing.record_call(Instant::now());
            (inner.log)(&format!(
                "Request {}/{} today",
                pacing.daily_count(),
                pacing.daily_limit()
            ));

            let decision = {
                // Window enumeration is best effort; failures stay silent
                let windows = inner.automation.open_windows().await.unwrap_or_default();
                let summaries = history.summaries();
                let ctx = DecisionContext {
                    instruction: &instruction,
                    history: &summaries,
                    tools: &tools,
                    windows: &windows,
                };
                inner.engine.lock().await.decide(frame, &ctx).await
            };

            let decision = match decision {
                Ok(decision) => decision,
                Err(EngineError::RosterExhausted) => {
                    error!("All models failed; check the API key and region");
                    (inner.speak)("I can't reach any of my models. Stopping.");
                    return Ok(CycleOutcome::Stop);
                }
            };

            // 6. Act
            match decision {
                Decision::Act(actions) => {
                    executing.store(true, Ordering::SeqCst);
                    let batch =
                        run_action_batch(&executor, &actions, &mut history, &inner.log).await;
                    executing.store(false, Ordering::SeqCst);

                    if batch? {
                        (inner.log)("Task completed");
                        return Ok(CycleOutcome::Stop);
                    }
                    pacing.relax_after_batch();
                }
                Decision::Idle => {
                    (inner.log)("Model chose to wait");
                    pacing.grow_idle();
                }
                Decision::Throttled => {
                    (inner.log)("Model throttled the request; cooling down");
                    pacing.apply_throttle_penalty();
                    pacing.grow_idle();
                }
            }

            Ok(CycleOutcome::Completed)
        }
        .await;

        match outcome {
            Ok(CycleOutcome::Completed) => {}
            Ok(CycleOutcome::Skip(nap)) => {
                sleep(nap).await;
                continue;
            }
            Ok(CycleOutcome::Stop) => {
                active.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                warn!("Cycle error: {:#}", e);
                if is_throttling_error(&e) {
                    (inner.log)(&format!(
                        "Rate limit hit; cooling down for {:?}",
                        pacing.backoff()
                    ));
                    sleep(pacing.backoff()).await;
                    pacing.grow_backoff();
                    pacing.force_max_adaptive();
                } else {
                    pacing.reset_backoff();
                }
            }
        }

        // 7. Sleep before the next cycle, then let the adaptive delay
        // decay a little so sustained idleness is not permanent.
        sleep(pacing.total_delay()).await;
        if !executing.load(Ordering::SeqCst) {
            pacing.decay();
        }
    }

    active.store(false, Ordering::SeqCst);
    debug!("Session {} loop ended", id);
}

/// Execute a batch strictly in order. Returns `true` when a terminal stop
/// ran; later items in the same batch are skipped.
async fn run_action_batch(
    executor: &ActionExecutor,
    actions: &[Action],
    history: &mut ActionHistory,
    log: &LogSink,
) -> anyhow::Result<bool> {
    for (index, action) in actions.iter().enumerate() {
        if let Some(thought) = &action.thought {
            (log)(&format!("Thought: {}", thought));
        }
        (log)(&format!(
            "Action: {}",
            serde_json::to_string(&action.kind).unwrap_or_else(|_| action.kind.tag().to_string())
        ));

        if executor.execute(action, history).await? {
            return Ok(true);
        }
        if index + 1 < actions.len() {
            sleep(INTER_ACTION_PAUSE).await;
        }
    }
    Ok(false)
}

/// One click on the screen centre so the desktop has focus before the
/// first perception cycle.
async fn take_focus(
    automation: &dyn AutomationProvider,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    automation
        .move_mouse((width / 2) as i32, (height / 2) as i32)
        .await?;
    automation.click().await
}

/// Throttling errors escaping to the loop level are recognized by their
/// message, whatever layer they came from.
fn is_throttling_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_lowercase();
    msg.contains("429")
        || msg.contains("quota")
        || msg.contains("resource has been exhausted")
        || msg.contains("throttled")
}
