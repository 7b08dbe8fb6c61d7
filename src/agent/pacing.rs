//! Pacing and Quota State
//!
//! The scheduling state the loop consults every cycle: the hard floor
//! between model calls, the adaptive inter-cycle delay, the exponential
//! throttling backoff, and the rolling 24h request quota. The model
//! endpoint is metered and throttled; this state is what lets the loop
//! run unattended for hours without exhausting a budget.

use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::types::AgentConfig;

/// Multiplier applied to the backoff after each throttling error.
const BACKOFF_FACTOR: f64 = 2.5;
/// Adaptive delay added per idle decision.
const IDLE_GROWTH: Duration = Duration::from_millis(2_000);
/// Adaptive delay removed after a successful action batch.
const BATCH_RELAX: Duration = Duration::from_millis(1_000);
/// Small decay applied at the end of every full iteration.
const ITERATION_DECAY: Duration = Duration::from_millis(200);
/// Fixed cooldown applied when the model endpoint throttles a call.
const THROTTLE_PENALTY: Duration = Duration::from_secs(10);
/// The inter-cycle sleep never drops below this.
const SLEEP_FLOOR: Duration = Duration::from_millis(1_000);

#[derive(Debug)]
pub struct PacingState {
    base_delay: Duration,
    max_delay: Duration,
    adaptive: Duration,
    backoff: Duration,
    backoff_floor: Duration,
    backoff_cap: Duration,
    min_call_interval: Duration,
    last_call: Option<Instant>,
    daily_count: u32,
    daily_limit: u32,
    window_reset: DateTime<Utc>,
}

impl PacingState {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            adaptive: Duration::ZERO,
            backoff: Duration::from_millis(config.backoff_floor_ms),
            backoff_floor: Duration::from_millis(config.backoff_floor_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            min_call_interval: Duration::from_millis(config.min_call_interval_ms),
            last_call: None,
            daily_count: 0,
            daily_limit: config.daily_request_limit,
            window_reset: Utc::now() + ChronoDuration::hours(24),
        }
    }

    /// Invariant ceiling for the adaptive delay: base + adaptive never
    /// exceeds the configured max delay.
    fn adaptive_cap(&self) -> Duration {
        self.max_delay.saturating_sub(self.base_delay)
    }

    // ── Adaptive delay ───────────────────────────────────────────

    /// The model chose to idle; wait a little longer next time.
    pub fn grow_idle(&mut self) {
        self.adaptive = (self.adaptive + IDLE_GROWTH).min(self.adaptive_cap());
    }

    /// A batch of actions landed; the screen is productive, speed up.
    pub fn relax_after_batch(&mut self) {
        self.adaptive = self.adaptive.saturating_sub(BATCH_RELAX);
    }

    /// End-of-iteration decay so sustained idleness does not permanently
    /// inflate the wait.
    pub fn decay(&mut self) {
        self.adaptive = self.adaptive.saturating_sub(ITERATION_DECAY);
    }

    /// The endpoint throttled a decision call: apply the fixed penalty.
    pub fn apply_throttle_penalty(&mut self) {
        self.adaptive = THROTTLE_PENALTY.min(self.adaptive_cap()).max(self.adaptive);
    }

    /// A throttling error escaped to the loop level: pin the adaptive
    /// delay at its ceiling.
    pub fn force_max_adaptive(&mut self) {
        self.adaptive = self.adaptive_cap();
    }

    pub fn adaptive(&self) -> Duration {
        self.adaptive
    }

    /// Sleep before the next perception cycle.
    pub fn total_delay(&self) -> Duration {
        (self.base_delay + self.adaptive).max(SLEEP_FLOOR)
    }

    // ── Backoff ──────────────────────────────────────────────────

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Grow the backoff multiplicatively after a throttling error.
    pub fn grow_backoff(&mut self) {
        self.backoff = self.backoff.mul_f64(BACKOFF_FACTOR).min(self.backoff_cap);
    }

    /// Any non-throttling error resets the backoff so the loop recovers
    /// quickly once a transient issue clears.
    pub fn reset_backoff(&mut self) {
        self.backoff = self.backoff_floor;
    }

    // ── Rate floor ───────────────────────────────────────────────

    /// How long the caller still has to wait before the next model call
    /// is allowed.
    pub fn rate_gate_wait(&self, now: Instant) -> Duration {
        match self.last_call {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                self.min_call_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Record that a model call is being made right now. The count is
    /// bumped before the call completes so the quota check stays
    /// conservative.
    pub fn record_call(&mut self, now: Instant) {
        self.last_call = Some(now);
        self.daily_count += 1;
    }

    // ── Daily quota ──────────────────────────────────────────────

    /// Zero the counter and open a new 24h window when the old one has
    /// passed. Returns true when a roll happened.
    pub fn roll_window_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now > self.window_reset {
            self.daily_count = 0;
            self.window_reset = now + ChronoDuration::hours(24);
            true
        } else {
            false
        }
    }

    pub fn quota_exhausted(&self) -> bool {
        self.daily_count >= self.daily_limit
    }

    pub fn daily_count(&self) -> u32 {
        self.daily_count
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }
}

// ─── Staticness Tracking ─────────────────────────────────────────

/// What the loop should do after comparing the new frame to the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaticDecision {
    /// The screen changed; proceed to a decision.
    Changed,
    /// The screen is static; skip the model and nap for this long.
    Nap(Duration),
    /// The screen has been static for too long; decide anyway, the
    /// static reading may be false.
    ForceDecide,
}

/// Counts consecutive perception cycles judged visually unchanged and
/// escalates the nap between them.
#[derive(Debug)]
pub struct StaticTracker {
    run: u32,
    ceiling: u32,
}

impl StaticTracker {
    pub fn new(ceiling: u32) -> Self {
        Self { run: 0, ceiling }
    }

    pub fn observe(&mut self, similar: bool) -> StaticDecision {
        if !similar {
            self.run = 0;
            return StaticDecision::Changed;
        }
        if self.run < self.ceiling {
            self.run += 1;
            StaticDecision::Nap(nap_for(self.run))
        } else {
            self.run = 0;
            StaticDecision::ForceDecide
        }
    }

    pub fn run(&self) -> u32 {
        self.run
    }
}

/// Nap duration for the n-th consecutive static frame. Short at first,
/// long once the screen has clearly settled.
fn nap_for(run: u32) -> Duration {
    if run <= 3 {
        Duration::from_secs(5)
    } else if run <= 7 {
        Duration::from_secs(10)
    } else {
        Duration::from_secs(20)
    }
}
