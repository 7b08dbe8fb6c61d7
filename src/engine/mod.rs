//! Decision Engine
//!
//! Turns (frame, instruction, history, tool inventory) into the next
//! action sequence by calling a vision-capable model. Owns the model
//! roster and the failure state machine: throttling is signalled to the
//! caller, unavailable models advance the roster, and anything else
//! degrades to an idle tick. The engine never touches session history;
//! that belongs to the executor.

pub mod gemini;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{truncate, Action, ActionSummary};

/// Model provider abstraction so the engine can be exercised without a
/// network. The production implementation is [`gemini::GeminiClient`].
#[async_trait]
pub trait ModelApi: Send + Sync {
    /// One multimodal generation call: prompt text plus a JPEG frame.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image_jpeg: &[u8],
    ) -> Result<String, ModelApiError>;

    /// List the model identifiers the account can use.
    async fn list_models(&self) -> anyhow::Result<Vec<String>>;
}

/// Classified model-call failures. The engine's control flow branches on
/// these; everything unclassified stays in `Other`.
#[derive(Debug, Error)]
pub enum ModelApiError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fatal engine failures. Reaching the end of the roster means every
/// candidate model was rejected, which in practice is a bad key or an
/// unsupported region.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("all models in the roster failed; check the API key and region")]
    RosterExhausted,
}

/// Outcome of one decision call.
#[derive(Debug)]
pub enum Decision {
    /// Execute these actions, in order.
    Act(Vec<Action>),
    /// Nothing to do this cycle (the model chose to wait, or its output
    /// was unusable).
    Idle,
    /// The endpoint throttled the call; the caller should apply its
    /// cooldown penalty before the next cycle.
    Throttled,
}

/// Everything the model is grounded on besides the frame itself.
pub struct DecisionContext<'a> {
    pub instruction: &'a str,
    pub history: &'a [ActionSummary],
    pub tools: &'a [String],
    pub windows: &'a [String],
}

pub struct DecisionEngine {
    api: Arc<dyn ModelApi>,
    roster: Vec<String>,
    current: usize,
}

impl DecisionEngine {
    pub fn new(api: Arc<dyn ModelApi>, roster: Vec<String>) -> Self {
        Self {
            api,
            roster,
            current: 0,
        }
    }

    /// The model the next call will use, if the roster still has one.
    pub fn current_model(&self) -> Option<&str> {
        self.roster.get(self.current).map(String::as_str)
    }

    /// Best-effort model discovery at session start: ask the provider
    /// what is actually available and put the newest flash-class model
    /// at the front of the roster. Failures are logged and ignored.
    pub async fn discover_models(&mut self) {
        match self.api.list_models().await {
            Ok(names) => {
                info!("Available models: {}", names.join(", "));
                if let Some(preferred) = pick_preferred(&names) {
                    info!("Preferring discovered model: {}", preferred);
                    self.roster.insert(self.current, preferred);
                } else {
                    warn!("No obvious vision model in the listing; keeping defaults");
                }
            }
            Err(e) => warn!("Model discovery failed: {:#}", e),
        }
    }

    /// Decide the next action sequence for one perception cycle.
    ///
    /// Unavailable models advance the roster and the same input is
    /// retried immediately; the index only ever moves forward, so the
    /// retry loop is bounded by the roster length.
    pub async fn decide(
        &mut self,
        frame: &[u8],
        ctx: &DecisionContext<'_>,
    ) -> Result<Decision, EngineError> {
        let prompt = prompt::build_decision_prompt(ctx);

        loop {
            let model = self
                .roster
                .get(self.current)
                .ok_or(EngineError::RosterExhausted)?
                .clone();

            match self.api.generate(&model, &prompt, frame).await {
                Ok(raw) => {
                    debug!("Raw decision output: {}", truncate(&raw, 100));
                    return Ok(match parse::parse_actions(&raw) {
                        Ok(actions) if !actions.is_empty() => Decision::Act(actions),
                        Ok(_) => Decision::Idle,
                        Err(e) => {
                            warn!("Decision output was not parseable: {}", e);
                            Decision::Idle
                        }
                    });
                }
                Err(ModelApiError::Throttled(msg)) => {
                    warn!("Model endpoint throttled the call: {}", msg);
                    return Ok(Decision::Throttled);
                }
                Err(ModelApiError::Unavailable(msg)) => {
                    warn!("Model {} unavailable ({}); switching", model, msg);
                    self.current += 1;
                    if let Some(next) = self.current_model() {
                        info!("Retrying with {}", next);
                    }
                }
                Err(ModelApiError::Other(e)) => {
                    warn!("Decision call failed: {:#}", e);
                    return Ok(Decision::Idle);
                }
            }
        }
    }
}

/// Prefer the newest flash-class model from a discovery listing, falling
/// back through older families.
fn pick_preferred(names: &[String]) -> Option<String> {
    for pattern in ["2.5-flash", "2.0-flash", "1.5-flash", "flash", "pro"] {
        if let Some(name) = names.iter().find(|n| n.contains(pattern)) {
            return Some(name.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model API: pops one canned reply per call and records the
    /// models it was asked for.
    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<String, ModelApiError>>>,
        asked: Mutex<Vec<String>>,
        listing: Vec<String>,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<String, ModelApiError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                asked: Mutex::new(Vec::new()),
                listing: Vec::new(),
            }
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelApi for ScriptedApi {
        async fn generate(
            &self,
            model: &str,
            _prompt: &str,
            _image_jpeg: &[u8],
        ) -> Result<String, ModelApiError> {
            self.asked.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelApiError::Other(anyhow::anyhow!("script ended"))))
        }

        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.listing.clone())
        }
    }

    fn ctx() -> DecisionContext<'static> {
        DecisionContext {
            instruction: "do the thing",
            history: &[],
            tools: &[],
            windows: &[],
        }
    }

    fn roster() -> Vec<String> {
        vec!["m-one".to_string(), "m-two".to_string(), "m-three".to_string()]
    }

    #[tokio::test]
    async fn test_actions_are_returned_in_order() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(
            r#"[{"type":"speak","text":"hi"},{"type":"stop","reason":"done"}]"#.to_string(),
        )]));
        let mut engine = DecisionEngine::new(api, roster());

        match engine.decide(b"frame", &ctx()).await.unwrap() {
            Decision::Act(actions) => {
                assert_eq!(actions.len(), 2);
                assert_eq!(actions[0].kind.tag(), "speak");
                assert_eq!(actions[1].kind.tag(), "stop");
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_output_degrades_to_idle() {
        let api = Arc::new(ScriptedApi::new(vec![Ok("sure, clicking now!".to_string())]));
        let mut engine = DecisionEngine::new(api, roster());
        assert!(matches!(
            engine.decide(b"frame", &ctx()).await.unwrap(),
            Decision::Idle
        ));
    }

    #[tokio::test]
    async fn test_throttling_is_signalled_without_roster_advance() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ModelApiError::Throttled("429".to_string())),
            Ok("null".to_string()),
        ]));
        let mut engine = DecisionEngine::new(Arc::clone(&api) as Arc<dyn ModelApi>, roster());

        assert!(matches!(
            engine.decide(b"frame", &ctx()).await.unwrap(),
            Decision::Throttled
        ));
        assert_eq!(engine.current_model(), Some("m-one"));

        // Next call still goes to the same model
        engine.decide(b"frame", &ctx()).await.unwrap();
        assert_eq!(api.asked(), vec!["m-one", "m-one"]);
    }

    #[tokio::test]
    async fn test_unavailable_model_advances_roster_and_retries() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ModelApiError::Unavailable("404".to_string())),
            Ok(r#"[{"type":"speak","text":"ok"}]"#.to_string()),
        ]));
        let mut engine = DecisionEngine::new(Arc::clone(&api) as Arc<dyn ModelApi>, roster());

        // A single decide() call retries the same input with the next model
        assert!(matches!(
            engine.decide(b"frame", &ctx()).await.unwrap(),
            Decision::Act(_)
        ));
        assert_eq!(api.asked(), vec!["m-one", "m-two"]);
        assert_eq!(engine.current_model(), Some("m-two"));
    }

    #[tokio::test]
    async fn test_roster_exhaustion_is_fatal_on_nth_attempt() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ModelApiError::Unavailable("404".to_string())),
            Err(ModelApiError::Unavailable("404".to_string())),
            Err(ModelApiError::Unavailable("404".to_string())),
        ]));
        let mut engine = DecisionEngine::new(Arc::clone(&api) as Arc<dyn ModelApi>, roster());

        let result = engine.decide(b"frame", &ctx()).await;
        assert!(matches!(result, Err(EngineError::RosterExhausted)));
        // All three roster entries were attempted exactly once, in order
        assert_eq!(api.asked(), vec!["m-one", "m-two", "m-three"]);
    }

    #[tokio::test]
    async fn test_other_errors_degrade_to_idle() {
        let api = Arc::new(ScriptedApi::new(vec![Err(ModelApiError::Other(
            anyhow::anyhow!("connection reset"),
        ))]));
        let mut engine = DecisionEngine::new(Arc::clone(&api) as Arc<dyn ModelApi>, roster());

        assert!(matches!(
            engine.decide(b"frame", &ctx()).await.unwrap(),
            Decision::Idle
        ));
        assert_eq!(engine.current_model(), Some("m-one"));
    }

    #[tokio::test]
    async fn test_discovery_prefers_newest_flash() {
        let mut api = ScriptedApi::new(vec![]);
        api.listing = vec![
            "gemini-pro".to_string(),
            "gemini-2.0-flash".to_string(),
            "gemini-2.5-flash-preview".to_string(),
        ];
        let mut engine = DecisionEngine::new(Arc::new(api), vec!["fallback".to_string()]);

        engine.discover_models().await;
        assert_eq!(engine.current_model(), Some("gemini-2.5-flash-preview"));
    }
}
