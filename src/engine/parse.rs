//! Model Output Parsing
//!
//! The model is instructed to answer with a bare JSON array of actions,
//! but real responses arrive in three shapes: a list, a single action
//! object, or an object wrapping one under an `action` key. Everything is
//! collapsed to an ordered action list here so the loop only ever sees
//! one shape. Markdown code fences are stripped first.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::types::{Action, ActionKind};

/// Remove markdown code-fence wrappers the model sometimes adds despite
/// being told not to.
pub fn strip_code_fences(raw: &str) -> String {
    match Regex::new(r"```(?:json)?") {
        Ok(fence) => fence.replace_all(raw, "").trim().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Parse a raw model response into an ordered action list.
///
/// Returns `Err` only when the payload is not valid JSON at all; a valid
/// payload with unusable elements yields a shorter (possibly empty) list.
pub fn parse_actions(raw: &str) -> Result<Vec<Action>, serde_json::Error> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)?;
    Ok(normalize_actions(value))
}

/// Collapse the three observed response shapes into one list. `null` is
/// the model explicitly choosing to wait and yields an empty list.
pub fn normalize_actions(value: Value) -> Vec<Action> {
    let items: Vec<Value> = match value {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("action") {
            Some(Value::Array(items)) => items,
            Some(inner) => vec![inner],
            None => vec![Value::Object(map)],
        },
        other => {
            warn!("Unexpected decision payload: {}", other);
            return Vec::new();
        }
    };

    items.into_iter().filter_map(action_from_value).collect()
}

/// Lenient per-element parse. Untyped or unknown actions are skipped with
/// a log line rather than failing the whole batch.
fn action_from_value(value: Value) -> Option<Action> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            warn!("Skipping non-object action entry: {}", other);
            return None;
        }
    };

    let thought = match map.remove("thought") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    if !map.contains_key("type") {
        warn!("Skipping untyped action entry");
        return None;
    }

    match serde_json::from_value::<ActionKind>(Value::Object(map)) {
        Ok(kind) => Some(Action { thought, kind }),
        Err(e) => {
            warn!("Skipping unparseable action entry: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        let raw = "```json\n[{\"type\": \"stop\"}]\n```";
        assert_eq!(strip_code_fences(raw), "[{\"type\": \"stop\"}]");
        assert_eq!(strip_code_fences("[1]"), "[1]");
    }

    #[test]
    fn test_parse_array_shape() {
        let actions = parse_actions(
            r#"[{"thought": "move there", "type": "click", "x": 10, "y": 20},
                {"type": "type", "text": "hello", "enter": true}]"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].thought.as_deref(), Some("move there"));
        assert!(matches!(actions[0].kind, ActionKind::Click { .. }));
        assert!(matches!(
            actions[1].kind,
            ActionKind::Type { ref text, enter: true } if text == "hello"
        ));
    }

    #[test]
    fn test_parse_bare_action_shape() {
        let actions = parse_actions(r#"{"type": "speak", "text": "hi"}"#).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0].kind, ActionKind::Speak { .. }));
    }

    #[test]
    fn test_parse_nested_action_shape() {
        let actions =
            parse_actions(r#"{"action": {"type": "launch_app", "app": "notepad"}}"#).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0].kind, ActionKind::LaunchApp { .. }));
    }

    #[test]
    fn test_null_means_wait() {
        assert!(parse_actions("null").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_untyped_entries_are_skipped() {
        let actions = parse_actions(
            r#"[{"type": "dance"},
                {"text": "no tag"},
                {"type": "speak", "text": "kept"}]"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0].kind, ActionKind::Speak { .. }));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(parse_actions("click the button at 10, 20").is_err());
    }
}
