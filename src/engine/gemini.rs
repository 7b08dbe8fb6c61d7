//! Gemini Model Client
//!
//! Thin REST client for the `generateContent` endpoint with an inline
//! JPEG part, plus the model listing used for roster discovery. HTTP
//! failures are classified into the engine's throttled / unavailable /
//! other taxonomy here, from the status code and body text.

use anyhow::{anyhow, Context};
use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::types::truncate;

use super::{ModelApi, ModelApiError};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Request payload ──────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

// ── Client ───────────────────────────────────────────────────────

pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// No request timeout on purpose: a hung generation call stalls the
    /// session loop until the connection resolves or errors, which is
    /// the documented cancellation model.
    pub fn new(api_key: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait::async_trait]
impl ModelApi for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image_jpeg: &[u8],
    ) -> Result<String, ModelApiError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image_jpeg),
                        },
                    },
                ],
            }],
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelApiError::Other(anyhow!(e).context("Generation request failed")))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ModelApiError::Other(anyhow!(e).context("Failed to read response body")))?;

        if !(200..300).contains(&status) {
            return Err(classify_http_error(status, &text));
        }

        let data: Value = serde_json::from_str(&text)
            .context("Failed to parse generation response")
            .map_err(ModelApiError::Other)?;

        extract_text(&data).ok_or_else(|| {
            ModelApiError::Other(anyhow!(
                "Generation response carried no text: {}",
                truncate(&text, 200)
            ))
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .context("Model listing request failed")?;

        let status = response.status();
        let data: Value = response
            .json()
            .await
            .context("Failed to parse model listing")?;

        if !status.is_success() {
            anyhow::bail!("Model listing error {}: {}", status.as_u16(), data);
        }

        let names = data["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(|name| name.strip_prefix("models/").unwrap_or(name).to_string())
                    .collect()
            })
            .unwrap_or_default();

        Ok(names)
    }
}

/// Concatenated text parts of the first candidate, if any.
fn extract_text(data: &Value) -> Option<String> {
    let parts = data["candidates"].get(0)?["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Map an HTTP failure to the engine's error taxonomy. Quota phrasing
/// varies across provider versions, so the body text is checked too.
fn classify_http_error(status: u16, body: &str) -> ModelApiError {
    let lower = body.to_lowercase();
    if status == 429
        || lower.contains("quota")
        || lower.contains("resource has been exhausted")
        || lower.contains("resource_exhausted")
    {
        ModelApiError::Throttled(format!("{}: {}", status, truncate(body, 200)))
    } else if status == 404 || lower.contains("not found") {
        ModelApiError::Unavailable(format!("{}: {}", status, truncate(body, 200)))
    } else {
        ModelApiError::Other(anyhow!(
            "Model endpoint error {}: {}",
            status,
            truncate(body, 200)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_quota_errors_as_throttled() {
        assert!(matches!(
            classify_http_error(429, "slow down"),
            ModelApiError::Throttled(_)
        ));
        assert!(matches!(
            classify_http_error(500, "Resource has been exhausted (e.g. check quota)"),
            ModelApiError::Throttled(_)
        ));
    }

    #[test]
    fn test_classify_missing_model_as_unavailable() {
        assert!(matches!(
            classify_http_error(404, "model x is not found"),
            ModelApiError::Unavailable(_)
        ));
        assert!(matches!(
            classify_http_error(400, "models/x is not found for API version v1beta"),
            ModelApiError::Unavailable(_)
        ));
    }

    #[test]
    fn test_classify_other_errors() {
        assert!(matches!(
            classify_http_error(500, "internal"),
            ModelApiError::Other(_)
        ));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let data: Value = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "[{\"type\""}, {"text": ": \"stop\"}]"}]}
            }]
        });
        assert_eq!(extract_text(&data).unwrap(), "[{\"type\": \"stop\"}]");
    }

    #[test]
    fn test_extract_text_empty_candidates() {
        let data: Value = serde_json::json!({"candidates": []});
        assert!(extract_text(&data).is_none());
    }

    #[test]
    fn test_client_builds_with_custom_base_url() {
        let client = GeminiClient::with_base_url("k".to_string(), "http://localhost:1".to_string());
        assert_eq!(client.base_url, "http://localhost:1");
    }
}
