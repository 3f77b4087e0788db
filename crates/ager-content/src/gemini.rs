//! Gemini `generateContent` client.

use crate::error::ServiceError;
use crate::service::{GenerationRequest, GenerativeService};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Upstream error bodies are truncated to this many bytes in logs and errors.
const ERROR_BODY_LIMIT: usize = 500;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiClient {
    http: HttpClient,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn payload(request: &GenerationRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(image) = &request.image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.data,
                }
            }));
        }

        let cfg = &request.config;
        let mut generation_config = json!({
            "temperature": cfg.temperature,
            "topK": cfg.top_k,
            "topP": cfg.top_p,
            "maxOutputTokens": cfg.max_output_tokens,
        });
        if let Some(mime) = &cfg.response_mime_type {
            generation_config["responseMimeType"] = Value::String(mime.clone());
        }

        let safety_settings: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect();

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
            "safetySettings": safety_settings,
        })
    }

    /// Text of the first part of the first candidate.
    fn extract_text(response: &Value) -> Option<String> {
        response
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
            .map(str::to_string)
    }
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        if self.api_key.trim().is_empty() {
            return Err(ServiceError::NotConfigured("GEMINI_API_KEY is not set".into()));
        }

        tracing::debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            with_image = request.image.is_some(),
            timeout_s = request.timeout.as_secs(),
            "calling Gemini"
        );

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .timeout(request.timeout)
            .json(&Self::payload(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::error!(status = status.as_u16(), %body, "Gemini returned non-success status");
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        Self::extract_text(&body)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ServiceError::EmptyReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{GenerationConfig, InlineImage};
    use std::time::Duration;

    #[test]
    fn test_endpoint_prefixes_model_path() {
        let client = GeminiClient::new("k", "gemini-1.5-flash", "https://example.test/v1beta/");
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        let client = GeminiClient::new("k", "models/custom", DEFAULT_API_BASE);
        assert!(client.endpoint().ends_with("/models/custom:generateContent"));
    }

    #[test]
    fn test_payload_shape() {
        let request = GenerationRequest::text("hello", GenerationConfig::diet(), Duration::from_secs(5))
            .with_image(InlineImage { mime_type: "image/png".into(), data: "AAAA".into() });
        let payload = GeminiClient::payload(&request);

        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "hello");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 1200);
        assert_eq!(payload["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(payload["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_payload_omits_mime_when_unset() {
        let request = GenerationRequest::text("hi", GenerationConfig::chat(), Duration::from_secs(5));
        let payload = GeminiClient::payload(&request);
        assert!(payload["generationConfig"].get("responseMimeType").is_none());
        assert_eq!(payload["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_extract_text() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":1}" }] } }]
        });
        assert_eq!(GeminiClient::extract_text(&body).as_deref(), Some("{\"a\":1}"));
        assert_eq!(GeminiClient::extract_text(&json!({ "candidates": [] })), None);
        assert_eq!(GeminiClient::extract_text(&json!({})), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = GeminiClient::new("", DEFAULT_MODEL, DEFAULT_API_BASE);
        let request = GenerationRequest::text("hi", GenerationConfig::chat(), Duration::from_secs(1));
        let err = client.generate(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured(_)));
    }
}
