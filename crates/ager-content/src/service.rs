//! Generative service seam.

use crate::error::ServiceError;
use async_trait::async_trait;
use std::time::Duration;

pub const WELLNESS_TIMEOUT: Duration = Duration::from_secs(30);
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(30);
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(20);
pub const DIET_TIMEOUT: Duration = Duration::from_secs(25);

/// Sampling parameters forwarded to the service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    /// Ask the service to emit this MIME type (e.g. `application/json`).
    pub response_mime_type: Option<String>,
}

impl GenerationConfig {
    pub fn wellness() -> Self {
        Self { temperature: 1.0, top_k: 40, top_p: 0.9, max_output_tokens: 800, response_mime_type: None }
    }

    pub fn chat() -> Self {
        Self { temperature: 0.9, top_k: 50, top_p: 0.95, max_output_tokens: 1024, response_mime_type: None }
    }

    pub fn analysis() -> Self {
        Self { temperature: 0.3, top_k: 40, top_p: 0.95, max_output_tokens: 1024, response_mime_type: None }
    }

    pub fn description() -> Self {
        Self { temperature: 0.8, top_k: 40, top_p: 0.95, max_output_tokens: 64, response_mime_type: None }
    }

    pub fn diet() -> Self {
        Self {
            temperature: 0.5,
            top_k: 40,
            top_p: 0.9,
            max_output_tokens: 1200,
            response_mime_type: Some("application/json".to_string()),
        }
    }
}

/// Base64 image attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub config: GenerationConfig,
    pub timeout: Duration,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, config: GenerationConfig, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            config,
            timeout,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }
}

/// External text-producing AI service, treated as opaque.
///
/// Implementations return the raw reply text; callers own all parsing.
/// A timeout or non-success status is an error, never retried here.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}
