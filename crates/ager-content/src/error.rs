use thiserror::Error;

/// Failures talking to the generative service or an image search provider.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream reply contained no text")]
    EmptyReply,
}

impl ServiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// Failures turning a generative reply into validated content.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("no JSON object found in reply")]
    NoJsonFound,
    #[error("malformed JSON in reply: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("reply violates schema: {0}")]
    Schema(String),
    #[error("generative service unavailable: {0}")]
    ServiceUnavailable(#[from] ServiceError),
}

impl ContentError {
    /// Short machine-readable hint exposed only when debug responses are on.
    pub fn debug_hint(&self) -> &'static str {
        match self {
            Self::NoJsonFound | Self::MalformedJson(_) => "gemini_parse_failed",
            Self::Schema(_) => "gemini_schema_failed",
            Self::ServiceUnavailable(e) if e.is_timeout() => "gemini_timeout",
            Self::ServiceUnavailable(_) => "gemini_unavailable",
        }
    }
}
