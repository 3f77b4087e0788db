use crate::face::FaceError;
use crate::store::StoreError;
use ager_content::ContentError;
use ager_core::{ClassifierError, DecodeError, NormalizeError, ValidationError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request failure. Each variant maps to one status code and a generic
/// client message; internal detail is only exposed as `debug` when enabled.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    BadRequest(String),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("wellness generation failed: {0}")]
    Wellness(#[source] ContentError),
    #[error("chat generation failed: {0}")]
    Chat(#[source] ContentError),
    #[error("diet plan generation failed: {0}")]
    DietPlan(#[source] ContentError),
    #[error("face analysis failed: {0}")]
    Face(#[from] FaceError),
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    NotFound(String),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Normalize(_) | Self::Classifier(_) | Self::Store(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Wellness(_) | Self::Chat(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DietPlan(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Face(FaceError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Face(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Message safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::BadRequest(m) | Self::NotFound(m) => m.clone(),
            Self::Decode(_) => "Invalid image payload".to_string(),
            Self::Normalize(_) => "Model output not understood".to_string(),
            Self::Classifier(_) => "Prediction error".to_string(),
            Self::Wellness(_) => "Wellness content is temporarily unavailable. Please try again.".to_string(),
            Self::Chat(_) => "The health assistant is temporarily unavailable. Please try again.".to_string(),
            Self::DietPlan(_) => "Diet plan generation failed.".to_string(),
            Self::Face(FaceError::NotConfigured) => "Face analysis is not configured".to_string(),
            Self::Face(_) => "Age-AI prediction error".to_string(),
            Self::Upstream(_) => "Failed to fetch image".to_string(),
            Self::Store(_) => "Storage error".to_string(),
            Self::Task(_) => "Internal server error".to_string(),
        }
    }

    /// Detail exposed only when debug responses are on.
    pub fn debug_detail(&self) -> String {
        match self {
            Self::Wellness(e) | Self::Chat(e) | Self::DietPlan(e) => e.debug_hint().to_string(),
            other => other.to_string(),
        }
    }

    /// Log and render. Client errors log at debug, server errors at error.
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let mut body = json!({ "message": self.public_message() });
        if debug {
            body["debug"] = json!(self.debug_detail());
        }
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}
