//! Age estimation through an external face-analysis service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

const FACE_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("no face analysis service configured (set AGER_FACE_ANALYZER_URL)")]
    NotConfigured,
    #[error("face analysis request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("face analysis service returned {0}")]
    Status(u16),
    #[error("face analysis reply has no usable age")]
    NoAge,
}

#[async_trait]
pub trait AgeEstimator: Send + Sync {
    /// Estimated age in years for the face in a base64 image.
    async fn estimate_age(&self, image_b64: &str) -> Result<f64, FaceError>;
}

/// POSTs `{"image": <base64>}` and reads `age` from the reply.
pub struct HttpAgeEstimator {
    http: reqwest::Client,
    url: String,
}

impl HttpAgeEstimator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Accepts `{"age": n}` or a list whose first element carries `age`.
    fn age_from_reply(body: &Value) -> Option<f64> {
        let record = match body {
            Value::Array(items) => items.first()?,
            other => other,
        };
        let age = match record.get("age")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (age.is_finite() && age >= 0.0).then_some(age)
    }
}

#[async_trait]
impl AgeEstimator for HttpAgeEstimator {
    async fn estimate_age(&self, image_b64: &str) -> Result<f64, FaceError> {
        let response = self
            .http
            .post(&self.url)
            .timeout(FACE_ANALYSIS_TIMEOUT)
            .json(&json!({ "image": image_b64, "actions": ["age"] }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FaceError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        let age = Self::age_from_reply(&body).ok_or(FaceError::NoAge)?;
        tracing::debug!(age, "face analysis estimated age");
        Ok(age)
    }
}

/// Stand-in used when no analyzer URL is configured.
pub struct UnconfiguredEstimator;

#[async_trait]
impl AgeEstimator for UnconfiguredEstimator {
    async fn estimate_age(&self, _image_b64: &str) -> Result<f64, FaceError> {
        Err(FaceError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_from_reply_shapes() {
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!({"age": 34})), Some(34.0));
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!([{"age": 27.5}])), Some(27.5));
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!({"age": "41"})), Some(41.0));
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!({"age": -3})), None);
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!([])), None);
        assert_eq!(HttpAgeEstimator::age_from_reply(&json!({"gender": "x"})), None);
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let err = UnconfiguredEstimator.estimate_age("AAAA").await.unwrap_err();
        assert!(matches!(err, FaceError::NotConfigured));
    }
}
