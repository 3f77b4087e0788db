//! Photo analysis through the generative service.
//!
//! Both calls are best-effort: a failure is logged and yields `None`, and
//! the caller simply omits the field. Nothing is invented in its place.

use crate::extract::parse_json_object;
use crate::service::{
    GenerationConfig, GenerationRequest, GenerativeService, InlineImage, ANALYSIS_TIMEOUT, DESCRIPTION_TIMEOUT,
};
use ager_core::FeatureDescriptor;
use chrono::{SecondsFormat, Utc};

pub const EXTRACTION_METHOD: &str = "gemini_ai";
const DESCRIPTION_MAX_CHARS: usize = 140;

const FEATURE_PROMPT: &str = r#"Analyze this image and extract facial features. Return ONLY JSON with this structure:

{
  "face_detected": true,
  "facial_features": {
    "eyes": {"color": "description", "shape": "description", "size": "description", "brightness": "description"},
    "skin": {"tone": "description", "texture": "description", "complexion": "description"},
    "face_shape": "description",
    "facial_symmetry": "description",
    "unique_characteristics": ["distinctive", "features"],
    "overall_appearance": "general description"
  },
  "landmarks": {
    "eyes": "position and description",
    "nose": "position and description",
    "mouth": "position and description",
    "cheekbones": "position and description",
    "jawline": "position and description"
  },
  "analysis_confidence": "high/medium/low"
}

If no face is detected, return {"face_detected": false}.
Be detailed but concise. Do not infer ethnicity, race or medical conditions."#;

const DESCRIPTION_PROMPT: &str = "Describe the person's general appearance in under 12 words. \
Respectful, neutral and non-sensitive (no ethnicity, race or medical claims). \
Examples: 'friendly-looking adult with warm smile', 'confident person with glasses'. \
Return ONLY the short description text.";

/// Ask the service for a [`FeatureDescriptor`]. `None` when the call fails,
/// the reply cannot be parsed, or no face was found.
pub async fn extract_features(service: &dyn GenerativeService, image: InlineImage) -> Option<FeatureDescriptor> {
    let request = GenerationRequest::text(FEATURE_PROMPT, GenerationConfig::analysis(), ANALYSIS_TIMEOUT)
        .with_image(image);

    let raw = match service.generate(&request).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "feature extraction call failed");
            return None;
        }
    };

    let parsed = parse_json_object(&raw).and_then(|value| Ok(serde_json::from_value::<FeatureDescriptor>(value)?));
    let mut descriptor = match parsed {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "feature extraction reply unusable");
            return None;
        }
    };

    if !descriptor.face_detected {
        tracing::info!("no face detected in photo");
        return None;
    }

    descriptor.extracted_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    descriptor.extraction_method = Some(EXTRACTION_METHOD.to_string());
    Some(descriptor)
}

/// Collapse whitespace and cap the length of a description.
pub fn tidy_description(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '"' || c == '\'').trim();
    trimmed.chars().take(DESCRIPTION_MAX_CHARS).collect()
}

/// Short neutral appearance phrase for the photo.
pub async fn describe_photo(service: &dyn GenerativeService, image: InlineImage) -> Option<String> {
    let request = GenerationRequest::text(DESCRIPTION_PROMPT, GenerationConfig::description(), DESCRIPTION_TIMEOUT)
        .with_image(image);

    match service.generate(&request).await {
        Ok(raw) => Some(tidy_description(&raw)).filter(|d| !d.is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "photo description call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::testing::ScriptedService;

    fn image() -> InlineImage {
        InlineImage { mime_type: "image/jpeg".into(), data: "AAAA".into() }
    }

    #[tokio::test]
    async fn test_extract_features_stamps_metadata() {
        let reply = "```json\n{\"face_detected\": true, \"facial_features\": {\"face_shape\": \"oval\", \"eyes\": {\"color\": \"green\"}}}\n```";
        let service = ScriptedService::new(vec![Ok(reply.into())]);
        let d = extract_features(&service, image()).await.unwrap();
        assert_eq!(d.face_shape(), "oval");
        assert_eq!(d.extraction_method.as_deref(), Some(EXTRACTION_METHOD));
        assert!(d.extracted_at.is_some());

        let request = &service.requests()[0];
        assert_eq!(request.image.as_ref().unwrap().data, "AAAA");
        assert_eq!(request.timeout, ANALYSIS_TIMEOUT);
    }

    #[tokio::test]
    async fn test_extract_features_none_on_failures() {
        let service = ScriptedService::new(vec![
            Ok("{\"face_detected\": false}".into()),
            Ok("not json".into()),
            Err(ServiceError::EmptyReply),
        ]);
        assert!(extract_features(&service, image()).await.is_none());
        assert!(extract_features(&service, image()).await.is_none());
        assert!(extract_features(&service, image()).await.is_none());
    }

    #[test]
    fn test_tidy_description() {
        assert_eq!(tidy_description("  \"friendly   adult\nwith  smile\" "), "friendly adult with smile");
        assert_eq!(tidy_description(&"x".repeat(300)).len(), 140);
    }

    #[tokio::test]
    async fn test_describe_photo() {
        let service = ScriptedService::new(vec![Ok("calm person  with glasses\n".into()), Ok("   ".into())]);
        assert_eq!(describe_photo(&service, image()).await.as_deref(), Some("calm person with glasses"));
        assert_eq!(describe_photo(&service, image()).await, None);
        assert_eq!(describe_photo(&service, image()).await, None);
    }
}
