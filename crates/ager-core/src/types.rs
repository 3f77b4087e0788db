use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facial attribute summary produced by image analysis, stored per reported age.
///
/// Every field is optional on the wire: the analysis service is free to omit
/// anything it could not determine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    #[serde(default)]
    pub face_detected: bool,
    #[serde(default)]
    pub facial_features: FacialFeatures,
    /// Free-form landmark descriptions (eyes, nose, mouth, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacialFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyes: Option<EyeFeatures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<SkinFeatures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facial_symmetry: Option<String>,
    #[serde(default)]
    pub unique_characteristics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_appearance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeFeatures {
    pub color: Option<String>,
    pub shape: Option<String>,
    pub size: Option<String>,
    pub brightness: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinFeatures {
    pub tone: Option<String>,
    pub texture: Option<String>,
    pub complexion: Option<String>,
}

impl FeatureDescriptor {
    /// Short eye summary, e.g. "large brown eyes with bright brightness".
    pub fn eye_summary(&self) -> String {
        match &self.facial_features.eyes {
            Some(eyes) => format!(
                "{} {} with {} brightness",
                eyes.size.as_deref().unwrap_or("standard"),
                eyes.color.as_deref().unwrap_or("eyes"),
                eyes.brightness.as_deref().unwrap_or("standard"),
            ),
            None => "standard eye features".to_string(),
        }
    }

    /// Short skin summary, e.g. "warm skin with smooth texture".
    pub fn skin_summary(&self) -> String {
        match &self.facial_features.skin {
            Some(skin) => format!(
                "{} skin with {} texture",
                skin.tone.as_deref().unwrap_or("standard"),
                skin.texture.as_deref().unwrap_or("standard"),
            ),
            None => "standard skin features".to_string(),
        }
    }

    pub fn face_shape(&self) -> &str {
        self.facial_features.face_shape.as_deref().unwrap_or("standard")
    }

    /// Combined one-line summary used in prompts.
    pub fn summary(&self) -> String {
        format!(
            "{}, {}, {} face shape",
            self.eye_summary(),
            self.skin_summary(),
            self.face_shape()
        )
    }
}
