//! ager-core: age estimation primitives.
//!
//! Decodes embedded image payloads into model-ready tensors, runs the ONNX
//! age classifier, normalizes its heterogeneous output into a label, and
//! derives the age buckets used to steer generated content.

pub mod bucket;
pub mod classifier;
pub mod decode;
pub mod normalizer;
pub mod types;

pub use bucket::{age_json, age_key, validate_age, AgeBand, AgeBucket, DietBucket, ValidationError};
pub use classifier::{AgeClassifier, ClassifierError, RawOutput, TensorLayout};
pub use decode::{
    decode_image_bytes, decode_payload, payload_body, verify_payload, payload_mime_type, DecodeError, DecoderOptions, ImageBuffer,
    InputStats, Preprocess,
};
pub use normalizer::{normalize, softmax, InferenceOutput, NormalizeError, Prediction, ScalarRange};
pub use types::{EyeFeatures, FacialFeatures, FeatureDescriptor, SkinFeatures};
