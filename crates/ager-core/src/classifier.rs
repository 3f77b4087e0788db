//! ONNX age classifier.
//!
//! Wraps an exported age model (ResNet classifier or regressor) behind a
//! single `run` call. Output interpretation lives in [`crate::normalizer`];
//! this module only moves tensors in and out of ONNX Runtime.

use crate::decode::ImageBuffer;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const CLASSIFIER_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} (export the age model to ONNX and set AGER_MODEL_PATH)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout the model expects for its image input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `(1, H, W, 3)`, the Keras default.
    #[default]
    Nhwc,
    /// `(1, 3, H, W)`, the PyTorch default.
    Nchw,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(Self::Nhwc),
            "nchw" => Ok(Self::Nchw),
            other => Err(format!("unknown tensor layout '{other}' (expected nhwc or nchw)")),
        }
    }
}

/// First model output, flattened, with its reported shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Age classifier session.
pub struct AgeClassifier {
    session: Session,
    layout: TensorLayout,
}

impl AgeClassifier {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: &str, layout: TensorLayout) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(CLASSIFIER_INTRA_THREADS)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded age classifier"
        );

        Ok(Self { session, layout })
    }

    /// Run the model on a decoded image and return its first output.
    pub fn run(&mut self, image: &ImageBuffer) -> Result<RawOutput, ClassifierError> {
        let input = Self::arrange(image, self.layout);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("output extraction: {e}")))?;

        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        tracing::debug!(
            ?shape,
            sample = ?data.iter().take(5).collect::<Vec<_>>(),
            "age classifier output"
        );

        Ok(RawOutput {
            shape,
            data: data.to_vec(),
        })
    }

    /// Reorder the decoder's NHWC tensor into the layout the model expects.
    fn arrange(image: &ImageBuffer, layout: TensorLayout) -> Array4<f32> {
        match layout {
            TensorLayout::Nhwc => image.tensor.clone(),
            TensorLayout::Nchw => image
                .tensor
                .view()
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        }
    }
}
