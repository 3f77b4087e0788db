//! Inference result normalizer.
//!
//! Age models come in two flavours: classifiers emitting one score per
//! label, and regressors emitting a single number. The tensor shape is
//! inspected once, at the boundary, to decide which flavour we have
//! ([`InferenceOutput`]); everything downstream works on that tag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Scalar fallback cut points (independent of `AgeBucket`) ---
const SCALAR_MINOR_CUTOFF: f32 = 18.0;
const SCALAR_SENIOR_CUTOFF: f32 = 60.0;
const SCALAR_MIN_LABELS: usize = 3;
/// Tolerance for treating a vector as an already-normalized distribution.
const DISTRIBUTION_EPSILON: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("model output not understood (shape {shape:?})")]
    UnintelligibleOutput { shape: Vec<usize> },
}

/// Model output after shape dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    /// One score per label, in label order.
    Scores(Vec<f32>),
    /// A single regression value.
    Scalar(f32),
}

impl InferenceOutput {
    /// Classify a raw tensor by shape.
    ///
    /// `(C,)`, `(1, C)` and any higher-rank tensor that squeezes to a single
    /// axis become [`Scores`](Self::Scores) when `C >= 2`. A tensor holding
    /// exactly one element becomes a [`Scalar`](Self::Scalar).
    pub fn from_tensor(shape: &[usize], data: &[f32]) -> Result<Self, NormalizeError> {
        if let Some(width) = single_axis_width(shape) {
            if width >= 2 && data.len() == width {
                return Ok(Self::Scores(data.to_vec()));
            }
        }
        if data.len() == 1 {
            return Ok(Self::Scalar(data[0]));
        }
        Err(NormalizeError::UnintelligibleOutput {
            shape: shape.to_vec(),
        })
    }
}

/// Width of the vector a tensor reduces to, if it reduces to one row.
fn single_axis_width(shape: &[usize]) -> Option<usize> {
    match shape {
        [w] => Some(*w),
        [1, w] => Some(*w),
        dims if dims.len() >= 3 => {
            let mut axes = dims.iter().copied().filter(|&d| d != 1);
            match (axes.next(), axes.next()) {
                (Some(w), None) => Some(w),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Output range used to rescale scalar outputs that fall in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarRange {
    pub min: f32,
    pub max: f32,
}

impl Default for ScalarRange {
    fn default() -> Self {
        Self { min: 0.0, max: 120.0 }
    }
}

/// Normalized prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Arg-max probability as a percentage, one decimal.
    pub confidence: Option<f32>,
    /// Full distribution (0–1), classifier path only.
    pub probabilities: Option<Vec<f32>>,
    pub argmax_index: Option<usize>,
    /// Rescaled regression value, scalar path only.
    pub value: Option<f32>,
}

/// Numerically stable softmax (max is subtracted before exponentiating).
pub fn softmax(x: &[f32]) -> Vec<f32> {
    if x.is_empty() {
        return Vec::new();
    }
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = x.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// True when every entry is in [0, 1] and the entries sum to 1.
fn is_distribution(x: &[f32]) -> bool {
    x.iter().all(|v| (0.0..=1.0).contains(v))
        && (x.iter().sum::<f32>() - 1.0).abs() <= DISTRIBUTION_EPSILON
}

fn argmax(x: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in x.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

fn round_to(value: f32, places: i32) -> f32 {
    let factor = 10f32.powi(places);
    (value * factor).round() / factor
}

/// Three-way split of a regression value: `< 18`, `< 60`, else.
/// A value sitting exactly on a cut point belongs to the upper bucket.
pub fn scalar_bucket_index(value: f32) -> usize {
    if value < SCALAR_MINOR_CUTOFF {
        0
    } else if value < SCALAR_SENIOR_CUTOFF {
        1
    } else {
        2
    }
}

/// Map a dispatched model output onto the ordered label set.
pub fn normalize(
    output: &InferenceOutput,
    labels: &[String],
    range: ScalarRange,
) -> Result<Prediction, NormalizeError> {
    match output {
        InferenceOutput::Scores(scores) => {
            // Logits get a softmax; outputs that already form a distribution
            // (softmax head inside the model) are used as-is.
            let probs = if is_distribution(scores) {
                scores.clone()
            } else {
                softmax(scores)
            };
            let idx = argmax(&probs).ok_or_else(|| NormalizeError::UnintelligibleOutput {
                shape: vec![scores.len()],
            })?;
            let label = labels.get(idx).cloned().unwrap_or_else(|| idx.to_string());
            let p = probs[idx];
            let confidence = p.is_finite().then(|| round_to(p * 100.0, 1));

            tracing::debug!(index = idx, %label, ?confidence, "classifier output normalized");

            Ok(Prediction {
                label,
                confidence,
                probabilities: Some(probs),
                argmax_index: Some(idx),
                value: None,
            })
        }
        InferenceOutput::Scalar(raw) => {
            let mut value = *raw;
            if !value.is_finite() || labels.len() < SCALAR_MIN_LABELS {
                return Err(NormalizeError::UnintelligibleOutput { shape: vec![1] });
            }
            if (0.0..=1.0).contains(&value) && range.max > range.min {
                value = range.min + value * (range.max - range.min);
            }
            let idx = scalar_bucket_index(value);

            tracing::debug!(raw = *raw, value, index = idx, "regression output normalized");

            Ok(Prediction {
                label: labels[idx].clone(),
                confidence: None,
                probabilities: None,
                argmax_index: None,
                value: Some(value),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        for input in [
            vec![1.0, 2.0, 3.0],
            vec![-50.0, 0.0, 50.0, 12.5],
            vec![0.0, 0.0],
            vec![1000.0, 999.0],
        ] {
            let out = softmax(&input);
            let sum: f32 = out.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "sum {sum} for {input:?}");
        }
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let base = [0.3f32, -1.2, 2.4, 0.0];
        let shifted: Vec<f32> = base.iter().map(|v| v + 100.0).collect();
        let a = softmax(&base);
        let b = softmax(&shifted);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_shape_dispatch() {
        assert_eq!(
            InferenceOutput::from_tensor(&[1, 3], &[0.1, 0.2, 0.7]).unwrap(),
            InferenceOutput::Scores(vec![0.1, 0.2, 0.7])
        );
        assert_eq!(
            InferenceOutput::from_tensor(&[2], &[0.4, 0.6]).unwrap(),
            InferenceOutput::Scores(vec![0.4, 0.6])
        );
        assert_eq!(
            InferenceOutput::from_tensor(&[1, 1, 3, 1], &[1.0, 2.0, 3.0]).unwrap(),
            InferenceOutput::Scores(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(
            InferenceOutput::from_tensor(&[1, 1], &[0.5]).unwrap(),
            InferenceOutput::Scalar(0.5)
        );
        assert_eq!(InferenceOutput::from_tensor(&[], &[42.0]).unwrap(), InferenceOutput::Scalar(42.0));
        assert!(InferenceOutput::from_tensor(&[2, 3], &[0.0; 6]).is_err());
        assert!(InferenceOutput::from_tensor(&[1, 2, 3], &[0.0; 6]).is_err());
        assert!(InferenceOutput::from_tensor(&[0], &[]).is_err());
    }

    #[test]
    fn test_probability_vector_argmax() {
        let out = InferenceOutput::from_tensor(&[1, 2], &[0.1, 0.9]).unwrap();
        let pred = normalize(&out, &labels(&["A", "B"]), ScalarRange::default()).unwrap();
        assert_eq!(pred.label, "B");
        assert_eq!(pred.argmax_index, Some(1));
        let conf = pred.confidence.unwrap();
        assert!((conf - 90.0).abs() < 0.05, "confidence {conf}");
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let out = InferenceOutput::Scores(vec![2.0, 0.0, -1.0]);
        let pred = normalize(&out, &labels(&["Minor", "Middle-aged", "Senior"]), ScalarRange::default())
            .unwrap();
        assert_eq!(pred.label, "Minor");
        let probs = pred.probabilities.unwrap();
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        // softmax([2, 0, -1])[0] ≈ 0.8438
        assert_eq!(pred.confidence, Some(84.4));
    }

    #[test]
    fn test_index_label_fallback_when_out_of_range() {
        let out = InferenceOutput::Scores(vec![0.0, 0.0, 5.0]);
        let pred = normalize(&out, &labels(&["A", "B"]), ScalarRange::default()).unwrap();
        assert_eq!(pred.label, "2");
    }

    #[test]
    fn test_scalar_rescaled_then_bucketed() {
        // 0.5 over [0, 120] is 60, exactly on the upper cut point.
        let out = InferenceOutput::Scalar(0.5);
        let pred = normalize(&out, &labels(&["Minor", "Middle-aged", "Senior"]), ScalarRange::default())
            .unwrap();
        assert_eq!(pred.value, Some(60.0));
        assert_eq!(pred.label, "Senior");
        assert_eq!(pred.confidence, None);
    }

    #[test]
    fn test_scalar_cut_points_resolve_upward() {
        assert_eq!(scalar_bucket_index(17.99), 0);
        assert_eq!(scalar_bucket_index(18.0), 1);
        assert_eq!(scalar_bucket_index(59.99), 1);
        assert_eq!(scalar_bucket_index(60.0), 2);
    }

    #[test]
    fn test_scalar_outside_unit_interval_not_rescaled() {
        let out = InferenceOutput::Scalar(34.0);
        let pred = normalize(&out, &labels(&["Minor", "Middle-aged", "Senior"]), ScalarRange::default())
            .unwrap();
        assert_eq!(pred.value, Some(34.0));
        assert_eq!(pred.label, "Middle-aged");
    }

    #[test]
    fn test_scalar_requires_three_labels() {
        let out = InferenceOutput::Scalar(0.2);
        let err = normalize(&out, &labels(&["A", "B"]), ScalarRange::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::UnintelligibleOutput { .. }));
    }

    #[test]
    fn test_scalar_nan_is_unintelligible() {
        let out = InferenceOutput::Scalar(f32::NAN);
        assert!(normalize(&out, &labels(&["A", "B", "C"]), ScalarRange::default()).is_err());
    }
}
