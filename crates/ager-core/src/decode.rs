//! Image decoder: embedded base64 payloads to model-ready tensors.
//!
//! Payloads arrive as data URLs (`data:image/png;base64,....`) or bare
//! base64. The decoded image is converted to RGB, resized to the model's
//! input resolution, and laid out as a `(1, H, W, 3)` float tensor.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_INPUT_WIDTH: u32 = 224;
const DEFAULT_INPUT_HEIGHT: u32 = 224;
/// ResNet "caffe" preprocessing: BGR order, per-channel mean subtraction, no scaling.
const IMAGENET_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a decodable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid target size {0}x{1}")]
    InvalidSize(u32, u32),
}

/// Pixel value scaling applied after resize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocess {
    /// Linear scale to [0, 1].
    #[default]
    Scale01,
    /// BGR mean subtraction as expected by ImageNet-trained ResNets.
    Imagenet,
}

impl Preprocess {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scale01 => "scale01",
            Self::Imagenet => "imagenet",
        }
    }
}

impl FromStr for Preprocess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scale01" => Ok(Self::Scale01),
            "imagenet" => Ok(Self::Imagenet),
            other => Err(format!("unknown preprocess mode '{other}' (expected scale01 or imagenet)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderOptions {
    pub width: u32,
    pub height: u32,
    pub preprocess: Preprocess,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_INPUT_WIDTH,
            height: DEFAULT_INPUT_HEIGHT,
            preprocess: Preprocess::Scale01,
        }
    }
}

/// Decoded, resized and rescaled pixel grid in NHWC order.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub tensor: Array4<f32>,
    pub width: u32,
    pub height: u32,
    pub preprocess: Preprocess,
}

/// Summary of the tensor fed to the model, reported in debug responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub preprocess: Preprocess,
    pub input_size: [u32; 2],
}

impl ImageBuffer {
    pub fn stats(&self) -> InputStats {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in self.tensor.iter() {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        let n = self.tensor.len().max(1) as f64;
        InputStats {
            min,
            max,
            mean: (sum / n) as f32,
            preprocess: self.preprocess,
            input_size: [self.width, self.height],
        }
    }
}

/// Strip an optional scheme label (everything up to the first comma).
pub fn strip_payload_prefix(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

/// MIME type declared by a `data:<mime>;base64,` prefix, defaulting to JPEG.
pub fn payload_mime_type(payload: &str) -> &str {
    payload
        .split_once(',')
        .and_then(|(head, _)| head.strip_prefix("data:"))
        .map(|head| head.split(';').next().unwrap_or_default().trim())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or("image/jpeg")
}

/// Base64 body of a payload with the prefix and any whitespace removed.
pub fn payload_body(payload: &str) -> String {
    strip_payload_prefix(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect()
}

/// Decode the base64 body of an embedded image payload to raw bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let data = payload_body(payload);
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(BASE64.decode(data.as_bytes())?)
}

/// Decode an embedded image payload into a model-ready buffer.
pub fn decode_payload(payload: &str, opts: &DecoderOptions) -> Result<ImageBuffer, DecodeError> {
    let bytes = decode_base64(payload)?;
    decode_image_bytes(&bytes, opts)
}

/// Check that a payload holds a decodable image without building a tensor.
pub fn verify_payload(payload: &str) -> Result<(), DecodeError> {
    let bytes = decode_base64(payload)?;
    image::load_from_memory(&bytes)?;
    Ok(())
}

/// Decode raw image bytes (PNG, JPEG, ...) into a model-ready buffer.
pub fn decode_image_bytes(bytes: &[u8], opts: &DecoderOptions) -> Result<ImageBuffer, DecodeError> {
    if opts.width == 0 || opts.height == 0 {
        return Err(DecodeError::InvalidSize(opts.width, opts.height));
    }

    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    tracing::debug!(
        src_width = rgb.width(),
        src_height = rgb.height(),
        dst_width = opts.width,
        dst_height = opts.height,
        "decoded image payload"
    );

    let resized = image::imageops::resize(&rgb, opts.width, opts.height, FilterType::Triangle);

    Ok(ImageBuffer {
        tensor: to_tensor(&resized, opts.preprocess),
        width: opts.width,
        height: opts.height,
        preprocess: opts.preprocess,
    })
}

/// Lay out an RGB image as a `(1, H, W, 3)` tensor with the given scaling.
fn to_tensor(img: &RgbImage, preprocess: Preprocess) -> Array4<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, h, w, 3));

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(|c| c as f32);
        let channels = match preprocess {
            Preprocess::Scale01 => [r / 255.0, g / 255.0, b / 255.0],
            Preprocess::Imagenet => [
                b - IMAGENET_MEAN_BGR[0],
                g - IMAGENET_MEAN_BGR[1],
                r - IMAGENET_MEAN_BGR[2],
            ],
        };
        let (x, y) = (x as usize, y as usize);
        for (c, v) in channels.into_iter().enumerate() {
            tensor[[0, y, x, c]] = v;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_payload(width: u32, height: u32, color: [u8; 3]) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64.encode(&buf))
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_payload_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_payload_prefix("AAAA"), "AAAA");
    }

    #[test]
    fn test_payload_mime_type() {
        assert_eq!(payload_mime_type("data:image/png;base64,AAAA"), "image/png");
        assert_eq!(payload_mime_type("data:text/plain;base64,AAAA"), "image/jpeg");
        assert_eq!(payload_mime_type("AAAA"), "image/jpeg");
        assert_eq!(payload_body("data:image/png;base64,AA\nAA "), "AAAA");
    }

    #[test]
    fn test_decode_scale01_shape_and_range() {
        let payload = png_payload(8, 6, [255, 0, 128]);
        let opts = DecoderOptions { width: 4, height: 2, preprocess: Preprocess::Scale01 };
        let buf = decode_payload(&payload, &opts).unwrap();

        assert_eq!(buf.tensor.shape(), &[1, 2, 4, 3]);
        assert!((buf.tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(buf.tensor[[0, 1, 3, 1]].abs() < 1e-6);
        assert!((buf.tensor[[0, 1, 3, 2]] - 128.0 / 255.0).abs() < 1e-6);

        let stats = buf.stats();
        assert!(stats.min >= 0.0 && stats.max <= 1.0);
        assert_eq!(stats.input_size, [4, 2]);
        assert_eq!(stats.preprocess, Preprocess::Scale01);
    }

    #[test]
    fn test_decode_imagenet_is_bgr_mean_subtracted() {
        let payload = png_payload(2, 2, [255, 0, 0]);
        let opts = DecoderOptions { width: 2, height: 2, preprocess: Preprocess::Imagenet };
        let buf = decode_payload(&payload, &opts).unwrap();

        // Channel 0 is blue (0), channel 2 is red (255).
        assert!((buf.tensor[[0, 0, 0, 0]] + IMAGENET_MEAN_BGR[0]).abs() < 1e-3);
        assert!((buf.tensor[[0, 0, 0, 2]] - (255.0 - IMAGENET_MEAN_BGR[2])).abs() < 1e-3);
    }

    #[test]
    fn test_decode_bare_base64_without_prefix() {
        let payload = png_payload(3, 3, [10, 20, 30]);
        let bare = strip_payload_prefix(&payload).to_string();
        let buf = decode_payload(&bare, &DecoderOptions::default()).unwrap();
        assert_eq!(buf.tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn test_invalid_base64() {
        let result = decode_payload("data:image/png;base64,@@not-base64@@", &DecoderOptions::default());
        assert!(matches!(result, Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_valid_base64_but_not_an_image() {
        // "hello world"
        let result = decode_payload("aGVsbG8gd29ybGQ=", &DecoderOptions::default());
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_empty_payload() {
        let result = decode_payload("data:image/png;base64,", &DecoderOptions::default());
        assert!(matches!(result, Err(DecodeError::Empty)));
    }

    #[test]
    fn test_zero_target_size_rejected() {
        let payload = png_payload(2, 2, [0, 0, 0]);
        let opts = DecoderOptions { width: 0, height: 2, preprocess: Preprocess::Scale01 };
        assert!(matches!(decode_payload(&payload, &opts), Err(DecodeError::InvalidSize(0, 2))));
    }

    #[test]
    fn test_verify_payload() {
        assert!(verify_payload(&png_payload(3, 5, [10, 20, 30])).is_ok());
        assert!(matches!(verify_payload(""), Err(DecodeError::Empty)));
        let not_an_image = format!("data:image/png;base64,{}", BASE64.encode(b"plain text"));
        assert!(matches!(verify_payload(&not_an_image), Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_preprocess_from_str() {
        assert_eq!("IMAGENET".parse::<Preprocess>(), Ok(Preprocess::Imagenet));
        assert_eq!(" scale01 ".parse::<Preprocess>(), Ok(Preprocess::Scale01));
        assert!("caffe".parse::<Preprocess>().is_err());
    }
}
