use ager_core::{
    age_json, decode_image_bytes, normalize, validate_age, AgeBand, AgeBucket, AgeClassifier, DecoderOptions,
    DietBucket, InferenceOutput, Preprocess, ScalarRange, TensorLayout,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_URL: &str = "http://127.0.0.1:5000";

#[derive(Parser)]
#[command(name = "ager", about = "Ager age estimation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict an age label for an image file with a local model
    Predict {
        /// Image file (PNG, JPEG, ...)
        file: PathBuf,
        /// ONNX age classifier
        #[arg(short, long)]
        model: PathBuf,
        /// Input layout: nhwc or nchw
        #[arg(long, default_value = "nhwc")]
        layout: TensorLayout,
        /// Pixel preprocessing: scale01 or imagenet
        #[arg(long, default_value = "scale01")]
        preprocess: Preprocess,
        /// Comma-separated class labels, in model output order
        #[arg(long, value_delimiter = ',', default_value = "Minor,Middle-aged,Senior")]
        labels: Vec<String>,
        /// Model input size in pixels (square)
        #[arg(long, default_value_t = 224)]
        size: u32,
    },
    /// Show the buckets an age falls into
    Bucket {
        /// Age in years (0-120)
        age: String,
    },
    /// Check that agerd is up
    Status {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Predict {
            file,
            model,
            layout,
            preprocess,
            labels,
            size,
        } => {
            let opts = DecoderOptions {
                width: size,
                height: size,
                preprocess,
            };
            let result = tokio::task::spawn_blocking(move || predict(&file, &model, layout, &opts, &labels))
                .await
                .context("prediction task panicked")??;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Bucket { age } => {
            println!("{}", serde_json::to_string_pretty(&bucket_report(&age)?)?);
        }
        Commands::Status { url } => {
            let endpoint = format!("{}/api/health", url.trim_end_matches('/'));
            let response = reqwest::Client::new()
                .get(&endpoint)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            match response {
                Ok(r) if r.status().is_success() => println!("agerd: ok ({url})"),
                Ok(r) => bail!("agerd at {url} answered {}", r.status()),
                Err(e) => bail!("agerd at {url} is not reachable: {e}"),
            }
        }
    }

    Ok(())
}

fn predict(
    file: &Path,
    model: &Path,
    layout: TensorLayout,
    opts: &DecoderOptions,
    labels: &[String],
) -> Result<Value> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let image = decode_image_bytes(&bytes, opts)?;
    let stats = image.stats();

    let mut classifier = AgeClassifier::load(&model.to_string_lossy(), layout)?;
    let raw = classifier.run(&image)?;
    let output = InferenceOutput::from_tensor(&raw.shape, &raw.data)?;
    let prediction = normalize(&output, labels, ScalarRange::default())?;

    Ok(json!({
        "label": prediction.label,
        "confidence": prediction.confidence,
        "probabilities": prediction.probabilities,
        "value": prediction.value,
        "input_stats": stats,
    }))
}

fn bucket_report(age: &str) -> Result<Value> {
    let age = validate_age(Some(&Value::String(age.to_string())))?;
    Ok(json!({
        "age": age_json(age),
        "bucket": AgeBucket::from_age(age),
        "diet_bucket": DietBucket::from_age(age).as_str(),
        "band": AgeBand::from_age(age).to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_args() {
        let cli = Cli::try_parse_from([
            "ager", "predict", "face.png", "--model", "m.onnx", "--layout", "nchw", "--labels", "A,B",
        ])
        .unwrap();
        match cli.command {
            Commands::Predict {
                layout,
                preprocess,
                labels,
                size,
                ..
            } => {
                assert_eq!(layout, TensorLayout::Nchw);
                assert_eq!(preprocess, Preprocess::Scale01);
                assert_eq!(labels, vec!["A", "B"]);
                assert_eq!(size, 224);
            }
            _ => panic!("expected predict"),
        }
    }

    #[test]
    fn test_bucket_report() {
        let report = bucket_report("67").unwrap();
        assert_eq!(report["bucket"], "senior");
        assert_eq!(report["diet_bucket"], "senior");
        assert_eq!(report["band"], "65-70");
        assert_eq!(report["age"].to_string(), "67");
        assert_eq!(bucket_report("18.5").unwrap()["age"], json!(18.5));
        assert!(bucket_report("130").is_err());
        assert!(bucket_report("old").is_err());
    }

    #[test]
    fn test_predict_missing_file() {
        let err = predict(
            Path::new("/nonexistent/face.png"),
            Path::new("/nonexistent/m.onnx"),
            TensorLayout::Nhwc,
            &DecoderOptions::default(),
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("reading"));
    }
}
