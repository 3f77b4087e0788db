use ager_content::{GoogleCseSearch, ImageSearch, UnsplashSearch};
use ager_core::{DecoderOptions, Preprocess, ScalarRange, TensorLayout};
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_LABELS: [&str; 3] = ["Minor", "Middle-aged", "Senior"];

/// Daemon configuration.
///
/// Defaults, then an optional TOML file named by `AGER_CONFIG`, then
/// `AGER_*` environment variables (which win).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind_addr: String,
    /// ONNX age classifier.
    pub model_path: PathBuf,
    /// Input layout the model expects.
    pub tensor_layout: TensorLayout,
    pub preprocess: Preprocess,
    pub input_width: u32,
    pub input_height: u32,
    /// Range used to rescale regression outputs that fall in [0, 1].
    pub output_min: f32,
    pub output_max: f32,
    /// Ordered label set matching the classifier's output width.
    pub class_labels: Vec<String>,
    /// Expose probabilities, input stats and error hints in responses.
    pub debug_responses: bool,
    /// SQLite database for facial features and chat transcripts.
    pub db_path: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
    /// External face-analysis service used for age estimation.
    pub face_analyzer_url: Option<String>,
    pub unsplash_access_key: Option<String>,
    pub google_cse_key: Option<String>,
    pub google_cse_cx: Option<String>,
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("ager")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            model_path: data_dir.join("models/age_classifier.onnx"),
            tensor_layout: TensorLayout::default(),
            preprocess: Preprocess::default(),
            input_width: 224,
            input_height: 224,
            output_min: 0.0,
            output_max: 120.0,
            class_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            debug_responses: false,
            db_path: data_dir.join("ager.db"),
            gemini_api_key: None,
            gemini_model: ager_content::gemini::DEFAULT_MODEL.to_string(),
            gemini_api_base: ager_content::gemini::DEFAULT_API_BASE.to_string(),
            face_analyzer_url: None,
            unsplash_access_key: None,
            google_cse_key: None,
            google_cse_cx: None,
        }
    }
}

impl Config {
    /// Load from `AGER_CONFIG` (if set) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("AGER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Overlay environment values. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("AGER_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("AGER_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = get("AGER_TENSOR_LAYOUT") {
            parse_into("AGER_TENSOR_LAYOUT", &v, &mut self.tensor_layout);
        }
        if let Some(v) = get("AGER_PREPROCESS") {
            parse_into("AGER_PREPROCESS", &v, &mut self.preprocess);
        }
        if let Some(v) = get("AGER_INPUT_SIZE") {
            match parse_size(&v) {
                Some((w, h)) => {
                    self.input_width = w;
                    self.input_height = h;
                }
                None => tracing::warn!(value = %v, "ignoring invalid AGER_INPUT_SIZE (expected W,H)"),
            }
        }
        if let Some(v) = get("AGER_OUTPUT_MIN") {
            parse_into("AGER_OUTPUT_MIN", &v, &mut self.output_min);
        }
        if let Some(v) = get("AGER_OUTPUT_MAX") {
            parse_into("AGER_OUTPUT_MAX", &v, &mut self.output_max);
        }
        if let Some(v) = get("AGER_CLASS_LABELS") {
            let labels: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !labels.is_empty() {
                self.class_labels = labels;
            }
        }
        if let Some(v) = get("AGER_DEBUG_RESPONSE") {
            self.debug_responses = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("AGER_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = get("AGER_GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = get("AGER_GEMINI_API_BASE") {
            self.gemini_api_base = v;
        }
        if let Some(v) = get("AGER_FACE_ANALYZER_URL") {
            self.face_analyzer_url = Some(v);
        }
        if let Some(v) = get("UNSPLASH_ACCESS_KEY") {
            self.unsplash_access_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_CSE_KEY") {
            self.google_cse_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_CSE_CX") {
            self.google_cse_cx = Some(v);
        }
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            width: self.input_width,
            height: self.input_height,
            preprocess: self.preprocess,
        }
    }

    pub fn scalar_range(&self) -> ScalarRange {
        ScalarRange {
            min: self.output_min,
            max: self.output_max,
        }
    }

    /// Image search used to repair list images. Unsplash is preferred.
    pub fn image_search(&self) -> Option<Arc<dyn ImageSearch>> {
        if let Some(key) = &self.unsplash_access_key {
            return Some(Arc::new(UnsplashSearch::new(key.clone())));
        }
        match (&self.google_cse_key, &self.google_cse_cx) {
            (Some(key), Some(cx)) => Some(Arc::new(GoogleCseSearch::new(key.clone(), cx.clone()))),
            _ => None,
        }
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value, "ignoring unparseable configuration value"),
    }
}

/// `224,224` or `224x224`.
fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once(',').or_else(|| value.split_once(['x', 'X']))?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.class_labels, vec!["Minor", "Middle-aged", "Senior"]);
        assert_eq!(config.decoder_options(), DecoderOptions::default());
        assert_eq!(config.scalar_range(), ScalarRange::default());
        assert!(config.model_path.ends_with("models/age_classifier.onnx"));
        assert!(!config.debug_responses);
        assert!(config.image_search().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("AGER_BIND_ADDR", "0.0.0.0:8080"),
            ("AGER_PREPROCESS", "imagenet"),
            ("AGER_TENSOR_LAYOUT", "NCHW"),
            ("AGER_INPUT_SIZE", "200x160"),
            ("AGER_OUTPUT_MAX", "100"),
            ("AGER_CLASS_LABELS", " Young , Adult,Old "),
            ("AGER_DEBUG_RESPONSE", "true"),
            ("GEMINI_API_KEY", "k"),
            ("UNSPLASH_ACCESS_KEY", "u"),
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.preprocess, Preprocess::Imagenet);
        assert_eq!(config.tensor_layout, TensorLayout::Nchw);
        assert_eq!((config.input_width, config.input_height), (200, 160));
        assert_eq!(config.output_max, 100.0);
        assert_eq!(config.class_labels, vec!["Young", "Adult", "Old"]);
        assert!(config.debug_responses);
        assert_eq!(config.gemini_api_key.as_deref(), Some("k"));
        assert_eq!(config.image_search().map(|s| s.name().to_string()).as_deref(), Some("unsplash"));
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("AGER_PREPROCESS", "sharpen"),
            ("AGER_INPUT_SIZE", "0,10"),
            ("AGER_OUTPUT_MIN", "abc"),
            ("AGER_CLASS_LABELS", " , "),
            ("GEMINI_API_KEY", "   "),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cse_needs_key_and_cx() {
        let mut config = Config::default();
        config.apply_env(env(&[("GOOGLE_CSE_KEY", "k")]));
        assert!(config.image_search().is_none());
        config.apply_env(env(&[("GOOGLE_CSE_CX", "cx")]));
        assert_eq!(config.image_search().map(|s| s.name().to_string()).as_deref(), Some("google_cse"));
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agerd.toml");
        std::fs::write(
            &path,
            "bind_addr = \"0.0.0.0:9000\"\npreprocess = \"imagenet\"\nclass_labels = [\"A\", \"B\"]\n",
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.preprocess, Preprocess::Imagenet);
        assert_eq!(config.class_labels, vec!["A", "B"]);
        assert_eq!(config.input_width, 224);

        config.apply_env(env(&[("AGER_BIND_ADDR", "127.0.0.1:1")]));
        assert_eq!(config.bind_addr, "127.0.0.1:1");
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file(Path::new("/nonexistent/agerd.toml")).is_err());
    }
}
