use crate::config::Config;
use crate::face::{AgeEstimator, HttpAgeEstimator, UnconfiguredEstimator};
use crate::store::{FeatureStore, MemoryStore, SqliteStore, TranscriptStore};
use ager_content::{DedupCache, GeminiClient, GenerativeService, ImageResolver, WellnessGenerator};
use ager_core::{AgeClassifier, ClassifierError, ImageBuffer, RawOutput, TensorLayout};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

pub const PROXY_TIMEOUT: Duration = Duration::from_secs(8);

/// Lazily loaded classifier, shared by all requests.
///
/// The first request to need the model loads it; concurrent first callers
/// wait on the same initialisation. A failed load is not cached, so a model
/// dropped into place later is picked up by the next request.
pub struct ModelHandle {
    path: PathBuf,
    layout: TensorLayout,
    cell: OnceCell<Arc<Mutex<AgeClassifier>>>,
}

impl ModelHandle {
    pub fn new(path: PathBuf, layout: TensorLayout) -> Self {
        Self {
            path,
            layout,
            cell: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    async fn classifier(&self) -> Result<Arc<Mutex<AgeClassifier>>, ClassifierError> {
        self.cell
            .get_or_try_init(|| async {
                let path = self.path.to_string_lossy().into_owned();
                let layout = self.layout;
                let classifier = tokio::task::spawn_blocking(move || AgeClassifier::load(&path, layout))
                    .await
                    .map_err(|e| ClassifierError::InferenceFailed(format!("model load task: {e}")))??;
                Ok::<_, ClassifierError>(Arc::new(Mutex::new(classifier)))
            })
            .await
            .cloned()
    }

    /// Run the classifier off the async runtime.
    pub async fn infer(&self, image: ImageBuffer) -> Result<RawOutput, ClassifierError> {
        let classifier = self.classifier().await?;
        tokio::task::spawn_blocking(move || {
            let mut classifier = classifier.lock();
            classifier.run(&image)
        })
        .await
        .map_err(|e| ClassifierError::InferenceFailed(format!("inference task: {e}")))?
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<ModelHandle>,
    pub service: Arc<dyn GenerativeService>,
    pub wellness: WellnessGenerator,
    pub features: Arc<dyn FeatureStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub face: Arc<dyn AgeEstimator>,
    pub http: reqwest::Client,
}

/// Everything [`AppState`] is assembled from.
pub struct Parts {
    pub service: Arc<dyn GenerativeService>,
    pub features: Arc<dyn FeatureStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub face: Arc<dyn AgeEstimator>,
}

impl AppState {
    pub fn new(config: Config, parts: Parts) -> Self {
        let images = ImageResolver::new(config.image_search());
        let wellness = WellnessGenerator::new(parts.service.clone(), Arc::new(DedupCache::new()), images);
        let model = ModelHandle::new(config.model_path.clone(), config.tensor_layout);
        Self {
            config: Arc::new(config),
            model: Arc::new(model),
            service: parts.service,
            wellness,
            features: parts.features,
            transcripts: parts.transcripts,
            face: parts.face,
            http: reqwest::Client::new(),
        }
    }

    /// Production wiring. Falls back to an in-memory store when the
    /// database cannot be opened.
    pub async fn from_config(config: Config) -> Self {
        let service: Arc<dyn GenerativeService> = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone().unwrap_or_default(),
            config.gemini_model.clone(),
            config.gemini_api_base.clone(),
        ));
        if config.gemini_api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set; content endpoints will return 503");
        }

        let (features, transcripts) = match SqliteStore::open(&config.db_path).await {
            Ok(store) => {
                let store = Arc::new(store);
                (store.clone() as Arc<dyn FeatureStore>, store as Arc<dyn TranscriptStore>)
            }
            Err(e) => {
                tracing::warn!(path = %config.db_path.display(), error = %e, "database unavailable; using in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn FeatureStore>, store as Arc<dyn TranscriptStore>)
            }
        };

        let face: Arc<dyn AgeEstimator> = match &config.face_analyzer_url {
            Some(url) => Arc::new(HttpAgeEstimator::new(url.clone())),
            None => {
                tracing::warn!("AGER_FACE_ANALYZER_URL not set; /api/age-ai is disabled");
                Arc::new(UnconfiguredEstimator)
            }
        };

        Self::new(
            config,
            Parts {
                service,
                features,
                transcripts,
                face,
            },
        )
    }
}
