use crate::config::{Config, ConfigError, ConfigSource, ModelConfig};
use crate::detect::{FaceDetector, OnnxFaceDetector};
use crate::model::{EmbeddingModel, OnnxEmbeddingModel};
use crate::runtime::OnnxRuntime;
use crate::Error;
use serde::Serialize;
use std::sync::Arc;

/// Everything an extraction call needs, built once at startup and shared
/// read-only afterwards.
#[derive(Clone)]
pub struct PipelineContext {
    config: ModelConfig,
    config_source: ConfigSource,
    model: Arc<dyn EmbeddingModel>,
    detector: Option<Arc<dyn FaceDetector>>,
}

/// Model information reported by status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub architecture: String,
    pub input_size: [usize; 3],
    pub output_dimensions: usize,
    pub default_config: bool,
    pub detector: bool,
    pub model: String,
}

impl PipelineContext {
    /// Assemble a context from already-loaded parts
    pub fn new(config: ModelConfig, model: Arc<dyn EmbeddingModel>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            config_source: ConfigSource::Defaults,
            model,
            detector: None,
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_config_source(mut self, source: ConfigSource) -> Self {
        self.config_source = source;
        self
    }

    /// Load the model config (falling back to defaults), the embedding model
    /// and, if configured, the face detector.
    ///
    /// A model that cannot be loaded fails initialization; there is no
    /// degraded mode without it.
    pub fn initialize(settings: &Config) -> Result<Self, Error> {
        let (model_config, source) = ModelConfig::load(&settings.embedding.config_path)?;
        log::info!(
            "Model: {} input {:?}, {} output dimensions",
            model_config.architecture,
            model_config.input_size,
            model_config.num_classes
        );

        let runtime = OnnxRuntime::new(settings.runtime.clone());

        log::info!("Loading face embedding model...");
        let model = OnnxEmbeddingModel::load(&settings.embedding.model_path, &runtime)?;

        let mut context = Self::new(model_config, Arc::new(model))?.with_config_source(source);

        if let Some(detector_path) = &settings.detection.model_path {
            log::info!("Loading face detection model...");
            let detector = OnnxFaceDetector::new(
                detector_path,
                &runtime,
                settings.detection.confidence_threshold,
                settings.detection.nms_threshold,
            )?;
            context = context.with_detector(Arc::new(detector));
        }

        Ok(context)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn config_source(&self) -> &ConfigSource {
        &self.config_source
    }

    pub fn model(&self) -> &dyn EmbeddingModel {
        self.model.as_ref()
    }

    pub fn detector(&self) -> Option<&dyn FaceDetector> {
        self.detector.as_deref()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            architecture: self.config.architecture.clone(),
            input_size: self.config.input_size,
            output_dimensions: self.config.num_classes,
            default_config: self.config_source == ConfigSource::Defaults,
            detector: self.detector.is_some(),
            model: self.model.describe(),
        }
    }
}
