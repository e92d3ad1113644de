use crate::config::RuntimeConfig;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),
    #[error("Failed to create session: {0}")]
    SessionCreation(String),
}

/// ONNX Runtime session factory (CPU execution provider)
#[derive(Debug, Clone, Default)]
pub struct OnnxRuntime {
    config: RuntimeConfig,
}

impl OnnxRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Create a new session from a model file
    pub fn create_session<P: AsRef<Path>>(&self, model_path: P) -> Result<Session, RuntimeError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RuntimeError::ModelNotFound(model_path.display().to_string()));
        }

        let builder = Session::builder()
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .with_intra_threads(self.config.intra_threads)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?;

        let session = builder.commit_from_file(model_path).map_err(|e| {
            RuntimeError::SessionCreation(format!(
                "Failed to load model from {:?}: {}",
                model_path, e
            ))
        })?;

        log::info!(
            "Loaded ONNX model {:?} ({} intra-op threads)",
            model_path,
            self.config.intra_threads
        );
        Ok(session)
    }
}
